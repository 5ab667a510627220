//! Pod status condition merging.
//!
//! Pod conditions are co-owned: the agent is authoritative for a fixed set
//! of condition types, while controllers and webhooks may attach their own.
//! Merging a freshly computed status over the last observed one must
//! replace the agent-owned conditions wholesale and preserve everything
//! else verbatim — otherwise each status sync would erase third-party
//! conditions.

use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

/// Condition types the agent owns and fully replaces on every update.
pub const AGENT_OWNED_CONDITION_TYPES: &[&str] = &[
    "PodScheduled",
    "Ready",
    "Initialized",
    "Unschedulable",
    "ContainersReady",
];

/// Whether a condition type is owned (fully replaced) by the agent.
pub fn is_agent_owned(condition_type: &str) -> bool {
    AGENT_OWNED_CONDITION_TYPES.contains(&condition_type)
}

/// Merge a new pod status over an old one.
///
/// The result is `new` with its condition list rebuilt as a partition:
/// conditions whose type is *not* agent-owned are copied from `old` (in
/// their original order), then the agent-owned conditions of `new` are
/// appended. No condition is invented and every output condition came from
/// exactly one input.
///
/// This merge is deliberately not commutative.
pub fn merge_pod_status(old: &PodStatus, new: &PodStatus) -> PodStatus {
    let mut conditions: Vec<PodCondition> = Vec::new();
    for condition in old.conditions.as_deref().unwrap_or(&[]) {
        if !is_agent_owned(&condition.type_) {
            conditions.push(condition.clone());
        }
    }
    for condition in new.conditions.as_deref().unwrap_or(&[]) {
        if is_agent_owned(&condition.type_) {
            conditions.push(condition.clone());
        }
    }

    let mut merged = new.clone();
    merged.conditions = if conditions.is_empty() {
        None
    } else {
        Some(conditions)
    };
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(type_: &str, status: &str) -> PodCondition {
        PodCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    fn status_with(conditions: Vec<PodCondition>) -> PodStatus {
        PodStatus {
            conditions: Some(conditions),
            ..Default::default()
        }
    }

    #[test]
    fn owned_types_are_exactly_the_agent_set() {
        for t in ["PodScheduled", "Ready", "Initialized", "Unschedulable", "ContainersReady"] {
            assert!(is_agent_owned(t), "{t} should be agent-owned");
        }
        for t in ["CustomX", "DisruptionTarget", "PodReadyToStartContainers", ""] {
            assert!(!is_agent_owned(t), "{t} should be externally-owned");
        }
    }

    #[test]
    fn merge_replaces_owned_and_preserves_external() {
        // The agent flips Ready while a third party's CustomX rides
        // along untouched.
        let old = status_with(vec![condition("Ready", "False"), condition("CustomX", "True")]);
        let new = status_with(vec![condition("Ready", "True")]);

        let merged = merge_pod_status(&old, &new);
        let conditions = merged.conditions.unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, "CustomX");
        assert_eq!(conditions[0].status, "True");
        assert_eq!(conditions[1].type_, "Ready");
        assert_eq!(conditions[1].status, "True");
    }

    #[test]
    fn merge_output_is_a_partition_of_its_inputs() {
        // Every output condition is either an owned one from new or an
        // external one from old; stale owned conditions in old disappear.
        let old = status_with(vec![
            condition("Ready", "False"),
            condition("Initialized", "False"),
            condition("External1", "True"),
            condition("External2", "False"),
        ]);
        let new = status_with(vec![
            condition("Ready", "True"),
            condition("ExternalIgnored", "True"),
        ]);

        let merged = merge_pod_status(&old, &new);
        let conditions = merged.conditions.unwrap();
        for c in &conditions {
            if is_agent_owned(&c.type_) {
                assert!(
                    new.conditions.as_ref().unwrap().iter().any(|n| *n == *c),
                    "owned condition {} must come from new",
                    c.type_
                );
            } else {
                assert!(
                    old.conditions.as_ref().unwrap().iter().any(|o| *o == *c),
                    "external condition {} must come from old",
                    c.type_
                );
            }
        }
        // Old's stale Initialized is gone; new's externally-typed
        // condition does not sneak in.
        assert!(!conditions.iter().any(|c| c.type_ == "Initialized"));
        assert!(!conditions.iter().any(|c| c.type_ == "ExternalIgnored"));
        assert_eq!(conditions.len(), 3);
    }

    #[test]
    fn non_condition_fields_come_from_new() {
        let old = PodStatus {
            phase: Some("Pending".to_string()),
            message: Some("old message".to_string()),
            conditions: Some(vec![condition("External1", "True")]),
            ..Default::default()
        };
        let new = PodStatus {
            phase: Some("Running".to_string()),
            host_ip: Some("10.1.2.3".to_string()),
            ..Default::default()
        };

        let merged = merge_pod_status(&old, &new);
        assert_eq!(merged.phase.as_deref(), Some("Running"));
        assert_eq!(merged.host_ip.as_deref(), Some("10.1.2.3"));
        // new carried no message; old's does not leak through.
        assert_eq!(merged.message, None);
        // The external condition still survives.
        assert_eq!(merged.conditions.unwrap()[0].type_, "External1");
    }

    #[test]
    fn merge_with_no_conditions_anywhere_stays_empty() {
        let merged = merge_pod_status(&PodStatus::default(), &PodStatus::default());
        assert_eq!(merged.conditions, None);
    }
}
