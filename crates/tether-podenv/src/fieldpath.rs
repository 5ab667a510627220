//! Downward-API field extraction.
//!
//! Resolves `valueFrom.fieldRef` selectors against the pod being admitted:
//! first the selector's label is converted under the rules of its API
//! version (only `v1` is supported), then the converted path is read from
//! the pod. Unknown labels and unselectable-but-convertible paths are
//! fail-admission errors carrying the selector as written.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ObjectFieldSelector, Pod};
use tether_common::Error;

/// Resolve the runtime value of a `fieldRef` selector for a pod.
pub fn pod_field_selector_value(selector: &ObjectFieldSelector, pod: &Pod) -> Result<String, Error> {
    // The API server defaults apiVersion to "v1" on admission; a pod that
    // reaches this agent without it was built in-process.
    let api_version = selector.api_version.as_deref().unwrap_or("v1");
    let internal = convert_downward_api_field_label(api_version, &selector.field_path)?;
    match internal.as_str() {
        "spec.nodeName" => Ok(pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default()),
        "spec.serviceAccountName" => Ok(pod
            .spec
            .as_ref()
            .and_then(|s| s.service_account_name.clone())
            .unwrap_or_default()),
        _ => extract_field_path_as_string(pod, &internal),
    }
}

/// Convert a downward-API label to its internal field path.
///
/// Returns the converted path, or a fail-admission error for unsupported
/// versions, unsupported labels, and subscripts on paths that do not take
/// them.
pub fn convert_downward_api_field_label(version: &str, label: &str) -> Result<String, Error> {
    if version != "v1" {
        return Err(Error::downward_field(version, label, "unsupported pod version"));
    }

    if let Some((path, _subscript)) = split_maybe_subscripted_path(label) {
        return match path {
            "metadata.annotations" | "metadata.labels" => Ok(label.to_string()),
            _ => Err(Error::downward_field(
                version,
                label,
                "field label does not support subscript",
            )),
        };
    }

    match label {
        "metadata.annotations"
        | "metadata.labels"
        | "metadata.name"
        | "metadata.namespace"
        | "metadata.uid"
        | "spec.nodeName"
        | "spec.restartPolicy"
        | "spec.serviceAccountName"
        | "spec.schedulerName"
        | "status.hostIP"
        | "status.podIP"
        | "status.podIPs" => Ok(label.to_string()),
        // Backwards compatibility with old v1 clients that send spec.host.
        "spec.host" => Ok("spec.nodeName".to_string()),
        _ => Err(Error::downward_field(version, label, "field label not supported")),
    }
}

/// Read a converted metadata field path from the pod as a string.
///
/// Subscripted lookups return the empty string when the key is absent.
/// Paths that convert but cannot be selected here (`status.*`,
/// `spec.restartPolicy`, `spec.schedulerName`) are a fail-admission error.
pub fn extract_field_path_as_string(pod: &Pod, field_path: &str) -> Result<String, Error> {
    if let Some((path, subscript)) = split_maybe_subscripted_path(field_path) {
        return match path {
            "metadata.annotations" => Ok(pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|m| m.get(subscript))
                .cloned()
                .unwrap_or_default()),
            "metadata.labels" => Ok(pod
                .metadata
                .labels
                .as_ref()
                .and_then(|m| m.get(subscript))
                .cloned()
                .unwrap_or_default()),
            _ => Err(Error::downward_field(
                "v1",
                field_path,
                "fieldPath does not support subscript",
            )),
        };
    }

    match field_path {
        "metadata.annotations" => Ok(format_map(pod.metadata.annotations.as_ref())),
        "metadata.labels" => Ok(format_map(pod.metadata.labels.as_ref())),
        "metadata.name" => Ok(pod.metadata.name.clone().unwrap_or_default()),
        "metadata.namespace" => Ok(pod.metadata.namespace.clone().unwrap_or_default()),
        "metadata.uid" => Ok(pod.metadata.uid.clone().unwrap_or_default()),
        _ => Err(Error::downward_field("v1", field_path, "unsupported fieldPath")),
    }
}

/// Split `path['key']` into `(path, key)`; `None` when the path carries no
/// subscript.
fn split_maybe_subscripted_path(field_path: &str) -> Option<(&str, &str)> {
    let rest = field_path.strip_suffix("']")?;
    let (path, subscript) = rest.split_once("['")?;
    if path.is_empty() {
        return None;
    }
    Some((path, subscript))
}

/// Render a label/annotation map the way the kubelet does for
/// whole-map downward-API selection: sorted `key="value"` lines.
fn format_map(map: Option<&BTreeMap<String, String>>) -> String {
    let Some(map) = map else {
        return String::new();
    };
    // BTreeMap iteration is already sorted by key.
    map.iter()
        .map(|(k, v)| format!("{}={:?}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn test_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("pod-0".to_string()),
                namespace: Some("foo".to_string()),
                uid: Some("uid-0".to_string()),
                labels: Some(
                    [
                        ("zone".to_string(), "us-est-coast".to_string()),
                        ("cluster".to_string(), "test-cluster1".to_string()),
                        ("rack".to_string(), "rack-22".to_string()),
                    ]
                    .into(),
                ),
                annotations: Some(
                    [
                        ("build".to_string(), "two".to_string()),
                        ("builder".to_string(), "john-doe".to_string()),
                    ]
                    .into(),
                ),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::PodSpec {
                node_name: Some("namenode".to_string()),
                service_account_name: Some("serviceaccount".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn selector(field_path: &str) -> ObjectFieldSelector {
        ObjectFieldSelector {
            api_version: Some("v1".to_string()),
            field_path: field_path.to_string(),
        }
    }

    #[test]
    fn resolves_spec_fields() {
        let pod = test_pod();
        assert_eq!(pod_field_selector_value(&selector("spec.nodeName"), &pod).unwrap(), "namenode");
        assert_eq!(
            pod_field_selector_value(&selector("spec.serviceAccountName"), &pod).unwrap(),
            "serviceaccount"
        );
        // Legacy alias.
        assert_eq!(pod_field_selector_value(&selector("spec.host"), &pod).unwrap(), "namenode");
    }

    #[test]
    fn resolves_metadata_fields() {
        let pod = test_pod();
        assert_eq!(pod_field_selector_value(&selector("metadata.name"), &pod).unwrap(), "pod-0");
        assert_eq!(pod_field_selector_value(&selector("metadata.namespace"), &pod).unwrap(), "foo");
        assert_eq!(pod_field_selector_value(&selector("metadata.uid"), &pod).unwrap(), "uid-0");
    }

    #[test]
    fn renders_whole_maps_sorted() {
        let pod = test_pod();
        assert_eq!(
            pod_field_selector_value(&selector("metadata.labels"), &pod).unwrap(),
            "cluster=\"test-cluster1\"\nrack=\"rack-22\"\nzone=\"us-est-coast\""
        );
        assert_eq!(
            pod_field_selector_value(&selector("metadata.annotations"), &pod).unwrap(),
            "build=\"two\"\nbuilder=\"john-doe\""
        );
    }

    #[test]
    fn resolves_subscripted_lookups() {
        let pod = test_pod();
        assert_eq!(
            pod_field_selector_value(&selector("metadata.labels['zone']"), &pod).unwrap(),
            "us-est-coast"
        );
        assert_eq!(
            pod_field_selector_value(&selector("metadata.annotations['build']"), &pod).unwrap(),
            "two"
        );
        // Absent keys read as the empty string, not an error.
        assert_eq!(
            pod_field_selector_value(&selector("metadata.labels['nope']"), &pod).unwrap(),
            ""
        );
    }

    #[test]
    fn rejects_unknown_labels_and_versions() {
        let pod = test_pod();

        let err = pod_field_selector_value(&selector("metadata.nope"), &pod).unwrap_err();
        assert!(err.fails_admission());
        assert!(err.to_string().contains("not supported"));

        let bad_version = ObjectFieldSelector {
            api_version: Some("v2".to_string()),
            field_path: "spec.nodeName".to_string(),
        };
        let err = pod_field_selector_value(&bad_version, &pod).unwrap_err();
        assert!(err.to_string().contains("unsupported pod version"));
    }

    #[test]
    fn rejects_subscripts_on_unsubscriptable_paths() {
        let pod = test_pod();
        let err = pod_field_selector_value(&selector("spec.nodeName['x']"), &pod).unwrap_err();
        assert!(err.to_string().contains("subscript"));
    }

    #[test]
    fn convertible_but_unselectable_paths_error() {
        // status.podIP converts fine but this pipeline has no status to
        // read from, so selection fails.
        let pod = test_pod();
        let err = pod_field_selector_value(&selector("status.podIP"), &pod).unwrap_err();
        assert!(err.fails_admission());
        assert!(err.to_string().contains("unsupported fieldPath"));
    }

    #[test]
    fn missing_api_version_defaults_to_v1() {
        let pod = test_pod();
        let sel = ObjectFieldSelector {
            api_version: None,
            field_path: "metadata.name".to_string(),
        };
        assert_eq!(pod_field_selector_value(&sel, &pod).unwrap(), "pod-0");
    }

    #[test]
    fn split_subscript_edge_cases() {
        assert_eq!(
            split_maybe_subscripted_path("metadata.labels['a']"),
            Some(("metadata.labels", "a"))
        );
        assert_eq!(split_maybe_subscripted_path("metadata.labels"), None);
        assert_eq!(split_maybe_subscripted_path("['a']"), None);
        assert_eq!(split_maybe_subscripted_path("metadata.labels['']"), Some(("metadata.labels", "")));
    }
}
