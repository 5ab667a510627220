//! Strategic-merge patch construction and submission for pod status.
//!
//! The agent updates pod status with a *two-way* strategic-merge patch: the
//! diff between the last observed status and the freshly merged one, so
//! only fields that actually changed travel on the wire. No general
//! strategic-merge library exists in this ecosystem, so the diff here
//! implements exactly the subset the pod-status subtree needs:
//!
//! - objects diff recursively; changed scalars replace, keys absent from
//!   the new side patch to `null`;
//! - the merge-keyed lists (`conditions` by `type`, `podIPs`/`hostIPs` by
//!   `ip`) diff element-wise, with `$patch: delete` markers for removed
//!   elements and a `$setElementOrder` directive when elements were added
//!   or reordered;
//! - every other list replaces wholesale when it differs.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{Map, Value};

/// Lists under `status` that merge by key instead of replacing wholesale.
const MERGE_KEYS: &[(&str, &str)] = &[("conditions", "type"), ("podIPs", "ip"), ("hostIPs", "ip")];

fn merge_key_for(field: &str) -> Option<&'static str> {
    MERGE_KEYS
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, key)| *key)
}

/// Submits status patches for pods.
///
/// The admission core always patches the `status` subresource with a
/// strategic-merge patch; implementations only choose the transport.
#[async_trait]
pub trait PodPatcher: Send + Sync {
    /// Apply `patch` (strategic-merge, JSON bytes) to the status
    /// subresource of the named pod, returning the patched pod.
    async fn patch_pod_status(
        &self,
        namespace: &str,
        name: &str,
        patch: Vec<u8>,
    ) -> Result<Pod, kube::Error>;
}

/// Production implementation patching through the Kubernetes API server.
pub struct KubePodPatcher {
    client: Client,
}

impl KubePodPatcher {
    /// Create a new patcher writing through the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodPatcher for KubePodPatcher {
    async fn patch_pod_status(
        &self,
        namespace: &str,
        name: &str,
        patch: Vec<u8>,
    ) -> Result<Pod, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let value: Value = serde_json::from_slice(&patch).map_err(kube::Error::SerdeError)?;
        api.patch_status(name, &PatchParams::default(), &Patch::Strategic(value))
            .await
    }
}

/// A patch captured by [`MemoryPodPatcher`].
#[derive(Debug, Clone)]
pub struct SubmittedPatch {
    /// Pod namespace the patch targeted
    pub namespace: String,
    /// Pod name the patch targeted
    pub name: String,
    /// Raw patch bytes
    pub patch: Vec<u8>,
}

/// Capturing implementation for tests.
///
/// Records every submitted patch and answers with a configurable pod, or a
/// configurable API error.
#[derive(Default)]
pub struct MemoryPodPatcher {
    submitted: std::sync::Mutex<Vec<SubmittedPatch>>,
    response: Option<Pod>,
    fail_with: Option<(u16, String)>,
}

impl MemoryPodPatcher {
    /// Create a patcher answering every patch with a default pod
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every patch with the given pod
    pub fn with_response(mut self, pod: Pod) -> Self {
        self.response = Some(pod);
        self
    }

    /// Fail every patch with an API error of the given code and message
    pub fn with_failure(mut self, code: u16, message: impl Into<String>) -> Self {
        self.fail_with = Some((code, message.into()));
        self
    }

    /// All patches submitted so far, in order
    pub fn submitted(&self) -> Vec<SubmittedPatch> {
        self.submitted.lock().expect("patcher lock poisoned").clone()
    }
}

#[async_trait]
impl PodPatcher for MemoryPodPatcher {
    async fn patch_pod_status(
        &self,
        namespace: &str,
        name: &str,
        patch: Vec<u8>,
    ) -> Result<Pod, kube::Error> {
        self.submitted
            .lock()
            .expect("patcher lock poisoned")
            .push(SubmittedPatch {
                namespace: namespace.to_string(),
                name: name.to_string(),
                patch,
            });
        if let Some((code, message)) = &self.fail_with {
            return Err(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: message.clone(),
                reason: "TestInjected".to_string(),
                code: *code,
            }));
        }
        Ok(self.response.clone().unwrap_or_default())
    }
}

/// Compute the two-way strategic-merge patch turning `old` into `new`.
///
/// Both values are serialized synthetic pods (`{metadata, status}`); the
/// result is the minimal patch object, `{}` when nothing changed.
pub fn two_way_merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            Value::Object(diff_objects(old_map, new_map))
        }
        _ if old == new => Value::Object(Map::new()),
        _ => new.clone(),
    }
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();
    for (field, new_value) in new {
        match old.get(field) {
            None => {
                patch.insert(field.clone(), new_value.clone());
            }
            Some(old_value) if old_value == new_value => {}
            Some(Value::Object(old_obj)) if new_value.is_object() => {
                let inner = diff_objects(old_obj, new_value.as_object().expect("checked above"));
                if !inner.is_empty() {
                    patch.insert(field.clone(), Value::Object(inner));
                }
            }
            Some(Value::Array(old_items)) if new_value.is_array() => {
                let new_items = new_value.as_array().expect("checked above");
                match merge_key_for(field) {
                    Some(key) => diff_keyed_list(field, key, old_items, new_items, &mut patch),
                    // Unkeyed lists are atomic: replace wholesale.
                    None => {
                        patch.insert(field.clone(), new_value.clone());
                    }
                }
            }
            Some(_) => {
                patch.insert(field.clone(), new_value.clone());
            }
        }
    }
    // Keys dropped on the new side patch to null.
    for field in old.keys() {
        if !new.contains_key(field) {
            patch.insert(field.clone(), Value::Null);
        }
    }
    patch
}

/// Diff a merge-keyed list, writing the element patch list and (when
/// needed) the `$setElementOrder` directive into `patch`.
fn diff_keyed_list(
    field: &str,
    key: &str,
    old_items: &[Value],
    new_items: &[Value],
    patch: &mut Map<String, Value>,
) {
    // An element without a string merge key makes the list unmergeable;
    // fall back to wholesale replacement like an atomic list.
    let old_keys = match element_keys(old_items, key) {
        Some(keys) => keys,
        None => {
            patch.insert(field.to_string(), Value::Array(new_items.to_vec()));
            return;
        }
    };
    let new_keys = match element_keys(new_items, key) {
        Some(keys) => keys,
        None => {
            patch.insert(field.to_string(), Value::Array(new_items.to_vec()));
            return;
        }
    };

    let mut items = Vec::new();
    for (item, item_key) in new_items.iter().zip(&new_keys) {
        match old_items
            .iter()
            .zip(&old_keys)
            .find(|(_, k)| k == &item_key)
        {
            Some((old_item, _)) => {
                let mut inner = diff_objects(
                    old_item.as_object().expect("keyed elements are objects"),
                    item.as_object().expect("keyed elements are objects"),
                );
                if !inner.is_empty() {
                    inner.insert(key.to_string(), Value::String(item_key.clone()));
                    items.push(Value::Object(inner));
                }
            }
            // Added element travels in full.
            None => items.push(item.clone()),
        }
    }
    for removed in old_keys.iter().filter(|k| !new_keys.contains(k)) {
        let mut marker = Map::new();
        marker.insert("$patch".to_string(), Value::String("delete".to_string()));
        marker.insert(key.to_string(), Value::String(removed.clone()));
        items.push(Value::Object(marker));
    }

    // The server needs explicit element order only when the new list's
    // order differs from the old one's (restricted to surviving
    // elements) — i.e. on insertions and reorders, not pure updates or
    // deletions.
    let surviving: Vec<&String> = old_keys.iter().filter(|k| new_keys.contains(k)).collect();
    let order_changed = surviving.len() != new_keys.len()
        || surviving.iter().zip(&new_keys).any(|(a, b)| *a != b);
    if order_changed {
        let order: Vec<Value> = new_keys
            .iter()
            .map(|k| {
                let mut element = Map::new();
                element.insert(key.to_string(), Value::String(k.clone()));
                Value::Object(element)
            })
            .collect();
        patch.insert(format!("$setElementOrder/{}", field), Value::Array(order));
    }

    if !items.is_empty() {
        patch.insert(field.to_string(), Value::Array(items));
    }
}

/// The merge-key value of every element, in order; `None` when any element
/// is not an object carrying a string key.
fn element_keys(items: &[Value], key: &str) -> Option<Vec<String>> {
    items
        .iter()
        .map(|item| {
            item.as_object()
                .and_then(|obj| obj.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_values_produce_the_empty_patch() {
        let pod = json!({"metadata": {}, "status": {"phase": "Running"}});
        assert_eq!(two_way_merge_patch(&pod, &pod), json!({}));
    }

    #[test]
    fn scalar_changes_patch_the_field_only() {
        let old = json!({"metadata": {}, "status": {"phase": "Pending", "hostIP": "10.0.0.1"}});
        let new = json!({"metadata": {}, "status": {"phase": "Running", "hostIP": "10.0.0.1"}});
        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {"phase": "Running"}})
        );
    }

    #[test]
    fn dropped_fields_patch_to_null() {
        let old = json!({"status": {"phase": "Running", "message": "gone soon"}});
        let new = json!({"status": {"phase": "Running"}});
        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {"message": null}})
        );
    }

    #[test]
    fn condition_updates_touch_only_changed_fields() {
        // One condition changed status; the other rides along untouched
        // and does not appear in the element patch list.
        let old = json!({"status": {"conditions": [
            {"type": "Ready", "status": "False", "reason": "NotReady"},
            {"type": "CustomX", "status": "True"}
        ]}});
        let new = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True", "reason": "NotReady"},
            {"type": "CustomX", "status": "True"}
        ]}});

        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}})
        );
    }

    #[test]
    fn added_conditions_travel_in_full_with_element_order() {
        let old = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True"}
        ]}});
        let new = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True"},
            {"type": "Initialized", "status": "True", "reason": "Done"}
        ]}});

        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {
                "$setElementOrder/conditions": [{"type": "Ready"}, {"type": "Initialized"}],
                "conditions": [{"type": "Initialized", "status": "True", "reason": "Done"}]
            }})
        );
    }

    #[test]
    fn removed_conditions_emit_delete_markers_without_order() {
        let old = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True"},
            {"type": "Stale", "status": "True"}
        ]}});
        let new = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True"}
        ]}});

        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {"conditions": [{"$patch": "delete", "type": "Stale"}]}})
        );
    }

    #[test]
    fn reordered_conditions_emit_element_order() {
        let old = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True"},
            {"type": "CustomX", "status": "True"}
        ]}});
        let new = json!({"status": {"conditions": [
            {"type": "CustomX", "status": "True"},
            {"type": "Ready", "status": "True"}
        ]}});

        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {
                "$setElementOrder/conditions": [{"type": "CustomX"}, {"type": "Ready"}]
            }})
        );
    }

    #[test]
    fn unkeyed_lists_replace_wholesale() {
        let old = json!({"status": {"containerStatuses": [
            {"name": "ctr", "ready": false}
        ]}});
        let new = json!({"status": {"containerStatuses": [
            {"name": "ctr", "ready": true}
        ]}});

        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {"containerStatuses": [{"name": "ctr", "ready": true}]}})
        );
    }

    #[test]
    fn pod_ips_merge_by_ip() {
        let old = json!({"status": {"podIPs": [{"ip": "10.0.0.1"}]}});
        let new = json!({"status": {"podIPs": [{"ip": "10.0.0.1"}, {"ip": "fd00::1"}]}});

        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {
                "$setElementOrder/podIPs": [{"ip": "10.0.0.1"}, {"ip": "fd00::1"}],
                "podIPs": [{"ip": "fd00::1"}]
            }})
        );
    }

    #[test]
    fn keyless_elements_fall_back_to_replacement() {
        let old = json!({"status": {"conditions": [{"status": "True"}]}});
        let new = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});

        assert_eq!(
            two_way_merge_patch(&old, &new),
            json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}})
        );
    }

    #[tokio::test]
    async fn memory_patcher_records_and_fails_on_demand() {
        let patcher = MemoryPodPatcher::new();
        patcher
            .patch_pod_status("ns", "pod-0", b"{}".to_vec())
            .await
            .unwrap();
        let submitted = patcher.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].namespace, "ns");
        assert_eq!(submitted[0].name, "pod-0");

        let failing = MemoryPodPatcher::new().with_failure(409, "conflict");
        let err = failing
            .patch_pod_status("ns", "pod-0", b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, kube::Error::Api(ref e) if e.code == 409));
    }
}
