//! Pod status merging and patching.
//!
//! After the backend accepts or updates a pod, the agent pushes the pod's
//! status back to the API server. That push is a single logical step:
//! merge the fresh status over the last observed one (replacing agent-owned
//! conditions, preserving external ones), render the difference as a
//! two-way strategic-merge patch, and submit it against the pod's `status`
//! subresource.
//!
//! The merger is stateless and the patcher has no retry loop; retries
//! belong to the caller's reconciliation policy.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, PodStatus};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tether_common::Error;

mod merge;
pub mod patch;

pub use merge::{is_agent_owned, merge_pod_status, AGENT_OWNED_CONDITION_TYPES};
pub use patch::{KubePodPatcher, MemoryPodPatcher, PodPatcher};

/// Pushes merged pod statuses to the API server as minimal strategic
/// patches.
pub struct StatusPatcher {
    patcher: Arc<dyn PodPatcher>,
}

impl StatusPatcher {
    /// Create a new status patcher submitting through `patcher`.
    pub fn new(patcher: Arc<dyn PodPatcher>) -> Self {
        Self { patcher }
    }

    /// Merge `new_status` over `old_status` and patch the named pod's
    /// status subresource with the difference.
    ///
    /// Returns the patched pod as the API server now sees it, plus the
    /// raw patch bytes that were submitted. Identical statuses submit the
    /// empty patch `{}`; eliding the round-trip is the caller's call.
    pub async fn patch_pod_status(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        name: &str,
        old_status: &PodStatus,
        new_status: &PodStatus,
    ) -> Result<(Pod, Vec<u8>), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let merged = merge_pod_status(old_status, new_status);

        // Two synthetic pods carrying only status; shared default metadata
        // cancels out of the diff.
        let old_pod = Pod {
            status: Some(old_status.clone()),
            ..Default::default()
        };
        let new_pod = Pod {
            status: Some(merged),
            ..Default::default()
        };
        let old_json = serde_json::to_value(&old_pod)
            .map_err(|e| Error::patch_construction("marshal-old", e.to_string()))?;
        let new_json = serde_json::to_value(&new_pod)
            .map_err(|e| Error::patch_construction("marshal-new", e.to_string()))?;

        let patch_value = patch::two_way_merge_patch(&old_json, &new_json);
        let patch_bytes = serde_json::to_vec(&patch_value)
            .map_err(|e| Error::patch_construction("encode", e.to_string()))?;

        debug!(
            namespace,
            name,
            patch = %String::from_utf8_lossy(&patch_bytes),
            "patching pod status"
        );

        let pod = self
            .patcher
            .patch_pod_status(namespace, name, patch_bytes.clone())
            .await
            .map_err(|e| Error::patch_submission(namespace, name, e))?;
        Ok((pod, patch_bytes))
    }
}
