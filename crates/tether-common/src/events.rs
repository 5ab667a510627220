//! Kubernetes Event recording for the admission pipeline.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so the pipeline can emit standard Kubernetes Events on the pods it
//! admits, visible via `kubectl describe pod` and `kubectl get events`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never change an admission verdict.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
///
/// Implementations are expected to be fire-and-forget: `record()` logs a
/// warning on failure but never returns an error.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning (the admission pipeline only emits Warning)
    /// * `reason` - Machine-readable reason string (e.g. "MandatorySecretNotFound")
    /// * `action` - What action was being taken (e.g. "Admitting")
    /// * `note` - Human-readable message
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    /// Create a new sink for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events
    /// (e.g. "tether-node-agent").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
///
/// All calls are silently ignored — no Kubernetes API interaction.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn record(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: String,
    ) {
        // intentionally empty
    }
}

/// A single event captured by [`MemoryEventSink`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// The object the event was recorded on
    pub resource_ref: ObjectReference,
    /// Normal or Warning
    pub type_: EventType,
    /// Machine-readable reason string
    pub reason: String,
    /// Action string
    pub action: String,
    /// Human-readable message
    pub note: String,
}

/// Capturing implementation for tests.
///
/// Stores every recorded event in order so assertions can check reasons and
/// message texts.
#[derive(Default)]
pub struct MemoryEventSink {
    events: std::sync::Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, in recording order
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("event sink lock poisoned").clone()
    }

    /// Events recorded with the given reason
    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.events
            .lock()
            .expect("event sink lock poisoned")
            .push(RecordedEvent {
                resource_ref: resource_ref.clone(),
                type_,
                reason: reason.to_string(),
                action: action.to_string(),
                note,
            });
    }
}

/// Build the `ObjectReference` for a pod, used as the involved object of
/// every event the admission pipeline emits.
pub fn pod_object_ref(pod: &Pod) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Pod".to_string()),
        name: pod.metadata.name.clone(),
        namespace: pod.metadata.namespace.clone(),
        uid: pod.metadata.uid.clone(),
        resource_version: pod.metadata.resource_version.clone(),
        ..Default::default()
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column and are a
/// stable surface: external test suites assert on them.
pub mod reasons {
    // Optional references: warn and continue
    /// An optional configmap reference names a configmap that does not exist
    pub const OPTIONAL_CONFIG_MAP_NOT_FOUND: &str = "OptionalConfigMapNotFound";
    /// An optional configmap key reference names a key that does not exist
    pub const OPTIONAL_CONFIG_MAP_KEY_NOT_FOUND: &str = "OptionalConfigMapKeyNotFound";
    /// An optional configmap reference could not be read
    pub const FAILED_TO_READ_OPTIONAL_CONFIG_MAP: &str = "FailedToReadOptionalConfigMap";
    /// An optional secret reference names a secret that does not exist
    pub const OPTIONAL_SECRET_NOT_FOUND: &str = "OptionalSecretNotFound";
    /// An optional secret key reference names a key that does not exist
    pub const OPTIONAL_SECRET_KEY_NOT_FOUND: &str = "OptionalSecretKeyNotFound";
    /// An optional secret reference could not be read
    pub const FAILED_TO_READ_OPTIONAL_SECRET: &str = "FailedToReadOptionalSecret";

    // Mandatory references: warn and fail admission
    /// A mandatory configmap reference names a configmap that does not exist
    pub const MANDATORY_CONFIG_MAP_NOT_FOUND: &str = "MandatoryConfigMapNotFound";
    /// A mandatory configmap key reference names a key that does not exist
    pub const MANDATORY_CONFIG_MAP_KEY_NOT_FOUND: &str = "MandatoryConfigMapKeyNotFound";
    /// A mandatory configmap reference could not be read
    pub const FAILED_TO_READ_MANDATORY_CONFIG_MAP: &str = "FailedToReadMandatoryConfigMap";
    /// A mandatory secret reference names a secret that does not exist
    pub const MANDATORY_SECRET_NOT_FOUND: &str = "MandatorySecretNotFound";
    /// A mandatory secret key reference names a key that does not exist
    pub const MANDATORY_SECRET_KEY_NOT_FOUND: &str = "MandatorySecretKeyNotFound";
    /// A mandatory secret reference could not be read
    pub const FAILED_TO_READ_MANDATORY_SECRET: &str = "FailedToReadMandatorySecret";

    /// An envFrom configmap/secret contains keys that are not legal
    /// environment variable names; one event per reference, keys sorted
    pub const INVALID_ENVIRONMENT_VARIABLE_NAMES: &str = "InvalidEnvironmentVariableNames";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Pod admission: resolving references and materializing the environment
    pub const ADMITTING: &str = "Admitting";
    /// Pod status synchronization back to the API server
    pub const SYNC_STATUS: &str = "SyncStatus";
}
