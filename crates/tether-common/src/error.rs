//! Error types for the Tether admission core
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries the contextual information callers need to distinguish
//! "missing mandatory reference" from "transient read failure" from
//! "malformed downward-API selector" without parsing messages.

use thiserror::Error;

use crate::sources::SourceError;

/// The kind of namespaced object an environment reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A configmap reference (`envFrom.configMapRef` / `valueFrom.configMapKeyRef`)
    ConfigMap,
    /// A secret reference (`envFrom.secretRef` / `valueFrom.secretKeyRef`)
    Secret,
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKind::ConfigMap => f.write_str("configmap"),
            RefKind::Secret => f.write_str("secret"),
        }
    }
}

/// Main error type for Tether admission and status operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error outside the mandatory/optional reference matrix
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Resource source failure outside the reference matrix (e.g. listing
    /// services for the environment projection)
    #[error("resource source error: {source}")]
    Source {
        /// The underlying source error
        #[from]
        source: SourceError,
    },

    /// A mandatory configmap/secret reference points at an object or key
    /// that does not exist
    #[error("mandatory {kind} \"{namespace}/{name}\" {what}", what = missing_what(.key))]
    MandatoryResourceMissing {
        /// Referenced object kind
        kind: RefKind,
        /// Referenced object name
        name: String,
        /// Namespace the reference was resolved in (the pod's namespace)
        namespace: String,
        /// The missing key, when the object exists but the key does not
        key: Option<String>,
    },

    /// A mandatory configmap/secret reference could not be read for a
    /// reason other than the object being absent
    #[error("failed to read mandatory {kind} \"{namespace}/{name}\": {source}")]
    MandatoryResourceUnreadable {
        /// Referenced object kind
        kind: RefKind,
        /// Referenced object name
        name: String,
        /// Namespace the reference was resolved in
        namespace: String,
        /// The underlying read failure
        source: SourceError,
    },

    /// A downward-API field selector names an unknown or unsupported field
    #[error("downward API field \"{field_path}\" ({api_version}): {message}")]
    DownwardField {
        /// API version the selector was written against
        api_version: String,
        /// The selector's field path
        field_path: String,
        /// What is wrong with it
        message: String,
    },

    /// Building the status patch failed before anything was sent
    #[error("status patch construction failed [{stage}]: {message}")]
    PatchConstruction {
        /// Which sub-step failed (e.g. "marshal-old", "diff")
        stage: &'static str,
        /// Description of what failed
        message: String,
    },

    /// The API server rejected or failed the status patch
    #[error("failed to patch status of pod {namespace}/{name}: {source}")]
    PatchSubmission {
        /// Pod namespace
        namespace: String,
        /// Pod name
        name: String,
        /// The underlying kube-rs error, unchanged
        source: kube::Error,
    },

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,
}

fn missing_what(key: &Option<String>) -> String {
    match key {
        Some(k) => format!("does not contain key \"{}\"", k),
        None => "not found".to_string(),
    }
}

impl Error {
    /// Create an error for a mandatory reference whose target object is absent
    pub fn mandatory_missing(
        kind: RefKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::MandatoryResourceMissing {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            key: None,
        }
    }

    /// Create an error for a mandatory key reference whose key is absent
    /// from an object that exists
    pub fn mandatory_key_missing(
        kind: RefKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::MandatoryResourceMissing {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            key: Some(key.into()),
        }
    }

    /// Create an error for a mandatory reference whose target could not be read
    pub fn mandatory_unreadable(
        kind: RefKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        source: SourceError,
    ) -> Self {
        Self::MandatoryResourceUnreadable {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            source,
        }
    }

    /// Create an error for an unknown or unsupported downward-API selector
    pub fn downward_field(
        api_version: impl Into<String>,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DownwardField {
            api_version: api_version.into(),
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// Create an error for a failed status-patch construction sub-step
    pub fn patch_construction(stage: &'static str, message: impl Into<String>) -> Self {
        Self::PatchConstruction {
            stage,
            message: message.into(),
        }
    }

    /// Create an error for a rejected status-patch submission
    pub fn patch_submission(
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::PatchSubmission {
            namespace: namespace.into(),
            name: name.into(),
            source,
        }
    }

    /// Whether this error means the pod must not be admitted
    ///
    /// Mandatory-reference and downward-API failures reject the pod; the
    /// control plane re-queues it under its own reconciliation policy.
    /// Patch errors and cancellation are operational, not admission verdicts.
    pub fn fails_admission(&self) -> bool {
        matches!(
            self,
            Error::MandatoryResourceMissing { .. }
                | Error::MandatoryResourceUnreadable { .. }
                | Error::DownwardField { .. }
        )
    }

    /// Whether this error came from the caller's cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The referenced object, if this error is about a specific reference
    ///
    /// Returns `(kind, namespace, name)`.
    pub fn resource(&self) -> Option<(RefKind, &str, &str)> {
        match self {
            Error::MandatoryResourceMissing {
                kind,
                name,
                namespace,
                ..
            }
            | Error::MandatoryResourceUnreadable {
                kind,
                name,
                namespace,
                ..
            } => Some((*kind, namespace, name)),
            _ => None,
        }
    }

    /// The missing key, if this error is about a key inside an object
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::MandatoryResourceMissing { key, .. } => key.as_deref(),
            _ => None,
        }
    }
}
