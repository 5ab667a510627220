//! Read-only access to the cluster objects admission depends on.
//!
//! The admission pipeline never talks to the Kubernetes API directly; it
//! resolves configmaps, secrets, and services through [`ResourceSource`].
//! The production implementation is a thin pass-through to the API server;
//! the surrounding agent is free to plug in an informer-cache-backed source
//! instead. The pipeline treats every lookup as authoritative and does no
//! caching of its own.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::ListParams;
use kube::{Api, Client};
use thiserror::Error;

/// Errors returned by a [`ResourceSource`].
///
/// `NotFound` is load-bearing: the admission pipeline's optional/mandatory
/// matrix branches on it, so implementations must map their own "absent"
/// signal onto it rather than a generic failure.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The requested object does not exist
    #[error("{kind} \"{namespace}/{name}\" not found")]
    NotFound {
        /// Object kind, lowercase (e.g. "configmap", "secret")
        kind: &'static str,
        /// Namespace the lookup ran in
        namespace: String,
        /// Requested object name
        name: String,
    },

    /// The underlying Kubernetes API call failed
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The source itself is unavailable (cache not synced, injected test
    /// failure, custom backend down)
    #[error("resource source unavailable: {message}")]
    Unavailable {
        /// Description of what failed
        message: String,
    },
}

impl SourceError {
    /// Create a `NotFound` error for the given object
    pub fn not_found(
        kind: &'static str,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Whether this error means "the object does not exist" as opposed to
    /// "the lookup failed"
    pub fn is_not_found(&self) -> bool {
        match self {
            SourceError::NotFound { .. } => true,
            SourceError::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }
}

/// Read-only source of the cluster objects admission depends on.
///
/// All lookups are namespaced by the caller (the pod's namespace);
/// `list_services` is cluster-wide because the master-service rule reaches
/// across namespaces.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Fetch a configmap by name in the given namespace
    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<ConfigMap, SourceError>;

    /// Fetch a secret by name in the given namespace
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret, SourceError>;

    /// List every service visible to the agent, across all namespaces
    async fn list_services(&self) -> Result<Vec<Service>, SourceError>;
}

/// Production implementation backed by the Kubernetes API server.
pub struct KubeResourceSource {
    client: Client,
}

impl KubeResourceSource {
    /// Create a new source reading through the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceSource for KubeResourceSource {
    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<ConfigMap, SourceError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(cm),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(SourceError::not_found("configmap", namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret, SourceError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(s) => Ok(s),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(SourceError::not_found("secret", namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_services(&self) -> Result<Vec<Service>, SourceError> {
        let api: Api<Service> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

/// In-memory implementation for tests.
///
/// Objects are registered up front; lookups for anything else return
/// `NotFound`. Read failures can be injected per object name to exercise
/// the failed-to-read paths of the admission matrix.
#[derive(Default)]
pub struct MemoryResourceSource {
    config_maps: Vec<ConfigMap>,
    secrets: Vec<Secret>,
    services: Vec<Service>,
    config_map_failures: Vec<String>,
    secret_failures: Vec<String>,
    service_list_failure: Option<String>,
}

impl MemoryResourceSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configmap
    pub fn with_config_map(mut self, cm: ConfigMap) -> Self {
        self.config_maps.push(cm);
        self
    }

    /// Register a secret
    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secrets.push(secret);
        self
    }

    /// Register a service
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Make every lookup of the named configmap fail with `Unavailable`
    pub fn with_config_map_failure(mut self, name: impl Into<String>) -> Self {
        self.config_map_failures.push(name.into());
        self
    }

    /// Make every lookup of the named secret fail with `Unavailable`
    pub fn with_secret_failure(mut self, name: impl Into<String>) -> Self {
        self.secret_failures.push(name.into());
        self
    }

    /// Make `list_services` fail with `Unavailable`
    pub fn with_service_list_failure(mut self, message: impl Into<String>) -> Self {
        self.service_list_failure = Some(message.into());
        self
    }
}

#[async_trait]
impl ResourceSource for MemoryResourceSource {
    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<ConfigMap, SourceError> {
        if self.config_map_failures.iter().any(|n| n == name) {
            return Err(SourceError::Unavailable {
                message: format!("injected failure reading configmap {}/{}", namespace, name),
            });
        }
        self.config_maps
            .iter()
            .find(|cm| {
                cm.metadata.name.as_deref() == Some(name)
                    && cm.metadata.namespace.as_deref() == Some(namespace)
            })
            .cloned()
            .ok_or_else(|| SourceError::not_found("configmap", namespace, name))
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret, SourceError> {
        if self.secret_failures.iter().any(|n| n == name) {
            return Err(SourceError::Unavailable {
                message: format!("injected failure reading secret {}/{}", namespace, name),
            });
        }
        self.secrets
            .iter()
            .find(|s| {
                s.metadata.name.as_deref() == Some(name)
                    && s.metadata.namespace.as_deref() == Some(namespace)
            })
            .cloned()
            .ok_or_else(|| SourceError::not_found("secret", namespace, name))
    }

    async fn list_services(&self) -> Result<Vec<Service>, SourceError> {
        if let Some(message) = &self.service_list_failure {
            return Err(SourceError::Unavailable {
                message: message.clone(),
            });
        }
        Ok(self.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn config_map(namespace: &str, name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn memory_source_returns_registered_objects() {
        let source = MemoryResourceSource::new().with_config_map(config_map("ns", "cm"));
        let cm = source.get_config_map("cm", "ns").await.unwrap();
        assert_eq!(cm.metadata.name.as_deref(), Some("cm"));
    }

    #[tokio::test]
    async fn memory_source_misses_are_not_found() {
        let source = MemoryResourceSource::new().with_config_map(config_map("ns", "cm"));

        // Wrong name and wrong namespace are both plain not-found.
        let err = source.get_config_map("other", "ns").await.unwrap_err();
        assert!(err.is_not_found());
        let err = source.get_config_map("cm", "other-ns").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn injected_failures_are_not_not_found() {
        let source = MemoryResourceSource::new()
            .with_config_map(config_map("ns", "cm"))
            .with_config_map_failure("cm");
        let err = source.get_config_map("cm", "ns").await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("injected failure"));
    }

    #[tokio::test]
    async fn service_list_failure_is_injectable() {
        let source = MemoryResourceSource::new().with_service_list_failure("cache not synced");
        let err = source.list_services().await.unwrap_err();
        assert!(err.to_string().contains("cache not synced"));
    }

    #[test]
    fn not_found_accessor_matches_api_404() {
        assert!(SourceError::not_found("secret", "ns", "s").is_not_found());
        assert!(!SourceError::Unavailable {
            message: "down".to_string()
        }
        .is_not_found());
    }
}
