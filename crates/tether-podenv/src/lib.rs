//! Pod environment materialization.
//!
//! Before a pod is handed to the execution backend, every indirection in
//! its containers' environments is resolved against the cluster: `envFrom`
//! imports, `valueFrom` key and field references, `$(VAR)` expansions, and
//! the implicit service environment. The result is a pod whose containers
//! carry a flat `env` list and an empty `envFrom` — the only shape the
//! backend ever sees.
//!
//! Precedence, lowest to highest: service environment < `envFrom` entries
//! (later entries override earlier) < `env` entries (later entries override
//! earlier). The first failed *mandatory* reference rejects the pod
//! immediately; optional failures emit warning events and continue.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, EnvVar, ObjectReference, Pod};
use tokio_util::sync::CancellationToken;

use tether_common::{pod_object_ref, Error, EventSink, ResourceSource};

pub mod expansion;
pub mod fieldpath;
mod resolve;
pub mod service_env;
pub mod validation;

/// Materializes pod environments against a resource source, reporting
/// reference problems as events on the pod.
pub struct Materializer {
    source: Arc<dyn ResourceSource>,
    sink: Arc<dyn EventSink>,
}

impl Materializer {
    /// Create a new materializer.
    ///
    /// - `source`: where configmaps, secrets, and services are read from
    /// - `sink`: where warning events about the pod's references go
    pub fn new(source: Arc<dyn ResourceSource>, sink: Arc<dyn EventSink>) -> Self {
        Self { source, sink }
    }

    /// Resolve and flatten the environment of every container in `pod`,
    /// in place.
    ///
    /// Init containers are processed first, then regular containers, each
    /// in list order. On success every container has `envFrom` cleared and
    /// `env` holding unique `(name, value)` pairs. On error the pod is in
    /// an unspecified intermediate state and must be discarded by the
    /// caller.
    pub async fn materialize(&self, cancel: &CancellationToken, pod: &mut Pod) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Read-only view for field refs and event attribution while the
        // containers underneath are rewritten.
        let view = pod.clone();
        let pod_ref = pod_object_ref(&view);

        let namespace = view.metadata.namespace.as_deref().unwrap_or_default();
        let enable_service_links = view
            .spec
            .as_ref()
            .and_then(|s| s.enable_service_links)
            .unwrap_or(true);

        // One projection per pod; every container sees the same services.
        let service_env =
            service_env::service_env_map(self.source.as_ref(), namespace, enable_service_links)
                .await?;

        let Some(spec) = pod.spec.as_mut() else {
            return Ok(());
        };
        if let Some(init_containers) = spec.init_containers.as_mut() {
            for container in init_containers.iter_mut() {
                self.populate_container(cancel, &view, &pod_ref, container, &service_env)
                    .await?;
            }
        }
        for container in spec.containers.iter_mut() {
            self.populate_container(cancel, &view, &pod_ref, container, &service_env)
                .await?;
        }
        Ok(())
    }

    /// Resolve one container's environment and rewrite it in place.
    async fn populate_container(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
        pod_ref: &ObjectReference,
        container: &mut Container,
        service_env: &HashMap<String, String>,
    ) -> Result<(), Error> {
        let source = self.source.as_ref();
        let sink = self.sink.as_ref();

        // envFrom first: it is the lowest-precedence explicit layer and the
        // expansion scope for env literals.
        let mut env = resolve::env_from_map(cancel, pod, pod_ref, container, source, sink).await?;

        for entry in container.env.clone().unwrap_or_default() {
            let value = if entry.value_from.is_some() {
                resolve::env_var_value(cancel, pod, pod_ref, &entry, source, sink).await?
            } else {
                // Literal values expand against what the container has
                // accumulated so far plus the service environment;
                // undefined names stay textually in place.
                let literal = entry.value.clone().unwrap_or_default();
                Some(expansion::expand(&literal, |name| {
                    env.get(name)
                        .or_else(|| service_env.get(name))
                        .cloned()
                        .unwrap_or_else(|| expansion::syntax_wrap(name))
                }))
            };
            // No value means omit the variable entirely: an optional
            // reference that did not resolve, or a resource-field ref.
            if let Some(value) = value {
                env.insert(entry.name.clone(), value);
            }
        }

        // Service variables fill gaps only; they never override anything
        // the pod author wrote.
        for (name, value) in service_env {
            if !env.contains_key(name) {
                env.insert(name.clone(), value.clone());
            }
        }

        container.env_from = None;
        container.env = if env.is_empty() {
            None
        } else {
            Some(
                env.into_iter()
                    .map(|(name, value)| EnvVar {
                        name,
                        value: Some(value),
                        value_from: None,
                    })
                    .collect(),
            )
        };
        Ok(())
    }
}
