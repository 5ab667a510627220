//! Reference resolution for container environments.
//!
//! Two resolvers live here, one per indirection style:
//!
//! - [`env_from_map`] materializes `envFrom` entries — "import every key of
//!   this configmap/secret, optionally prefixed" — into a flat map,
//!   skipping and reporting keys that are not legal variable names.
//! - [`env_var_value`] materializes a single `valueFrom` indirection —
//!   configmap key, secret key, downward-API field, or resource field —
//!   into an optional value; `None` means "omit the variable".
//!
//! Both apply the same policy matrix: a failure on an optional reference
//! emits a warning event and continues; the same failure on a mandatory
//! reference emits the event *and* rejects the pod. The reference's
//! `optional` flag is the only input to that decision; absent means
//! mandatory.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, ObjectReference, Pod,
};
use kube::runtime::events::EventType;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use tether_common::events::{actions, reasons};
use tether_common::{Error, EventSink, RefKind, ResourceSource, SourceError};

use crate::fieldpath;
use crate::validation::is_env_var_name;

/// Resolve every `envFrom` entry of a container into one flat map.
///
/// Entries are processed in list order; later entries overwrite earlier
/// ones on key collisions. Keys whose effective name (`prefix + key`) is
/// not a legal environment variable name are skipped, and one warning
/// event per entry lists them sorted.
pub(crate) async fn env_from_map(
    cancel: &CancellationToken,
    pod: &Pod,
    pod_ref: &ObjectReference,
    container: &Container,
    source: &dyn ResourceSource,
    sink: &dyn EventSink,
) -> Result<HashMap<String, String>, Error> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let mut res = HashMap::new();

    for env_from in container.env_from.as_deref().unwrap_or(&[]) {
        let prefix = env_from.prefix.as_deref().unwrap_or_default();

        if let Some(cm_ref) = &env_from.config_map_ref {
            let name = cm_ref.name.as_str();
            let optional = cm_ref.optional.unwrap_or(false);
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let cm = match source.get_config_map(name, namespace).await {
                Ok(cm) => cm,
                Err(err) => {
                    match bulk_ref_failure(RefKind::ConfigMap, name, namespace, optional, err, pod_ref, sink)
                        .await
                    {
                        Some(err) => return Err(err),
                        None => continue,
                    }
                }
            };

            let mut invalid_keys = Vec::new();
            for (key, value) in cm.data.clone().unwrap_or_default() {
                let key = format!("{}{}", prefix, key);
                if !is_env_var_name(&key) {
                    invalid_keys.push(key);
                    continue;
                }
                res.insert(key, value);
            }
            report_invalid_keys(invalid_keys, RefKind::ConfigMap, &cm.metadata, namespace, pod_ref, sink)
                .await;
        } else if let Some(s_ref) = &env_from.secret_ref {
            let name = s_ref.name.as_str();
            let optional = s_ref.optional.unwrap_or(false);
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let secret = match source.get_secret(name, namespace).await {
                Ok(s) => s,
                Err(err) => {
                    match bulk_ref_failure(RefKind::Secret, name, namespace, optional, err, pod_ref, sink)
                        .await
                    {
                        Some(err) => return Err(err),
                        None => continue,
                    }
                }
            };

            let mut invalid_keys = Vec::new();
            for (key, value) in secret.data.clone().unwrap_or_default() {
                let key = format!("{}{}", prefix, key);
                if !is_env_var_name(&key) {
                    invalid_keys.push(key);
                    continue;
                }
                res.insert(key, String::from_utf8_lossy(&value.0).into_owned());
            }
            report_invalid_keys(invalid_keys, RefKind::Secret, &secret.metadata, namespace, pod_ref, sink)
                .await;
        }
    }

    Ok(res)
}

/// Resolve one `valueFrom` indirection to its value.
///
/// `Ok(None)` means the variable is omitted entirely: an optional reference
/// that did not resolve, or a resource-field reference.
pub(crate) async fn env_var_value(
    cancel: &CancellationToken,
    pod: &Pod,
    pod_ref: &ObjectReference,
    env: &EnvVar,
    source: &dyn ResourceSource,
    sink: &dyn EventSink,
) -> Result<Option<String>, Error> {
    let Some(value_from) = &env.value_from else {
        return Ok(None);
    };

    if let Some(key_ref) = &value_from.config_map_key_ref {
        return config_map_key_value(cancel, pod, pod_ref, env, key_ref, source, sink).await;
    }
    if let Some(key_ref) = &value_from.secret_key_ref {
        return secret_key_value(cancel, pod, pod_ref, env, key_ref, source, sink).await;
    }
    if let Some(field_ref) = &value_from.field_ref {
        return fieldpath::pod_field_selector_value(field_ref, pod).map(Some);
    }
    if value_from.resource_field_ref.is_some() {
        // TODO: resolve resource requests/limits. Until then the variable
        // is dropped without error, never inserted empty.
        return Ok(None);
    }

    error!(
        env = %env.name,
        "Unhandled environment variable with non-nil valueFrom, do not know how to populate"
    );
    Ok(None)
}

async fn config_map_key_value(
    cancel: &CancellationToken,
    pod: &Pod,
    pod_ref: &ObjectReference,
    env: &EnvVar,
    key_ref: &k8s_openapi::api::core::v1::ConfigMapKeySelector,
    source: &dyn ResourceSource,
    sink: &dyn EventSink,
) -> Result<Option<String>, Error> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let name = key_ref.name.as_str();
    let key = key_ref.key.as_str();
    let optional = key_ref.optional.unwrap_or(false);

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let cm = match source.get_config_map(name, namespace).await {
        Ok(cm) => cm,
        Err(err) => {
            return match key_ref_failure(
                RefKind::ConfigMap,
                name,
                namespace,
                &env.name,
                optional,
                err,
                pod_ref,
                sink,
            )
            .await
            {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }
    };

    match cm.data.as_ref().and_then(|d| d.get(key)) {
        Some(value) => Ok(Some(value.clone())),
        None => {
            if optional {
                sink.record(
                    pod_ref,
                    EventType::Warning,
                    reasons::OPTIONAL_CONFIG_MAP_KEY_NOT_FOUND,
                    actions::ADMITTING,
                    format!(
                        "skipping optional envvar {:?}: key {:?} does not exist in configmap {:?}",
                        env.name, key, name
                    ),
                )
                .await;
                return Ok(None);
            }
            sink.record(
                pod_ref,
                EventType::Warning,
                reasons::MANDATORY_CONFIG_MAP_KEY_NOT_FOUND,
                actions::ADMITTING,
                format!("key {:?} does not exist in configmap {:?}", key, name),
            )
            .await;
            Err(Error::mandatory_key_missing(RefKind::ConfigMap, name, namespace, key))
        }
    }
}

async fn secret_key_value(
    cancel: &CancellationToken,
    pod: &Pod,
    pod_ref: &ObjectReference,
    env: &EnvVar,
    key_ref: &k8s_openapi::api::core::v1::SecretKeySelector,
    source: &dyn ResourceSource,
    sink: &dyn EventSink,
) -> Result<Option<String>, Error> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let name = key_ref.name.as_str();
    let key = key_ref.key.as_str();
    let optional = key_ref.optional.unwrap_or(false);

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let secret = match source.get_secret(name, namespace).await {
        Ok(s) => s,
        Err(err) => {
            return match key_ref_failure(
                RefKind::Secret,
                name,
                namespace,
                &env.name,
                optional,
                err,
                pod_ref,
                sink,
            )
            .await
            {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }
    };

    match secret.data.as_ref().and_then(|d| d.get(key)) {
        Some(value) => Ok(Some(String::from_utf8_lossy(&value.0).into_owned())),
        None => {
            if optional {
                sink.record(
                    pod_ref,
                    EventType::Warning,
                    reasons::OPTIONAL_SECRET_KEY_NOT_FOUND,
                    actions::ADMITTING,
                    format!(
                        "skipping optional envvar {:?}: key {:?} does not exist in secret {:?}",
                        env.name, key, name
                    ),
                )
                .await;
                return Ok(None);
            }
            sink.record(
                pod_ref,
                EventType::Warning,
                reasons::MANDATORY_SECRET_KEY_NOT_FOUND,
                actions::ADMITTING,
                format!("key {:?} does not exist in secret {:?}", key, name),
            )
            .await;
            Err(Error::mandatory_key_missing(RefKind::Secret, name, namespace, key))
        }
    }
}

/// Apply the policy matrix to a failed `envFrom` object fetch.
///
/// Returns `Some(error)` when admission must fail, `None` when the entry
/// is skipped (event already emitted either way).
async fn bulk_ref_failure(
    kind: RefKind,
    name: &str,
    namespace: &str,
    optional: bool,
    err: SourceError,
    pod_ref: &ObjectReference,
    sink: &dyn EventSink,
) -> Option<Error> {
    let not_found = err.is_not_found();
    if optional {
        if not_found {
            sink.record(
                pod_ref,
                EventType::Warning,
                optional_not_found_reason(kind),
                actions::ADMITTING,
                format!("{} {:?} not found", kind, name),
            )
            .await;
        } else {
            warn!(%kind, name, error = %err, "failed to read optional envFrom reference");
            sink.record(
                pod_ref,
                EventType::Warning,
                failed_optional_reason(kind),
                actions::ADMITTING,
                format!("failed to read {} {:?}", kind, name),
            )
            .await;
        }
        return None;
    }
    if not_found {
        sink.record(
            pod_ref,
            EventType::Warning,
            mandatory_not_found_reason(kind),
            actions::ADMITTING,
            format!("{} {:?} not found", kind, name),
        )
        .await;
        return Some(Error::mandatory_missing(kind, name, namespace));
    }
    sink.record(
        pod_ref,
        EventType::Warning,
        failed_mandatory_reason(kind),
        actions::ADMITTING,
        format!("failed to read {} {:?}", kind, name),
    )
    .await;
    Some(Error::mandatory_unreadable(kind, name, namespace, err))
}

/// Apply the policy matrix to a failed `valueFrom` object fetch.
///
/// Same outcomes as [`bulk_ref_failure`], but the optional-path event
/// messages name the variable being skipped.
#[allow(clippy::too_many_arguments)]
async fn key_ref_failure(
    kind: RefKind,
    name: &str,
    namespace: &str,
    env_name: &str,
    optional: bool,
    err: SourceError,
    pod_ref: &ObjectReference,
    sink: &dyn EventSink,
) -> Option<Error> {
    let not_found = err.is_not_found();
    if optional {
        if not_found {
            sink.record(
                pod_ref,
                EventType::Warning,
                optional_not_found_reason(kind),
                actions::ADMITTING,
                format!("skipping optional envvar {:?}: {} {:?} not found", env_name, kind, name),
            )
            .await;
        } else {
            warn!(%kind, name, error = %err, "failed to read optional valueFrom reference");
            sink.record(
                pod_ref,
                EventType::Warning,
                failed_optional_reason(kind),
                actions::ADMITTING,
                format!(
                    "skipping optional envvar {:?}: failed to read {} {:?}",
                    env_name, kind, name
                ),
            )
            .await;
        }
        return None;
    }
    if not_found {
        sink.record(
            pod_ref,
            EventType::Warning,
            mandatory_not_found_reason(kind),
            actions::ADMITTING,
            format!("{} {:?} not found", kind, name),
        )
        .await;
        return Some(Error::mandatory_missing(kind, name, namespace));
    }
    sink.record(
        pod_ref,
        EventType::Warning,
        failed_mandatory_reason(kind),
        actions::ADMITTING,
        format!("failed to read {} {:?}", kind, name),
    )
    .await;
    Some(Error::mandatory_unreadable(kind, name, namespace, err))
}

/// Emit the single sorted invalid-keys event for an `envFrom` entry.
async fn report_invalid_keys(
    mut invalid_keys: Vec<String>,
    kind: RefKind,
    object_meta: &kube::core::ObjectMeta,
    pod_namespace: &str,
    pod_ref: &ObjectReference,
    sink: &dyn EventSink,
) {
    if invalid_keys.is_empty() {
        return;
    }
    invalid_keys.sort();
    let namespace = object_meta.namespace.as_deref().unwrap_or(pod_namespace);
    let name = object_meta.name.as_deref().unwrap_or_default();
    sink.record(
        pod_ref,
        EventType::Warning,
        reasons::INVALID_ENVIRONMENT_VARIABLE_NAMES,
        actions::ADMITTING,
        format!(
            "keys [{}] from {} {}/{} were skipped since they are invalid as environment variable names",
            invalid_keys.join(", "),
            kind,
            namespace,
            name
        ),
    )
    .await;
}

fn optional_not_found_reason(kind: RefKind) -> &'static str {
    match kind {
        RefKind::ConfigMap => reasons::OPTIONAL_CONFIG_MAP_NOT_FOUND,
        RefKind::Secret => reasons::OPTIONAL_SECRET_NOT_FOUND,
    }
}

fn failed_optional_reason(kind: RefKind) -> &'static str {
    match kind {
        RefKind::ConfigMap => reasons::FAILED_TO_READ_OPTIONAL_CONFIG_MAP,
        RefKind::Secret => reasons::FAILED_TO_READ_OPTIONAL_SECRET,
    }
}

fn mandatory_not_found_reason(kind: RefKind) -> &'static str {
    match kind {
        RefKind::ConfigMap => reasons::MANDATORY_CONFIG_MAP_NOT_FOUND,
        RefKind::Secret => reasons::MANDATORY_SECRET_NOT_FOUND,
    }
}

fn failed_mandatory_reason(kind: RefKind) -> &'static str {
    match kind {
        RefKind::ConfigMap => reasons::FAILED_TO_READ_MANDATORY_CONFIG_MAP,
        RefKind::Secret => reasons::FAILED_TO_READ_MANDATORY_SECRET,
    }
}
