//! Service environment projection.
//!
//! Every admitted pod sees environment variables describing the services
//! visible to it, in the kubelet's standard shape (`{NAME}_SERVICE_HOST`,
//! docker-link `{NAME}_PORT_*` aliases, ...). Selection honors the pod's
//! `enableServiceLinks` toggle with one deliberate exception: the master
//! services of the `default` namespace are always projected, even when
//! service links are disabled.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{Service, ServicePort};
use tether_common::{ResourceSource, SourceError, MASTER_SERVICES, MASTER_SERVICE_NAMESPACE};

/// The cluster IP sentinel marking a headless service.
const CLUSTER_IP_NONE: &str = "None";

/// Build the service environment map for a pod in `namespace`.
///
/// Selection, applied in listing order:
/// 1. services without a usable cluster IP are skipped;
/// 2. master services from the `default` namespace are always included,
///    first seen wins;
/// 3. when `enable_service_links` is set, services in the pod's namespace
///    are included, last seen wins.
///
/// A listing failure is the source's error, unchanged.
pub async fn service_env_map(
    source: &dyn ResourceSource,
    namespace: &str,
    enable_service_links: bool,
) -> Result<HashMap<String, String>, SourceError> {
    let services = source.list_services().await?;

    let mut selected: Vec<&Service> = Vec::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for service in &services {
        if !is_service_ip_set(service) {
            continue;
        }
        let Some(name) = service.metadata.name.as_deref() else {
            continue;
        };
        let service_namespace = service.metadata.namespace.as_deref().unwrap_or_default();

        // Master services from the default namespace are projected even when
        // service links are off; everything else is gated on the toggle.
        if service_namespace == MASTER_SERVICE_NAMESPACE && MASTER_SERVICES.contains(&name) {
            if !index_of.contains_key(name) {
                index_of.insert(name, selected.len());
                selected.push(service);
            }
        } else if service_namespace == namespace && enable_service_links {
            match index_of.get(name) {
                Some(&i) => selected[i] = service,
                None => {
                    index_of.insert(name, selected.len());
                    selected.push(service);
                }
            }
        }
    }

    let mut env = HashMap::new();
    for (name, value) in from_services(&selected) {
        env.insert(name, value);
    }
    Ok(env)
}

/// Project the kubelet-standard environment variables for a set of
/// selected services.
///
/// Per service: `{NAME}_SERVICE_HOST`, `{NAME}_SERVICE_PORT`,
/// `{NAME}_SERVICE_PORT_{PORTNAME}` for named ports, and the docker-link
/// `{NAME}_PORT[...]` family. Variable names uppercase the service name and
/// replace `-` with `_`.
pub fn from_services(services: &[&Service]) -> Vec<(String, String)> {
    let mut result = Vec::new();
    for service in services {
        if !is_service_ip_set(service) {
            continue;
        }
        let Some(name) = service.metadata.name.as_deref() else {
            continue;
        };
        let Some(cluster_ip) = service.spec.as_ref().and_then(|s| s.cluster_ip.as_deref()) else {
            continue;
        };
        let ports: &[ServicePort] = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_deref())
            .unwrap_or(&[]);
        let prefix = make_env_variable_name(name);

        result.push((format!("{}_SERVICE_HOST", prefix), cluster_ip.to_string()));

        // First port gets the backwards-compatible name; API validation
        // guarantees at least one port, so the guard is for hand-built
        // service objects only.
        if let Some(first) = ports.first() {
            result.push((format!("{}_SERVICE_PORT", prefix), first.port.to_string()));
        }
        // All named ports (only the first may be unnamed).
        for port in ports {
            if let Some(port_name) = port.name.as_deref() {
                if !port_name.is_empty() {
                    result.push((
                        format!("{}_SERVICE_PORT_{}", prefix, make_env_variable_name(port_name)),
                        port.port.to_string(),
                    ));
                }
            }
        }

        result.extend(make_link_variables(&prefix, cluster_ip, ports));
    }
    result
}

/// Whether the service has a usable cluster IP (headless `None` and unset
/// both disqualify it).
pub fn is_service_ip_set(service: &Service) -> bool {
    match service.spec.as_ref().and_then(|s| s.cluster_ip.as_deref()) {
        Some(ip) => !ip.is_empty() && ip != CLUSTER_IP_NONE,
        None => false,
    }
}

/// Docker-compatible link variables for one service.
fn make_link_variables(prefix: &str, cluster_ip: &str, ports: &[ServicePort]) -> Vec<(String, String)> {
    let mut all = Vec::new();
    for (i, port) in ports.iter().enumerate() {
        let protocol = port.protocol.as_deref().unwrap_or("TCP");
        let url = format!("{}://{}:{}", protocol.to_lowercase(), cluster_ip, port.port);
        if i == 0 {
            // Docker special-cases the first port.
            all.push((format!("{}_PORT", prefix), url.clone()));
        }
        let port_prefix = format!("{}_PORT_{}_{}", prefix, port.port, protocol.to_uppercase());
        all.push((port_prefix.clone(), url));
        all.push((format!("{}_PROTO", port_prefix), protocol.to_lowercase()));
        all.push((format!("{}_PORT", port_prefix), port.port.to_string()));
        all.push((format!("{}_ADDR", port_prefix), cluster_ip.to_string()));
    }
    all
}

fn make_env_variable_name(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}
