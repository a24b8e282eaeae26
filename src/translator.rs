/**
 * Service change to border server update translation
 *
 * A Service port takes part in load balancing when its name carries the
 * `nlk-` prefix; the rest of the name is the upstream on the border server.
 * The border client protocol for the port comes from the
 * `nginxinc.io/<port-name>` annotation and defaults to HTTP.
 */
use crate::border::CLIENT_TYPE_NGINX_HTTP;
use crate::core::{
    EventType, ResourceEvent, ServerUpdateEvent, ServerUpdateEvents, UpstreamServer,
    UpstreamServers,
};
use crate::error::{Error, Result};
use crate::k8s::cache::{ResourceCache, ResourceKey};
use k8s_openapi::api::core::v1::{Service, ServicePort};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Port name prefix that marks a port for border server management
pub const NLK_PORT_PREFIX: &str = "nlk-";

/// Annotation prefix selecting the client type of a port
pub const PORT_ANNOTATION_PREFIX: &str = "nginxinc.io";

/// Turns observed Service changes into per-upstream update intents
#[derive(Debug, Clone)]
pub struct Translator {
    cache: Arc<ResourceCache>,
}

impl Translator {
    #[must_use]
    pub const fn new(cache: Arc<ResourceCache>) -> Self {
        Self { cache }
    }

    /// Translate one resource event into zero or more server update events.
    ///
    /// Deletions are translated from the cached last-known Service and its
    /// node set, never from the event body.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the Service has no name and so cannot be keyed
    pub fn translate(&self, event: &ResourceEvent) -> Result<ServerUpdateEvents> {
        let key = ResourceKey::of(&event.service).ok_or_else(|| {
            Error::Translation("service has no metadata.name".to_string())
        })?;

        match event.event_type {
            EventType::Created | EventType::Updated => Ok(build_server_update_events(
                event.event_type,
                &event.service,
                &event.node_addresses,
            )),
            EventType::Deleted => {
                let Some(cached) = self.cache.take(&key) else {
                    warn!(
                        "Translator::translate: no cached state for deleted service {}, upstreams are left as they are",
                        key
                    );
                    return Ok(Vec::new());
                };

                if cached.node_addresses.is_empty() {
                    warn!(
                        "Translator::translate: no cached node addresses for deleted service {}, nothing to remove",
                        key
                    );
                    return Ok(Vec::new());
                }

                debug!(
                    "Translator::translate: removing {} using state cached {:?} ago (v{})",
                    key,
                    cached.age(),
                    cached.version
                );
                Ok(build_server_update_events(
                    EventType::Deleted,
                    &cached.service,
                    &cached.node_addresses,
                ))
            }
        }
    }
}

/// Whether `port` is managed on the border servers
#[must_use]
pub fn is_port_of_interest(port: &ServicePort) -> bool {
    port.name
        .as_deref()
        .is_some_and(|name| name.starts_with(NLK_PORT_PREFIX) && name.len() > NLK_PORT_PREFIX.len())
}

/// Upstream name encoded in a port name, `nlk-tea` -> `tea`
#[must_use]
pub fn upstream_name(port_name: &str) -> &str {
    port_name.strip_prefix(NLK_PORT_PREFIX).unwrap_or(port_name)
}

/// Client type declared for `port_name`, HTTP when no annotation is present
#[must_use]
pub fn client_type(port_name: &str, annotations: Option<&BTreeMap<String, String>>) -> String {
    let annotation = format!("{PORT_ANNOTATION_PREFIX}/{port_name}");
    annotations
        .and_then(|annotations| annotations.get(&annotation))
        .map_or_else(
            || CLIENT_TYPE_NGINX_HTTP.to_string(),
            |value| value.trim().to_ascii_lowercase(),
        )
}

fn build_upstream_servers(node_addresses: &[String], node_port: i32) -> UpstreamServers {
    node_addresses
        .iter()
        .map(|address| UpstreamServer::new(format!("{address}:{node_port}")))
        .collect()
}

fn build_server_update_events(
    event_type: EventType,
    service: &Service,
    node_addresses: &[String],
) -> ServerUpdateEvents {
    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map_or(&[][..], Vec::as_slice);
    let annotations = service.metadata.annotations.as_ref();

    let events: ServerUpdateEvents = ports
        .iter()
        .filter(|port| is_port_of_interest(port))
        .filter_map(|port| {
            let port_name = port.name.as_deref()?;
            let Some(node_port) = port.node_port else {
                warn!(
                    "Translator: port '{}' on service {:?} has no nodePort, skipping",
                    port_name, service.metadata.name
                );
                return None;
            };

            Some(ServerUpdateEvent::new(
                event_type,
                upstream_name(port_name),
                client_type(port_name, annotations),
                build_upstream_servers(node_addresses, node_port),
            ))
        })
        .collect();

    debug!(
        "Translator: {} {:?} -> {} server update events",
        event_type,
        service.metadata.name,
        events.len()
    );
    events
}
