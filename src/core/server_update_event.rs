use super::event::EventType;
use super::upstream_server::UpstreamServers;

/// One unit of outbound work: bring `upstream_name` on `nginx_host` in line
/// with `upstream_servers`.
///
/// `id` and `nginx_host` stay empty until the synchronizer fans the event out
/// to a concrete border server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerUpdateEvent {
    pub client_type: String,
    pub id: String,
    pub nginx_host: String,
    pub event_type: EventType,
    pub upstream_name: String,
    pub upstream_servers: UpstreamServers,
}

pub type ServerUpdateEvents = Vec<ServerUpdateEvent>;

impl ServerUpdateEvent {
    #[must_use]
    pub fn new(
        event_type: EventType,
        upstream_name: impl Into<String>,
        client_type: impl Into<String>,
        upstream_servers: UpstreamServers,
    ) -> Self {
        Self {
            client_type: client_type.into(),
            id: String::new(),
            nginx_host: String::new(),
            event_type,
            upstream_name: upstream_name.into(),
            upstream_servers,
        }
    }

    /// Copy of `event` addressed to one border server
    #[must_use]
    pub fn with_id_and_host(event: &Self, id: impl Into<String>, nginx_host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nginx_host: nginx_host.into(),
            ..event.clone()
        }
    }
}

impl std::fmt::Display for ServerUpdateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} upstream '{}' on '{}' ({} servers)",
            self.event_type,
            self.client_type,
            self.upstream_name,
            self.nginx_host,
            self.upstream_servers.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::UpstreamServer;

    #[test]
    fn test_new_leaves_routing_fields_empty() {
        let event = ServerUpdateEvent::new(EventType::Created, "tea", "http", vec![]);
        assert!(event.id.is_empty());
        assert!(event.nginx_host.is_empty());
    }

    #[test]
    fn test_with_id_and_host_only_sets_routing_fields() {
        let servers = vec![
            UpstreamServer::new("10.0.0.1:30080"),
            UpstreamServer::new("10.0.0.2:30080"),
        ];
        let event = ServerUpdateEvent::new(EventType::Updated, "coffee", "stream", servers.clone());

        let stamped = ServerUpdateEvent::with_id_and_host(&event, "id-1", "http://nginx-a/api");

        assert_eq!(stamped.id, "id-1");
        assert_eq!(stamped.nginx_host, "http://nginx-a/api");
        assert_eq!(stamped.client_type, "stream");
        assert_eq!(stamped.event_type, EventType::Updated);
        assert_eq!(stamped.upstream_name, "coffee");
        assert_eq!(stamped.upstream_servers, servers);
        assert!(event.id.is_empty(), "source event must not change");
    }
}
