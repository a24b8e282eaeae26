use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The kind of change observed for a watched resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// A single Service change as seen by the watcher.
///
/// `previous_service` is only populated for `Updated`. `node_addresses` holds
/// the cluster members that can back the Service at the time of the event.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub event_type: EventType,
    pub service: Service,
    pub previous_service: Option<Service>,
    pub node_addresses: Vec<String>,
}

impl ResourceEvent {
    #[must_use]
    pub fn new(
        event_type: EventType,
        service: Service,
        previous_service: Option<Service>,
        node_addresses: Vec<String>,
    ) -> Self {
        let previous_service = match event_type {
            EventType::Updated => previous_service,
            EventType::Created | EventType::Deleted => None,
        };

        Self {
            event_type,
            service,
            previous_service,
            node_addresses,
        }
    }

    /// `namespace/name` of the Service this event is about
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.service.namespace().unwrap_or_default(),
            self.service.name_any()
        )
    }

    fn identity(&self) -> (EventType, String, Option<&str>, &[String]) {
        (
            self.event_type,
            self.key(),
            self.service.metadata.resource_version.as_deref(),
            &self.node_addresses,
        )
    }
}

// Two events are the same work item when they describe the same change of the
// same object revision against the same node set; the work queue relies on this
// to collapse repeated adds.
impl PartialEq for ResourceEvent {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ResourceEvent {}

impl Hash for ResourceEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn service(name: &str, version: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some(version.to_string()),
                ..ObjectMeta::default()
            },
            ..Service::default()
        }
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::Created.to_string(), "Created");
        assert_eq!(EventType::Updated.to_string(), "Updated");
        assert_eq!(EventType::Deleted.to_string(), "Deleted");
    }

    #[test]
    fn test_previous_service_only_kept_for_updates() {
        let created = ResourceEvent::new(
            EventType::Created,
            service("web", "1"),
            Some(service("web", "0")),
            vec![],
        );
        assert!(created.previous_service.is_none());

        let updated = ResourceEvent::new(
            EventType::Updated,
            service("web", "2"),
            Some(service("web", "1")),
            vec![],
        );
        assert!(updated.previous_service.is_some());
    }

    #[test]
    fn test_identity_collapses_same_revision() {
        let nodes = vec!["10.0.0.1".to_string()];
        let a = ResourceEvent::new(EventType::Updated, service("web", "7"), None, nodes.clone());
        let b = ResourceEvent::new(EventType::Updated, service("web", "7"), None, nodes.clone());
        let c = ResourceEvent::new(EventType::Updated, service("web", "8"), None, nodes);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key(), "default/web");
    }
}
