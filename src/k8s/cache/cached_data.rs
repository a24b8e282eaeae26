use k8s_openapi::api::core::v1::Service;
use std::time::{Duration, Instant};

/// Last known state of a watched Service, kept so a deletion can still be
/// translated after the live object is gone
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub service: Service,
    pub node_addresses: Vec<String>,
    pub last_updated: Instant,
    pub version: u64, // bumped on every overwrite
}

impl CachedResource {
    #[must_use]
    pub fn new(service: Service, node_addresses: Vec<String>) -> Self {
        Self {
            service,
            node_addresses,
            last_updated: Instant::now(),
            version: 0,
        }
    }

    pub fn update(&mut self, service: Service, node_addresses: Vec<String>) {
        self.service = service;
        self.node_addresses = node_addresses;
        self.last_updated = Instant::now();
        self.version += 1;
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.last_updated.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_bumps_version() {
        let mut cached = CachedResource::new(Service::default(), vec!["10.0.0.1".to_string()]);
        assert_eq!(cached.version, 0);

        cached.update(Service::default(), vec!["10.0.0.2".to_string()]);
        assert_eq!(cached.version, 1);
        assert_eq!(cached.node_addresses, vec!["10.0.0.2"]);
    }

    #[test]
    fn test_update_refreshes_age() {
        let mut cached = CachedResource::new(Service::default(), Vec::new());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cached.age() >= Duration::from_millis(20));

        cached.update(Service::default(), Vec::new());
        assert!(cached.age() < Duration::from_millis(20));
    }
}
