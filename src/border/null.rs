use super::BorderClient;
use crate::core::ServerUpdateEvent;
use crate::error::Result;
use async_trait::async_trait;
use tracing::warn;

/// Stands in for client types nothing is registered for; accepts every
/// event and changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBorderClient;

impl NullBorderClient {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BorderClient for NullBorderClient {
    async fn update(&self, event: &ServerUpdateEvent) -> Result<()> {
        warn!(
            "NullBorderClient::update: no client for type '{}', ignoring update of upstream '{}'",
            event.client_type, event.upstream_name
        );
        Ok(())
    }

    async fn delete(&self, event: &ServerUpdateEvent) -> Result<()> {
        warn!(
            "NullBorderClient::delete: no client for type '{}', ignoring delete from upstream '{}'",
            event.client_type, event.upstream_name
        );
        Ok(())
    }
}
