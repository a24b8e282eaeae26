use super::BorderClient;
use super::nginx_plus::{NginxClient, StreamUpstreamServer};
use crate::core::{ServerUpdateEvent, UpstreamServers};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Manages stream (TCP/UDP) upstreams through the NGINX Plus API
#[derive(Debug, Clone)]
pub struct StreamBorderClient {
    nginx_client: NginxClient,
}

impl StreamBorderClient {
    #[must_use]
    pub const fn new(nginx_client: NginxClient) -> Self {
        Self { nginx_client }
    }
}

fn as_stream_servers(servers: &UpstreamServers) -> Vec<StreamUpstreamServer> {
    servers
        .iter()
        .map(|server| StreamUpstreamServer::new(server.host.clone()))
        .collect()
}

#[async_trait]
impl BorderClient for StreamBorderClient {
    async fn update(&self, event: &ServerUpdateEvent) -> Result<()> {
        let servers = as_stream_servers(&event.upstream_servers);
        let changes = self
            .nginx_client
            .update_stream_servers(&event.upstream_name, &servers)
            .await?;

        info!(
            "StreamBorderClient::update: upstream '{}' on {} (added {:?}, deleted {:?})",
            event.upstream_name, event.nginx_host, changes.added, changes.deleted
        );
        Ok(())
    }

    // Acts on the first server of the event only.
    async fn delete(&self, event: &ServerUpdateEvent) -> Result<()> {
        let server = event.upstream_servers.first().ok_or_else(|| {
            Error::Custom(format!(
                "delete of upstream '{}' carries no server",
                event.upstream_name
            ))
        })?;

        self.nginx_client
            .delete_stream_server(&event.upstream_name, &server.host)
            .await?;

        debug!(
            "StreamBorderClient::delete: removed {} from upstream '{}' on {}",
            server.host, event.upstream_name, event.nginx_host
        );
        Ok(())
    }
}
