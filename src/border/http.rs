use super::BorderClient;
use super::nginx_plus::{HttpUpstreamServer, NginxClient};
use crate::core::{ServerUpdateEvent, UpstreamServers};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Manages HTTP upstreams through the NGINX Plus API
#[derive(Debug, Clone)]
pub struct HttpBorderClient {
    nginx_client: NginxClient,
}

impl HttpBorderClient {
    #[must_use]
    pub const fn new(nginx_client: NginxClient) -> Self {
        Self { nginx_client }
    }
}

fn as_http_servers(servers: &UpstreamServers) -> Vec<HttpUpstreamServer> {
    servers
        .iter()
        .map(|server| HttpUpstreamServer::new(server.host.clone()))
        .collect()
}

#[async_trait]
impl BorderClient for HttpBorderClient {
    async fn update(&self, event: &ServerUpdateEvent) -> Result<()> {
        let servers = as_http_servers(&event.upstream_servers);
        let changes = self
            .nginx_client
            .update_http_servers(&event.upstream_name, &servers)
            .await?;

        info!(
            "HttpBorderClient::update: upstream '{}' on {} (added {:?}, deleted {:?})",
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
            .delete_http_server(&event.upstream_name, &server.host)
            .await?;

        debug!(
            "HttpBorderClient::delete: removed {} from upstream '{}' on {}",
            server.host, event.upstream_name, event.nginx_host
        );
        Ok(())
    }
}
