//! Border server clients.
//!
//! Every border server protocol implements [`BorderClient`]. The synchronizer
//! only ever sees the trait: adding a protocol means implementing the trait,
//! adding a client type constant, and extending [`new_border_client`].
pub mod http;
pub mod nginx_plus;
pub mod null;
pub mod stream;

pub use http::HttpBorderClient;
pub use nginx_plus::NginxClient;
pub use null::NullBorderClient;
pub use stream::StreamBorderClient;

use crate::core::ServerUpdateEvent;
use crate::error::Result;
use async_trait::async_trait;

/// Client type of HTTP upstreams
pub const CLIENT_TYPE_NGINX_HTTP: &str = "http";

/// Client type of stream (TCP/UDP) upstreams
pub const CLIENT_TYPE_NGINX_STREAM: &str = "stream";

/// Applies server update events to one border server
#[async_trait]
pub trait BorderClient: Send + Sync {
    /// Bring the event's upstream in line with its server list
    async fn update(&self, event: &ServerUpdateEvent) -> Result<()>;

    /// Remove the event's server from its upstream
    async fn delete(&self, event: &ServerUpdateEvent) -> Result<()>;
}

/// No implementation is registered for the requested client type.
///
/// Carries a no-op client so callers can keep going.
#[derive(Debug, thiserror::Error)]
#[error("unknown border client type: {client_type}")]
pub struct UnknownClientType {
    client_type: String,
    fallback: NullBorderClient,
}

impl UnknownClientType {
    #[must_use]
    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    /// The no-op client to use in place of the unknown type
    #[must_use]
    pub fn into_fallback(self) -> Box<dyn BorderClient> {
        Box::new(self.fallback)
    }
}

/// Build the border client registered for `client_type`
///
/// # Errors
///
/// Will return `Err` naming the type when nothing is registered for it; the
/// error still holds a usable no-op client
pub fn new_border_client(
    client_type: &str,
    nginx_client: NginxClient,
) -> core::result::Result<Box<dyn BorderClient>, UnknownClientType> {
    match client_type {
        CLIENT_TYPE_NGINX_HTTP => Ok(Box::new(HttpBorderClient::new(nginx_client))),
        CLIENT_TYPE_NGINX_STREAM => Ok(Box::new(StreamBorderClient::new(nginx_client))),
        other => Err(UnknownClientType {
            client_type: other.to_string(),
            fallback: NullBorderClient::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventType;

    fn nginx_client() -> NginxClient {
        NginxClient::new(reqwest::Client::new(), "http://127.0.0.1:1/api")
    }

    #[test]
    fn test_known_client_types() {
        assert!(new_border_client(CLIENT_TYPE_NGINX_HTTP, nginx_client()).is_ok());
        assert!(new_border_client(CLIENT_TYPE_NGINX_STREAM, nginx_client()).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_client_type_names_type_and_falls_back() {
        let Err(err) = new_border_client("grpc", nginx_client()) else {
            panic!("grpc is not a registered client type");
        };

        assert_eq!(err.client_type(), "grpc");
        assert!(err.to_string().contains("grpc"));

        let fallback = err.into_fallback();
        let event = ServerUpdateEvent::new(EventType::Created, "tea", "grpc", vec![]);
        assert!(fallback.update(&event).await.is_ok());
        assert!(fallback.delete(&event).await.is_ok());
    }
}
