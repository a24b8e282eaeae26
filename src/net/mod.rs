//! Outbound HTTP plumbing for the border servers.
pub mod tls;

use crate::error::Result;
use rustls::ClientConfig;
use std::time::Duration;

pub use tls::new_tls_config;

/// HTTP client shared by every border client call
///
/// # Errors
///
/// Will return `Err` if the client cannot be built from `tls`
pub fn new_http_client(tls: ClientConfig, timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .timeout(timeout)
        .user_agent(crate::k8s::USER_AGENT)
        .build()?;
    Ok(client)
}
