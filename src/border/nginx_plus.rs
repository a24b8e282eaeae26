//! Minimal NGINX Plus REST API client covering upstream server management.
//!
//! Only the calls the border clients need are implemented: list, add and
//! remove servers of an HTTP or stream upstream.
use crate::error::{Error, Result};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// NGINX Plus API version spoken by this client
pub const API_VERSION: u32 = 8;

/// Server entry of an HTTP upstream, as the API represents it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpUpstreamServer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fails: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down: Option<bool>,
}

impl HttpUpstreamServer {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            id: None,
            server: server.into(),
            weight: None,
            max_fails: None,
            fail_timeout: None,
            down: None,
        }
    }
}

/// Server entry of a stream (TCP/UDP) upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUpstreamServer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fails: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down: Option<bool>,
}

impl StreamUpstreamServer {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            id: None,
            server: server.into(),
            weight: None,
            max_fails: None,
            down: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    text: String,
}

/// Upstream context on the NGINX Plus API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Http,
    Stream,
}

impl Context {
    const fn path(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Stream => "stream",
        }
    }
}

/// Outcome of reconciling an upstream to a desired server set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamChanges {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

/// Client bound to one NGINX Plus API endpoint, e.g. `http://10.0.0.5:9000/api`
#[derive(Debug, Clone)]
pub struct NginxClient {
    http: Client,
    endpoint: String,
}

impl NginxClient {
    #[must_use]
    pub fn new(http: Client, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `{endpoint}/8/{context}/upstreams/{upstream}/servers[/{id}]`, each
    /// appended segment percent-encoded
    fn servers_url(&self, context: Context, upstream: &str, id: Option<i64>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Custom(format!("invalid NGINX Plus endpoint '{}': {e}", self.endpoint)))?;
        let version = API_VERSION.to_string();
        let id = id.map(|id| id.to_string());

        let mut segments = url.path_segments_mut().map_err(|()| {
            Error::Custom(format!("NGINX Plus endpoint '{}' cannot carry a path", self.endpoint))
        })?;
        segments
            .pop_if_empty()
            .extend([version.as_str(), context.path(), "upstreams", upstream, "servers"]);
        if let Some(id) = &id {
            segments.push(id);
        }
        drop(segments);

        Ok(url)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = k8s_openapi::serde_json::from_str::<ApiErrorBody>(&body)
            .map_or(body, |parsed| parsed.error.text);

        Err(Error::NginxApi {
            status: status.as_u16(),
            message,
        })
    }

    async fn list<S: for<'de> Deserialize<'de>>(&self, context: Context, upstream: &str) -> Result<Vec<S>> {
        let response = self.http.get(self.servers_url(context, upstream, None)?).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn add<S: Serialize + Sync>(&self, context: Context, upstream: &str, server: &S) -> Result<()> {
        let response = self
            .http
            .post(self.servers_url(context, upstream, None)?)
            .json(server)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn remove(&self, context: Context, upstream: &str, id: i64) -> Result<()> {
        let url = self.servers_url(context, upstream, Some(id))?;
        let response = self.http.delete(url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Will return `Err` if the API cannot be reached or rejects the call
    pub async fn get_http_servers(&self, upstream: &str) -> Result<Vec<HttpUpstreamServer>> {
        self.list(Context::Http, upstream).await
    }

    /// # Errors
    ///
    /// Will return `Err` if the API cannot be reached or rejects the call
    pub async fn get_stream_servers(&self, upstream: &str) -> Result<Vec<StreamUpstreamServer>> {
        self.list(Context::Stream, upstream).await
    }

    /// Make the HTTP upstream contain exactly `servers`
    ///
    /// # Errors
    ///
    /// Will return `Err` on the first API call that fails
    pub async fn update_http_servers(
        &self,
        upstream: &str,
        servers: &[HttpUpstreamServer],
    ) -> Result<UpstreamChanges> {
        let existing = self.get_http_servers(upstream).await?;
        let current: Vec<(Option<i64>, &str)> =
            existing.iter().map(|s| (s.id, s.server.as_str())).collect();
        let desired: Vec<&str> = servers.iter().map(|s| s.server.as_str()).collect();

        let (to_add, to_delete) = diff(&current, &desired);

        let mut changes = UpstreamChanges::default();
        let mut posted = HashSet::new();
        for server in servers
            .iter()
            .filter(|s| to_add.contains(s.server.as_str()) && posted.insert(s.server.as_str()))
        {
            self.add(Context::Http, upstream, &HttpUpstreamServer { id: None, ..server.clone() })
                .await?;
            changes.added.push(server.server.clone());
        }
        for (id, server) in to_delete {
            self.remove(Context::Http, upstream, id).await?;
            changes.deleted.push(server);
        }

        debug!(
            "NginxClient: http upstream '{}' on {}: +{} -{}",
            upstream,
            self.endpoint,
            changes.added.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    /// Make the stream upstream contain exactly `servers`
    ///
    /// # Errors
    ///
    /// Will return `Err` on the first API call that fails
    pub async fn update_stream_servers(
        &self,
        upstream: &str,
        servers: &[StreamUpstreamServer],
    ) -> Result<UpstreamChanges> {
        let existing = self.get_stream_servers(upstream).await?;
        let current: Vec<(Option<i64>, &str)> =
            existing.iter().map(|s| (s.id, s.server.as_str())).collect();
        let desired: Vec<&str> = servers.iter().map(|s| s.server.as_str()).collect();

        let (to_add, to_delete) = diff(&current, &desired);

        let mut changes = UpstreamChanges::default();
        let mut posted = HashSet::new();
        for server in servers
            .iter()
            .filter(|s| to_add.contains(s.server.as_str()) && posted.insert(s.server.as_str()))
        {
            self.add(Context::Stream, upstream, &StreamUpstreamServer { id: None, ..server.clone() })
                .await?;
            changes.added.push(server.server.clone());
        }
        for (id, server) in to_delete {
            self.remove(Context::Stream, upstream, id).await?;
            changes.deleted.push(server);
        }

        debug!(
            "NginxClient: stream upstream '{}' on {}: +{} -{}",
            upstream,
            self.endpoint,
            changes.added.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    /// Remove `server` from the HTTP upstream
    ///
    /// # Errors
    ///
    /// Will return `Err` if the server is not in the upstream or the API call fails
    pub async fn delete_http_server(&self, upstream: &str, server: &str) -> Result<()> {
        let existing = self.get_http_servers(upstream).await?;
        let id = find_id(existing.iter().map(|s| (s.id, s.server.as_str())), upstream, server)?;
        self.remove(Context::Http, upstream, id).await
    }

    /// Remove `server` from the stream upstream
    ///
    /// # Errors
    ///
    /// Will return `Err` if the server is not in the upstream or the API call fails
    pub async fn delete_stream_server(&self, upstream: &str, server: &str) -> Result<()> {
        let existing = self.get_stream_servers(upstream).await?;
        let id = find_id(existing.iter().map(|s| (s.id, s.server.as_str())), upstream, server)?;
        self.remove(Context::Stream, upstream, id).await
    }
}

/// Addresses to add, and `(id, address)` pairs to delete, to turn `current` into `desired`
fn diff<'a>(
    current: &[(Option<i64>, &str)],
    desired: &[&'a str],
) -> (HashSet<&'a str>, Vec<(i64, String)>) {
    let present: HashSet<&str> = current.iter().map(|(_, server)| *server).collect();
    let wanted: HashSet<&str> = desired.iter().copied().collect();

    let to_add = desired
        .iter()
        .copied()
        .filter(|server| !present.contains(server))
        .collect();

    let to_delete = current
        .iter()
        .filter(|(_, server)| !wanted.contains(server))
        .filter_map(|(id, server)| id.map(|id| (id, (*server).to_string())))
        .collect();

    (to_add, to_delete)
}

fn find_id<'a>(
    mut servers: impl Iterator<Item = (Option<i64>, &'a str)>,
    upstream: &str,
    server: &str,
) -> Result<i64> {
    servers
        .find(|(_, address)| *address == server)
        .and_then(|(id, _)| id)
        .ok_or_else(|| Error::ServerNotFound {
            upstream: upstream.to_string(),
            server: server.to_string(),
        })
}
