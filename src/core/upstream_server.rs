/// A single backend address on a border server upstream, e.g. `10.0.0.4:30080`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamServer {
    pub host: String,
}

impl UpstreamServer {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

/// Ordered list of upstream servers; order is kept as produced
pub type UpstreamServers = Vec<UpstreamServer>;
