pub mod cache;
pub mod client;
pub mod nodes;
pub mod watcher;

/// User agent sent with every Kubernetes API call, e.g. `edgesync/0.4.2`
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
