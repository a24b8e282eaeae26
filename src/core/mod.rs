//! Domain types shared by the translation and synchronization pipelines.
pub mod event;
pub mod server_update_event;
pub mod upstream_server;

pub use event::{EventType, ResourceEvent};
pub use server_update_event::{ServerUpdateEvent, ServerUpdateEvents};
pub use upstream_server::{UpstreamServer, UpstreamServers};
