//! Keeps NGINX Plus upstream server lists in step with the nodes and node
//! ports of annotated Kubernetes Services.
pub mod border;
pub mod core;
pub mod error;
pub mod handler;
pub mod k8s;
pub mod logging;
pub mod net;
pub mod probation;
pub mod settings;
pub mod synchronizer;
pub mod translator;
pub mod workqueue;

pub use error::{Error, Result};
