//! Liveness, readiness and startup endpoints.
//!
//! The checks only read atomic flags, so they answer immediately whatever
//! the pipeline queues are doing.
use crate::error::Result;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const LIVEZ_PATH: &str = "/livez";
pub const READYZ_PATH: &str = "/readyz";
pub const STARTUPZ_PATH: &str = "/startupz";

const OK: &str = "OK";
const NOT_AVAILABLE: &str = "Service Not Available";

#[derive(Debug, Default)]
pub struct HealthChecker {
    ready: AtomicBool,
    started: AtomicBool,
}

impl HealthChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process answers, so it is live
    #[must_use]
    pub const fn is_live(&self) -> bool {
        true
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Called once the watcher has seen the initial state of the cluster
    pub fn mark_ready(&self) {
        self.started.store(true, Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }
}

fn respond(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn check(passed: bool) -> Response<Full<Bytes>> {
    if passed {
        respond(StatusCode::OK, OK)
    } else {
        respond(StatusCode::SERVICE_UNAVAILABLE, NOT_AVAILABLE)
    }
}

/// Answer a probe request for `path`
#[must_use]
pub fn route(checker: &HealthChecker, path: &str) -> Response<Full<Bytes>> {
    match path {
        LIVEZ_PATH => check(checker.is_live()),
        READYZ_PATH => check(checker.is_ready()),
        STARTUPZ_PATH => check(checker.is_started()),
        _ => respond(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Serve probes from `listener` until `cancel` fires
pub async fn serve(listener: TcpListener, checker: Arc<HealthChecker>, cancel: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Health server accept failed: {}", e);
                    continue;
                }
            },
        };

        let checker = checker.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let response = route(&checker, request.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Health connection from {} ended: {}", peer, e);
            }
        });
    }
}

pub struct HealthServer {
    checker: Arc<HealthChecker>,
    port: u16,
}

impl HealthServer {
    #[must_use]
    pub const fn new(checker: Arc<HealthChecker>, port: u16) -> Self {
        Self { checker, port }
    }

    /// # Errors
    ///
    /// Will return `Err` if the port cannot be bound
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        info!("🩺 Health endpoints listening on {}", addr);

        serve(listener, self.checker.clone(), cancel).await;
        Ok(())
    }
}
