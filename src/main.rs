use clap::Parser;
use edgesync::handler::Handler;
use edgesync::k8s::cache::ResourceCache;
use edgesync::k8s::watcher::Watcher;
use edgesync::k8s::{USER_AGENT, client};
use edgesync::probation::{HealthChecker, HealthServer};
use edgesync::settings::{Args, Settings};
use edgesync::synchronizer::Synchronizer;
use edgesync::translator::Translator;
use edgesync::{logging, net};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let settings = Arc::new(Settings::try_from_args(&args)?);
    info!(
        "🚀 {} starting: {} NGINX hosts, tls={:?}",
        USER_AGENT,
        settings.nginx_hosts.len(),
        settings.tls_mode
    );

    let tls = net::new_tls_config(settings.tls_mode, &settings.certificates)?;
    let http_client = net::new_http_client(tls, settings.request_timeout)?;
    let k8s_client = client::new(Some(USER_AGENT)).await?;

    let cache = Arc::new(ResourceCache::new());
    let synchronizer = Arc::new(Synchronizer::new(settings.clone(), http_client));
    let handler = Arc::new(Handler::new(
        settings.clone(),
        Translator::new(cache.clone()),
        synchronizer.clone(),
    ));
    let health = Arc::new(HealthChecker::new());
    let watcher = Watcher::new(k8s_client, settings.clone(), cache, handler.clone(), health.clone());
    let health_server = HealthServer::new(health, settings.health_port);

    let cancel = CancellationToken::new();
    let synchronizer_cancel = CancellationToken::new();

    let synchronizer_task = tokio::spawn(synchronizer.run(synchronizer_cancel.clone()));
    let handler_task = tokio::spawn(handler.run(cancel.clone()));
    let health_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { health_server.run(cancel).await })
    };

    let signal = {
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            info!("🛑 Shutdown requested");
            cancel.cancel();
        }
    };

    let watched = tokio::select! {
        result = watcher.run(cancel.clone()) => result,
        () = signal => Ok(()),
    };
    cancel.cancel();

    // The handler drains into the synchronizer, so it stops first.
    handler_task.await?;
    synchronizer_cancel.cancel();
    synchronizer_task.await?;
    health_task.await??;

    watched?;
    info!("👋 Stopped");
    Ok(())
}
