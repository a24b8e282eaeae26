/**
 * K8s Service watcher
 *
 * Watches Services cluster-wide and turns each change into a resource event
 * for the handler. The resource cache is written here, before the event is
 * queued, so the translator always finds the state a deletion needs.
 */
use super::cache::{ResourceCache, ResourceKey};
use super::nodes::list_node_addresses;
use crate::core::{EventType, ResourceEvent};
use crate::error::Result;
use crate::handler::Handler;
use crate::probation::HealthChecker;
use crate::settings::Settings;
use futures::{TryStreamExt, pin_mut};
use k8s_openapi::api::core::v1::Service;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Watcher {
    client: Client,
    settings: Arc<Settings>,
    cache: Arc<ResourceCache>,
    handler: Arc<Handler>,
    health: Arc<HealthChecker>,
}

impl Watcher {
    #[must_use]
    pub const fn new(
        client: Client,
        settings: Arc<Settings>,
        cache: Arc<ResourceCache>,
        handler: Arc<Handler>,
        health: Arc<HealthChecker>,
    ) -> Self {
        Self {
            client,
            settings,
            cache,
            handler,
            health,
        }
    }

    fn watcher_config(&self) -> watcher::Config {
        let config = watcher::Config::default();
        match &self.settings.watcher.label_selector {
            Some(selector) => config.labels(selector),
            None => config,
        }
    }

    /// Watch Services until `cancel` fires.
    ///
    /// Stream errors are retried with the watcher's default backoff.
    ///
    /// # Errors
    ///
    /// This method does not currently fail; errors from the watch stream are
    /// logged and retried
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let services: Api<Service> = Api::all(self.client.clone());
        let stream = watcher(services, self.watcher_config()).default_backoff();
        pin_mut!(stream);

        info!("🔍 Starting Service watcher");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("🔍 Service watcher shutting down");
                    break;
                }
                next = stream.try_next() => match next {
                    Ok(Some(event)) => self.on_event(event).await,
                    Ok(None) => {
                        warn!("🔍 Service watcher stream ended");
                        break;
                    }
                    Err(e) => warn!("❌ Service watcher error, backing off: {}", e),
                }
            }
        }

        Ok(())
    }

    async fn on_event(&self, event: watcher::Event<Service>) {
        match event {
            watcher::Event::Init => debug!("🔍 Service watcher (re)listing"),
            watcher::Event::InitApply(service) | watcher::Event::Apply(service) => {
                self.on_apply(service).await;
            }
            watcher::Event::InitDone => {
                info!("🔍 Service watcher initial list complete");
                self.health.mark_ready();
            }
            watcher::Event::Delete(service) => self.on_delete(service),
        }
    }

    async fn on_apply(&self, service: Service) {
        let Some(key) = ResourceKey::of(&service) else {
            warn!("Watcher: ignoring Service without a name");
            return;
        };

        let node_addresses = match list_node_addresses(self.client.clone()).await {
            Ok(addresses) => addresses,
            Err(e) => {
                // an empty node set would strip every server from the upstreams
                match self.cache.get(&key) {
                    Some(cached) => {
                        warn!(
                            "Watcher: failed to list nodes for {} ({}), reusing last known addresses",
                            key, e
                        );
                        cached.node_addresses
                    }
                    None => {
                        error!("❌ Watcher: failed to list nodes for {}, skipping: {}", key, e);
                        return;
                    }
                }
            }
        };

        let previous = self
            .cache
            .put(key.clone(), service.clone(), node_addresses.clone());
        let event_type = if previous.is_some() {
            EventType::Updated
        } else {
            EventType::Created
        };

        debug!("Watcher: {} {}/{}", event_type, key.namespace, service.name_any());
        self.handler.add_rate_limited_event(ResourceEvent::new(
            event_type,
            service,
            previous.map(|cached| cached.service),
            node_addresses,
        ));
    }

    fn on_delete(&self, service: Service) {
        if ResourceKey::of(&service).is_none() {
            warn!("Watcher: ignoring deleted Service without a name");
            return;
        }

        info!(
            "🗑️  Service deleted: {}/{}",
            service.namespace().unwrap_or_default(),
            service.name_any()
        );
        self.handler
            .add_rate_limited_event(ResourceEvent::new(EventType::Deleted, service, None, Vec::new()));
    }
}
