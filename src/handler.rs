/**
 * Inbound side of the pipeline
 *
 * Receives resource events from the watcher on a rate limited queue,
 * translates them, and hands the results to the synchronizer.
 */
use crate::core::ResourceEvent;
use crate::settings::Settings;
use crate::synchronizer::Synchronizer;
use crate::translator::Translator;
use crate::workqueue::WorkQueue;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Handler {
    settings: Arc<Settings>,
    queue: WorkQueue<ResourceEvent>,
    translator: Translator,
    synchronizer: Arc<Synchronizer>,
}

impl Handler {
    #[must_use]
    pub fn new(settings: Arc<Settings>, translator: Translator, synchronizer: Arc<Synchronizer>) -> Self {
        let queue_settings = &settings.handler.work_queue;
        let queue = WorkQueue::new(
            queue_settings.name.clone(),
            queue_settings.rate_limiter_base,
            queue_settings.rate_limiter_max,
        );

        Self {
            settings,
            queue,
            translator,
            synchronizer,
        }
    }

    /// The inbound queue
    #[must_use]
    pub const fn queue(&self) -> &WorkQueue<ResourceEvent> {
        &self.queue
    }

    /// Entry point for the watcher; safe to call from concurrent callbacks
    pub fn add_rate_limited_event(&self, event: ResourceEvent) {
        debug!("Handler::add_rate_limited_event: {} {}", event.event_type, event.key());
        self.queue.add_rate_limited(event);
    }

    /// Consume events until `cancel` fires, then drain the queue
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let threads = self.settings.handler.threads.max(1);
        info!("🚀 Handler started ({} consumers)", threads);

        let mut consumers = JoinSet::new();
        for _ in 0..threads {
            let this = self.clone();
            consumers.spawn(async move { this.consume().await });
        }

        cancel.cancelled().await;
        self.shut_down().await;

        while consumers.join_next().await.is_some() {}
        info!("🛑 Handler stopped");
    }

    /// Finish in-flight events and refuse further adds
    pub async fn shut_down(&self) {
        self.queue.shut_down_with_drain().await;
    }

    async fn consume(&self) {
        while let Some(event) = self.queue.get().await {
            self.handle_event(&event);
            self.queue.done(&event);
        }
    }

    // Translation failures are data-shape problems; retrying cannot fix them.
    fn handle_event(&self, event: &ResourceEvent) {
        match self.translator.translate(event) {
            Ok(server_update_events) => {
                debug!(
                    "Handler::handle_event: {} {} -> {} server updates",
                    event.event_type,
                    event.key(),
                    server_update_events.len()
                );
                self.synchronizer.add_events(&server_update_events);
            }
            Err(err) => {
                error!(
                    "❌ Handler::handle_event: failed to translate {} {}: {}",
                    event.event_type,
                    event.key(),
                    err
                );
            }
        }
        self.queue.forget(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventType;
    use crate::k8s::cache::ResourceCache;
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use kube::api::ObjectMeta;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    fn service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some("1".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("nlk-tea".to_string()),
                    port: 80,
                    node_port: Some(30080),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    fn handler(hosts: &[&str]) -> (Arc<Handler>, Arc<Synchronizer>) {
        let mut settings = Settings::default();
        settings.nginx_hosts = hosts.iter().map(ToString::to_string).collect();
        settings.synchronizer.min_jitter_ms = 0;
        settings.synchronizer.max_jitter_ms = 0;
        settings.handler.work_queue.rate_limiter_base = Duration::from_millis(1);
        let settings = Arc::new(settings);

        let synchronizer = Arc::new(Synchronizer::with_rng(
            settings.clone(),
            reqwest::Client::new(),
            StdRng::seed_from_u64(1),
        ));
        let translator = Translator::new(Arc::new(ResourceCache::new()));
        let handler = Arc::new(Handler::new(settings, translator, synchronizer.clone()));
        (handler, synchronizer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_events_collapse() {
        let (handler, _) = handler(&[]);
        let nodes = vec!["10.0.0.1".to_string()];

        handler.queue().add(ResourceEvent::new(EventType::Created, service("web"), None, nodes.clone()));
        handler.queue().add(ResourceEvent::new(EventType::Created, service("web"), None, nodes));

        assert_eq!(handler.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_translated_events_reach_the_synchronizer() {
        let (handler, synchronizer) = handler(&["http://nginx-a/api", "http://nginx-b/api"]);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(handler.clone().run(cancel.clone()));

        handler.add_rate_limited_event(ResourceEvent::new(
            EventType::Created,
            service("web"),
            None,
            vec!["10.0.0.1".to_string()],
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(synchronizer.queue().len(), 2);

        cancel.cancel();
        run.await.unwrap();
        assert!(handler.queue().is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_translation_failure_is_not_retried() {
        let (handler, synchronizer) = handler(&["http://nginx-a/api"]);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(handler.clone().run(cancel.clone()));

        let nameless = ResourceEvent::new(EventType::Created, Service::default(), None, vec![]);
        handler.add_rate_limited_event(nameless.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handler.queue().len(), 0);
        assert_eq!(handler.queue().num_requeues(&nameless), 0);
        assert_eq!(synchronizer.queue().len(), 0);

        cancel.cancel();
        run.await.unwrap();
    }
}
