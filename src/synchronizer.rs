/**
 * Border server synchronization
 *
 * Fans each translated update out to every configured border server, spreads
 * the writes with random jitter, and applies them from a pool of workers with
 * per-(host, event) retry and backoff.
 */
use crate::border::{BorderClient, NginxClient, new_border_client};
use crate::core::{EventType, ServerUpdateEvent};
use crate::error::Result;
use crate::settings::Settings;
use crate::workqueue::WorkQueue;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a shutdown waits for in-flight border calls before abandoning them
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const ID_TOKEN_LENGTH: usize = 8;

pub struct Synchronizer {
    settings: Arc<Settings>,
    http_client: reqwest::Client,
    queue: WorkQueue<ServerUpdateEvent>,
    rng: Mutex<StdRng>,
    hard_stop: CancellationToken,
}

impl Synchronizer {
    #[must_use]
    pub fn new(settings: Arc<Settings>, http_client: reqwest::Client) -> Self {
        Self::with_rng(settings, http_client, StdRng::from_entropy())
    }

    /// Like `new`, with a caller-seeded random source for jitter and ids
    #[must_use]
    pub fn with_rng(settings: Arc<Settings>, http_client: reqwest::Client, rng: StdRng) -> Self {
        let queue_settings = &settings.synchronizer.work_queue;
        let queue = WorkQueue::new(
            queue_settings.name.clone(),
            queue_settings.rate_limiter_base,
            queue_settings.rate_limiter_max,
        );

        Self {
            settings,
            http_client,
            queue,
            rng: Mutex::new(rng),
            hard_stop: CancellationToken::new(),
        }
    }

    /// The outbound queue
    #[must_use]
    pub const fn queue(&self) -> &WorkQueue<ServerUpdateEvent> {
        &self.queue
    }

    /// Schedule one copy of every event per configured border server
    pub fn add_events(&self, events: &[ServerUpdateEvent]) {
        let hosts = &self.settings.nginx_hosts;
        if hosts.is_empty() {
            warn!(
                "Synchronizer::add_events: no NGINX Plus hosts configured, dropping {} events",
                events.len()
            );
            return;
        }

        debug!(
            "Synchronizer::add_events: fanning {} events out to {} hosts",
            events.len(),
            hosts.len()
        );

        for (host_index, host) in hosts.iter().enumerate() {
            for (event_index, event) in events.iter().enumerate() {
                let id = self.event_id(host_index, event_index, &event.upstream_name, host);
                self.add_event(ServerUpdateEvent::with_id_and_host(event, id, host.as_str()));
            }
        }
    }

    /// Schedule a single host-bound event after a random jitter
    pub fn add_event(&self, event: ServerUpdateEvent) {
        if event.nginx_host.is_empty() {
            warn!(
                "Synchronizer::add_event: event {} has no NGINX host, dropping: {:?}",
                event.id, event
            );
            return;
        }

        let delay = self.jitter();
        debug!("Synchronizer::add_event: {} in {:?}", event.id, delay);
        self.queue.add_after(event, delay);
    }

    /// Random delay within the configured jitter bounds, inclusive
    #[must_use]
    pub fn jitter(&self) -> Duration {
        let min = self.settings.synchronizer.min_jitter_ms;
        let max = self.settings.synchronizer.max_jitter_ms.max(min);
        let millis = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(min..=max);
        Duration::from_millis(millis)
    }

    fn event_id(&self, host_index: usize, event_index: usize, upstream: &str, host: &str) -> String {
        let token: String = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            (&mut *rng)
                .sample_iter(&Alphanumeric)
                .take(ID_TOKEN_LENGTH)
                .map(char::from)
                .collect()
        };
        format!("[{host_index}]:[{event_index}]:[{token}]:[{upstream}]:[{host}]")
    }

    /// Run the worker pool until `cancel` fires, then drain the queue
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let threads = self.settings.synchronizer.threads.max(1);
        info!("🚀 Synchronizer started ({} workers)", threads);

        let mut workers = JoinSet::new();
        for worker_id in 0..threads {
            let this = self.clone();
            workers.spawn(async move { this.worker(worker_id).await });
        }

        cancel.cancelled().await;
        self.shut_down().await;

        while workers.join_next().await.is_some() {}
        info!("🛑 Synchronizer stopped");
    }

    /// Stop accepting events and finish the queued ones.
    ///
    /// Border calls still running after [`SHUTDOWN_GRACE`] are abandoned.
    pub async fn shut_down(&self) {
        if tokio::time::timeout(SHUTDOWN_GRACE, self.queue.shut_down_with_drain())
            .await
            .is_err()
        {
            warn!("Synchronizer::shut_down: drain exceeded {:?}, abandoning in-flight events", SHUTDOWN_GRACE);
            self.hard_stop.cancel();
            self.queue.shut_down_with_drain().await;
        }
    }

    async fn worker(&self, worker_id: usize) {
        debug!("Synchronizer worker {} started", worker_id);
        while let Some(event) = self.queue.get().await {
            self.handle_event(&event).await;
            self.queue.done(&event);
        }
        debug!("Synchronizer worker {} stopped", worker_id);
    }

    /// Dispatch one event and apply the retry policy to the outcome
    pub(crate) async fn handle_event(&self, event: &ServerUpdateEvent) {
        let result = tokio::select! {
            biased;
            () = self.hard_stop.cancelled() => {
                warn!("Synchronizer::handle_event: abandoning {} on shutdown", event.id);
                self.queue.forget(event);
                return;
            }
            result = self.dispatch(event) => result,
        };

        match result {
            Ok(()) => {
                debug!("✅ Synchronizer::handle_event: {} applied", event.id);
                self.queue.forget(event);
            }
            Err(err) => self.handle_error(&err, event),
        }
    }

    // TODO: surface give-ups as a metric once a telemetry sink exists
    fn handle_error(&self, err: &crate::error::Error, event: &ServerUpdateEvent) {
        let retry_count = self.settings.synchronizer.retry_count;
        let attempts = self.queue.num_requeues(event) + 1;

        if attempts < retry_count {
            info!(
                "🔄 Synchronizer::handle_event: {} failed (attempt {}/{}), retrying: {}",
                event.id, attempts, retry_count, err
            );
            self.queue.add_rate_limited(event.clone());
        } else {
            warn!(
                "💀 Synchronizer::handle_event: giving up on {} after {} attempts: {}; event: {:?}",
                event.id, attempts, err, event
            );
            self.queue.forget(event);
        }
    }

    fn border_client(&self, event: &ServerUpdateEvent) -> Box<dyn BorderClient> {
        let nginx_client = NginxClient::new(self.http_client.clone(), &event.nginx_host);
        new_border_client(&event.client_type, nginx_client).unwrap_or_else(|err| {
            warn!("Synchronizer: {}, using the null client", err);
            err.into_fallback()
        })
    }

    async fn dispatch(&self, event: &ServerUpdateEvent) -> Result<()> {
        let border_client = self.border_client(event);
        match event.event_type {
            EventType::Created | EventType::Updated => border_client.update(event).await,
            EventType::Deleted => border_client.delete(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::UpstreamServer;
    use std::collections::HashSet;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(hosts: &[&str], min_jitter: u64, max_jitter: u64, retry_count: u32) -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.nginx_hosts = hosts.iter().map(ToString::to_string).collect();
        settings.synchronizer.min_jitter_ms = min_jitter;
        settings.synchronizer.max_jitter_ms = max_jitter;
        settings.synchronizer.retry_count = retry_count;
        settings.synchronizer.work_queue.rate_limiter_base = Duration::from_millis(1);
        settings.synchronizer.work_queue.rate_limiter_max = Duration::from_millis(10);
        Arc::new(settings)
    }

    fn synchronizer(settings: Arc<Settings>) -> Synchronizer {
        Synchronizer::with_rng(settings, reqwest::Client::new(), StdRng::seed_from_u64(7))
    }

    fn event(upstream: &str) -> ServerUpdateEvent {
        ServerUpdateEvent::new(
            EventType::Created,
            upstream,
            "http",
            vec![UpstreamServer::new("10.0.0.1:30080")],
        )
    }

    async fn drain(queue: &WorkQueue<ServerUpdateEvent>) -> Vec<ServerUpdateEvent> {
        let mut items = Vec::new();
        while !queue.is_empty() {
            if let Some(item) = queue.get().await {
                queue.done(&item);
                items.push(item);
            }
        }
        items
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_events_without_hosts_enqueues_nothing() {
        let sync = synchronizer(settings(&[], 0, 0, 3));
        sync.add_events(&[event("tea"), event("coffee")]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.queue().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_events_fans_out_hosts_times_events() {
        let hosts = ["http://nginx-a/api", "http://nginx-b/api", "http://nginx-c/api"];
        let sync = synchronizer(settings(&hosts, 0, 50, 3));

        sync.add_events(&[event("tea"), event("coffee")]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let items = drain(sync.queue()).await;
        assert_eq!(items.len(), 6);

        let ids: HashSet<_> = items.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), 6, "ids must be unique");

        for item in &items {
            assert!(hosts.contains(&item.nginx_host.as_str()));
            assert!(item.id.contains(&item.upstream_name));
            assert!(item.id.contains(&item.nginx_host));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_event_without_host_is_dropped() {
        let sync = synchronizer(settings(&["http://nginx-a/api"], 0, 0, 3));
        sync.add_event(event("tea"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sync.queue().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_event_is_delayed_by_jitter() {
        let sync = synchronizer(settings(&["http://nginx-a/api"], 200, 200, 3));
        sync.add_event(ServerUpdateEvent::with_id_and_host(&event("tea"), "1", "http://nginx-a/api"));

        tokio::time::sleep(Duration::from_millis(199)).await;
        assert_eq!(sync.queue().len(), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(sync.queue().len(), 1);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let sync = synchronizer(settings(&[], 10, 20, 3));
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let jitter = sync.jitter();
            assert!(jitter >= Duration::from_millis(10));
            assert!(jitter <= Duration::from_millis(20));
            seen.insert(jitter);
        }
        assert!(seen.contains(&Duration::from_millis(10)));
        assert!(seen.contains(&Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_retried_until_retry_count() {
        let sync = synchronizer(settings(&[], 0, 0, 3));
        // nothing listens on port 1
        let failing = ServerUpdateEvent::with_id_and_host(&event("tea"), "1", "http://127.0.0.1:1/api");

        sync.handle_event(&failing).await;
        assert_eq!(sync.queue().num_requeues(&failing), 1);

        sync.handle_event(&failing).await;
        assert_eq!(sync.queue().num_requeues(&failing), 2);

        // third failure reaches the ceiling
        sync.handle_event(&failing).await;
        assert_eq!(sync.queue().num_requeues(&failing), 0);
    }

    #[tokio::test]
    async fn test_success_forgets_requeue_counter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/8/http/upstreams/tea/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/8/http/upstreams/tea/servers"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let host = format!("{}/api", server.uri());
        let sync = synchronizer(settings(&[host.as_str()], 0, 0, 3));
        let ok = ServerUpdateEvent::with_id_and_host(&event("tea"), "1", host.as_str());

        sync.queue().add_rate_limited(ok.clone());
        assert_eq!(sync.queue().num_requeues(&ok), 1);

        sync.handle_event(&ok).await;
        assert_eq!(sync.queue().num_requeues(&ok), 0);
    }

    #[tokio::test]
    async fn test_unknown_client_type_is_handled_by_null_client() {
        let sync = synchronizer(settings(&[], 0, 0, 3));
        let mut odd = ServerUpdateEvent::with_id_and_host(&event("tea"), "1", "http://127.0.0.1:1/api");
        odd.client_type = "grpc".to_string();

        sync.handle_event(&odd).await;
        assert_eq!(sync.queue().num_requeues(&odd), 0);
    }

    #[tokio::test]
    async fn test_shutdown_delivers_events_still_in_jitter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/8/http/upstreams/tea/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/8/http/upstreams/tea/servers"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let host = format!("{}/api", server.uri());
        let sync = Arc::new(synchronizer(settings(&[host.as_str()], 50, 50, 3)));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sync.clone().run(cancel.clone()));

        sync.add_events(&[event("tea")]);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let posts = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.method.as_str() == "POST")
            .count();
        assert_eq!(posts, 1);
        assert!(sync.queue().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let sync = Arc::new(synchronizer(settings(&[], 0, 0, 3)));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sync.clone().run(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(sync.queue().is_shutting_down());
    }
}
