use super::rate_limiter::ItemExponentialRateLimiter;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    /// Items waiting to be processed (queued, or re-added while processing)
    dirty: HashSet<T>,
    /// Items handed out by `get` and not yet `done`
    processing: HashSet<T>,
    /// Delayed adds scheduled before shutdown that have not landed yet
    pending_delayed: usize,
    shutting_down: bool,
}

impl<T> State<T> {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.processing.is_empty() && self.pending_delayed == 0
    }
}

#[derive(Debug)]
struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    item_ready: Notify,
    drained: Notify,
    rate_limiter: ItemExponentialRateLimiter<T>,
}

/// Cloneable handle to a shared work queue
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: impl Into<String>, rate_limiter_base: Duration, rate_limiter_max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    pending_delayed: 0,
                    shutting_down: false,
                }),
                item_ready: Notify::new(),
                drained: Notify::new(),
                rate_limiter: ItemExponentialRateLimiter::new(rate_limiter_base, rate_limiter_max),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // A poisoned lock only means a panic happened while the sets were being
    // edited; the sets themselves are still structurally valid.
    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue `item` unless it is already waiting
    pub fn add(&self, item: T) {
        let mut state = self.state();
        if state.shutting_down {
            debug!("{}: dropping add after shutdown", self.inner.name);
            return;
        }
        let queued = Self::push(&mut state, item);
        drop(state);
        if queued {
            self.inner.item_ready.notify_one();
        }
    }

    fn push(state: &mut State<T>, item: T) -> bool {
        if !state.dirty.insert(item.clone()) {
            return false;
        }
        if state.processing.contains(&item) {
            // re-queued by `done`
            return false;
        }
        state.queue.push_back(item);
        true
    }

    /// Queue `item` once `delay` has elapsed.
    ///
    /// A delayed add scheduled before shutdown still lands, and
    /// [`Self::shut_down_with_drain`] waits for it.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        {
            let mut state = self.state();
            if state.shutting_down {
                warn!("{}: dropping delayed add after shutdown", self.inner.name);
                return;
            }
            state.pending_delayed += 1;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.land_delayed(item);
        });
    }

    fn land_delayed(&self, item: T) {
        let mut state = self.state();
        state.pending_delayed = state.pending_delayed.saturating_sub(1);
        let queued = Self::push(&mut state, item);
        let idle = state.is_idle();
        let last_delayed_after_shutdown = state.shutting_down && state.pending_delayed == 0;
        drop(state);

        if queued {
            self.inner.item_ready.notify_one();
        }
        if last_delayed_after_shutdown {
            // consumers parked on the pending count may now finish
            self.inner.item_ready.notify_waiters();
        }
        if idle {
            self.inner.drained.notify_waiters();
        }
    }

    /// Queue `item` after its per-item backoff
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.rate_limiter.when(&item);
        self.add_after(item, delay);
    }

    /// Number of rate limited re-adds recorded for `item`
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.rate_limiter.num_requeues(item)
    }

    /// Clear the backoff history of `item`
    pub fn forget(&self, item: &T) {
        self.inner.rate_limiter.forget(item);
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue has been shut down, every queued item
    /// has been handed out and no delayed add is still pending.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // pass the wake-up on, a notify_one may have been consumed by us
                        self.inner.item_ready.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down && state.pending_delayed == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `item` as processed; re-queues it if it was added meanwhile
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);

        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.inner.item_ready.notify_one();
            return;
        }

        if state.is_idle() {
            drop(state);
            self.inner.drained.notify_waiters();
        }
    }

    /// Number of items waiting to be handed out
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Refuse new items and wake every blocked `get`
    pub fn shut_down(&self) {
        let mut state = self.state();
        if !state.shutting_down {
            debug!("{}: shutting down with {} queued", self.inner.name, state.queue.len());
        }
        state.shutting_down = true;
        drop(state);
        self.inner.item_ready.notify_waiters();
    }

    /// Shut down, then wait until every queued, delayed and in-flight item is `done`
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();

        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            {
                let state = self.state();
                if state.is_idle() {
                    return;
                }
                if !state.processing.is_empty() {
                    debug!(
                        "{}: draining {} in-flight items",
                        self.inner.name,
                        state.processing.len()
                    );
                }
            }

            if tokio::time::timeout(Duration::from_secs(1), drained).await.is_err() {
                let state = self.state();
                if !state.is_idle() {
                    warn!(
                        "{}: still draining ({} in flight, {} queued, {} delayed)",
                        self.inner.name,
                        state.processing.len(),
                        state.queue.len(),
                        state.pending_delayed
                    );
                }
            }
        }
    }
}
