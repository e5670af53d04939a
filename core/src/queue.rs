//! Request serializer: queued requests reach the server strictly one at a
//! time, in the order they were enqueued.
//!
//! A dispatch cycle starts after a short delay, takes the head of the queue,
//! waits for that request to finish (or time out), delivers its outcome and
//! repeats until the queue is empty. At most one cycle exists at a time.
//! While the engine is disconnected, cycles stop without draining; queued
//! requests stay put until [`RequestQueue::resume`] or
//! [`RequestQueue::clear`].

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use vetting_async_utils::BoundedExt;
use vetting_async_utils::Interrupted;
use vetting_async_utils::sleep_or_cancel;

use crate::config_types::EngineConfig;
use crate::error::TransportError;
use crate::measure_time_async;
use crate::status::ConnectionState;
use crate::sync::lock;
use crate::transport::RequestDescriptor;
use crate::transport::Transport;
use crate::transport::TransportResponse;

pub type RequestResult = Result<TransportResponse, TransportError>;
pub type OnSuccess = Box<dyn FnOnce(TransportResponse) + Send + 'static>;
pub type OnError = Box<dyn FnOnce(TransportError) + Send + 'static>;

enum Completion {
    Callbacks {
        on_success: OnSuccess,
        on_error: OnError,
    },
    Reply(oneshot::Sender<RequestResult>),
}

/// A request waiting for its turn.
pub struct QueueEntry {
    request: RequestDescriptor,
    completion: Completion,
}

impl QueueEntry {
    pub fn new(
        request: RequestDescriptor,
        on_success: impl FnOnce(TransportResponse) + Send + 'static,
        on_error: impl FnOnce(TransportError) + Send + 'static,
    ) -> Self {
        Self {
            request,
            completion: Completion::Callbacks {
                on_success: Box::new(on_success),
                on_error: Box::new(on_error),
            },
        }
    }

    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Hand the outcome to whoever is waiting. A panicking callback is
    /// logged and swallowed so the dispatch cycle keeps going.
    fn deliver(self, result: RequestResult) {
        let QueueEntry {
            request,
            completion,
        } = self;
        match completion {
            Completion::Reply(tx) => {
                let _ = tx.send(result);
            }
            Completion::Callbacks {
                on_success,
                on_error,
            } => {
                let outcome = catch_unwind(AssertUnwindSafe(move || match result {
                    Ok(response) => on_success(response),
                    Err(err) => on_error(err),
                }));
                if outcome.is_err() {
                    tracing::error!(
                        endpoint = %request.endpoint,
                        label = request.label,
                        "request callback panicked; dispatch continues"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub dispatch_delay: Duration,
    pub default_timeout: Duration,
}

impl From<&EngineConfig> for QueueSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            dispatch_delay: config.dispatch_delay(),
            default_timeout: config.request_timeout(),
        }
    }
}

struct QueueState {
    pending: VecDeque<QueueEntry>,
    cycle_scheduled: bool,
    /// Bumped on reset so a superseded cycle exits instead of dispatching.
    generation: u64,
    shutdown: CancellationToken,
}

struct QueueInner {
    transport: Arc<dyn Transport>,
    link: Arc<ConnectionState>,
    settings: QueueSettings,
    state: Mutex<QueueState>,
    dispatched: AtomicU64,
}

/// Strictly serial request queue. Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("settings", &self.inner.settings)
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl RequestQueue {
    pub fn new(
        transport: Arc<dyn Transport>,
        link: Arc<ConnectionState>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                transport,
                link,
                settings,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    cycle_scheduled: false,
                    generation: 0,
                    shutdown: CancellationToken::new(),
                }),
                dispatched: AtomicU64::new(0),
            }),
        }
    }

    /// Append a request and make sure a dispatch cycle is scheduled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, entry: QueueEntry) {
        let claimed = {
            let mut state = lock(&self.inner.state);
            state.pending.push_back(entry);
            tracing::debug!(pending = state.pending.len(), "request queued");
            claim_cycle(&mut state)
        };
        if let Some((generation, token)) = claimed {
            self.spawn_cycle(generation, token);
        }
    }

    /// Enqueue `request` and wait for its outcome.
    pub async fn submit(&self, request: RequestDescriptor) -> RequestResult {
        let (tx, rx) = oneshot::channel();
        self.enqueue(QueueEntry {
            request,
            completion: Completion::Reply(tx),
        });
        rx.await.unwrap_or(Err(TransportError::Dropped))
    }

    /// Send `request` immediately, bypassing the queue.
    ///
    /// Refused while disconnected. Still bounded by the request timeout and
    /// cancelled by a reset.
    pub async fn send_now(&self, request: RequestDescriptor) -> RequestResult {
        if self.inner.link.is_disconnected() {
            tracing::debug!(endpoint = %request.endpoint, "not sending while disconnected");
            return Err(TransportError::Disconnected);
        }
        let token = lock(&self.inner.state).shutdown.clone();
        self.inner.dispatch(&request, &token).await
    }

    /// Drop every queued request, failing each with
    /// [`TransportError::Dropped`]. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueueEntry> = lock(&self.inner.state).pending.drain(..).collect();
        let dropped = drained.len();
        if dropped > 0 {
            tracing::warn!(dropped, "request queue cleared");
        }
        for entry in drained {
            entry.deliver(Err(TransportError::Dropped));
        }
        dropped
    }

    /// Restart dispatch after a disconnect halted it.
    pub fn resume(&self) {
        let claimed = claim_cycle(&mut lock(&self.inner.state));
        if let Some((generation, token)) = claimed {
            tracing::info!(pending = self.len(), "resuming request dispatch");
            self.spawn_cycle(generation, token);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total requests handed to the transport so far.
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Cancel in-flight work, stop the running cycle and fail everything
    /// queued. The queue is usable again afterwards.
    pub(crate) fn reset(&self) -> usize {
        let (old_token, drained) = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.cycle_scheduled = false;
            let old = std::mem::replace(&mut state.shutdown, CancellationToken::new());
            let drained: Vec<QueueEntry> = state.pending.drain(..).collect();
            (old, drained)
        };
        old_token.cancel();
        let dropped = drained.len();
        for entry in drained {
            entry.deliver(Err(TransportError::Dropped));
        }
        dropped
    }

    fn spawn_cycle(&self, generation: u64, token: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_cycles(inner, generation, token));
    }
}

fn claim_cycle(state: &mut QueueState) -> Option<(u64, CancellationToken)> {
    if state.cycle_scheduled || state.pending.is_empty() {
        return None;
    }
    state.cycle_scheduled = true;
    Some((state.generation, state.shutdown.clone()))
}

impl QueueInner {
    async fn dispatch(&self, request: &RequestDescriptor, token: &CancellationToken) -> RequestResult {
        let limit = request.timeout.unwrap_or(self.settings.default_timeout);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let outcome = measure_time_async!(
            request.label,
            self.transport.execute(request).bounded(Some(limit), token),
            endpoint = request.endpoint.as_str(),
            method = request.method.as_str()
        );
        match outcome {
            Ok(result) => {
                if let Err(err) = &result {
                    tracing::warn!(
                        endpoint = %request.endpoint,
                        error = %err,
                        category = err.category().as_str(),
                        "request failed"
                    );
                }
                result
            }
            Err(Interrupted::TimedOut(limit)) => {
                tracing::warn!(
                    endpoint = %request.endpoint,
                    timeout_ms = limit.as_millis() as u64,
                    "request timed out"
                );
                Err(TransportError::Timeout(limit))
            }
            Err(Interrupted::Cancelled) => Err(TransportError::Dropped),
        }
    }
}

async fn run_cycles(inner: Arc<QueueInner>, generation: u64, token: CancellationToken) {
    loop {
        if !sleep_or_cancel(inner.settings.dispatch_delay, &token).await {
            return;
        }
        let entry = {
            let mut state = lock(&inner.state);
            if state.generation != generation {
                return;
            }
            if inner.link.is_disconnected() {
                tracing::debug!(
                    pending = state.pending.len(),
                    "dispatch halted while disconnected"
                );
                state.cycle_scheduled = false;
                return;
            }
            match state.pending.pop_front() {
                Some(entry) => entry,
                None => {
                    state.cycle_scheduled = false;
                    return;
                }
            }
        };
        let result = inner.dispatch(&entry.request, &token).await;
        entry.deliver(result);
    }
}
