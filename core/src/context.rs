//! Shared state for one engine instance.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use crate::config_types::EngineConfig;
use crate::events::EventBus;
use crate::pending::PendingTracker;
use crate::queue::QueueSettings;
use crate::queue::RequestQueue;
use crate::row::PageId;
use crate::row::RowTable;
use crate::status::ConnectionState;
use crate::status::LocaleStampGate;
use crate::sync::lock;
use crate::transport::Transport;

/// Everything the serializer, tracker, reconciler and refresher share.
///
/// Created once per engine and passed around behind an `Arc`. A reset
/// returns it to its freshly created state without replacing it, so every
/// holder observes the reset.
#[derive(Debug)]
pub struct EngineContext {
    config: EngineConfig,
    link: Arc<ConnectionState>,
    tracker: Arc<PendingTracker>,
    rows: RowTable,
    queue: RequestQueue,
    events: EventBus,
    locale_gate: LocaleStampGate,
    vote_level: AtomicU32,
    current_page: Mutex<Option<PageId>>,
    lifecycle: Mutex<CancellationToken>,
    generation: AtomicU64,
}

impl EngineContext {
    pub fn create(config: EngineConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let link = Arc::new(ConnectionState::default());
        let queue = RequestQueue::new(transport, Arc::clone(&link), QueueSettings::from(&config));
        Arc::new(Self {
            tracker: Arc::new(PendingTracker::new(config.quiet_interval())),
            events: EventBus::new(config.event_capacity),
            rows: RowTable::new(),
            locale_gate: LocaleStampGate::default(),
            vote_level: AtomicU32::new(0),
            current_page: Mutex::new(None),
            lifecycle: Mutex::new(CancellationToken::new()),
            generation: AtomicU64::new(0),
            config,
            link,
            queue,
        })
    }

    /// Cancel background work and in-flight requests, drop queued requests
    /// and forget every row.
    pub fn reset(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let old = std::mem::replace(&mut *lock(&self.lifecycle), CancellationToken::new());
        old.cancel();
        let dropped = self.queue.reset();
        self.tracker.reset();
        self.rows.clear();
        self.link.reconnect();
        self.locale_gate.reset();
        *lock(&self.current_page) = None;
        self.vote_level.store(0, Ordering::Relaxed);
        tracing::info!(dropped, generation, "engine context reset");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn link(&self) -> &Arc<ConnectionState> {
        &self.link
    }

    pub fn tracker(&self) -> &Arc<PendingTracker> {
        &self.tracker
    }

    pub fn rows(&self) -> &RowTable {
        &self.rows
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn locale_gate(&self) -> &LocaleStampGate {
        &self.locale_gate
    }

    pub fn vote_level(&self) -> u32 {
        self.vote_level.load(Ordering::Relaxed)
    }

    pub(crate) fn set_vote_level(&self, level: u32) {
        self.vote_level.store(level, Ordering::Relaxed);
    }

    pub fn current_page(&self) -> Option<PageId> {
        lock(&self.current_page).clone()
    }

    pub(crate) fn set_current_page(&self, page: PageId) {
        *lock(&self.current_page) = Some(page);
    }

    /// Number of resets so far. Work that started under an older
    /// generation must not touch rows or counters afterwards.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Token cancelled by the next reset; background tasks watch it.
    pub fn lifecycle_token(&self) -> CancellationToken {
        lock(&self.lifecycle).clone()
    }
}
