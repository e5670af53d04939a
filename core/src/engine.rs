use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config_types::EngineConfig;
use crate::context::EngineContext;
use crate::error::Result;
use crate::error::TransportError;
use crate::events::EngineEvent;
use crate::queue::QueueEntry;
use crate::queue::RequestResult;
use crate::row::Row;
use crate::row::RowHash;
use crate::row::RowId;
use crate::transport::HttpTransport;
use crate::transport::RequestDescriptor;
use crate::transport::Transport;
use crate::transport::TransportResponse;

/// Handle to a vetting engine. Cheap to clone; clones share one context.
///
/// Vote submission lives in `vote.rs`, snapshot application in
/// `reconcile.rs`, single-row refresh in `refresh.rs`, page loads in
/// `page.rs` and status handling in `status.rs`.
#[derive(Debug, Clone)]
pub struct VettingEngine {
    pub(crate) ctx: Arc<EngineContext>,
}

impl VettingEngine {
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx: EngineContext::create(config, transport),
        }
    }

    /// Engine talking HTTP to `config.base_url`.
    pub fn connect(config: EngineConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn from_context(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        self.ctx.config()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.ctx.events().subscribe()
    }

    /// Votes are outstanding, or one started or finished within the quiet
    /// interval.
    pub fn is_busy(&self) -> bool {
        self.ctx.tracker().is_busy()
    }

    pub fn is_disconnected(&self) -> bool {
        self.ctx.link().is_disconnected()
    }

    /// Queue a request with completion callbacks.
    pub fn enqueue(
        &self,
        request: RequestDescriptor,
        on_success: impl FnOnce(TransportResponse) + Send + 'static,
        on_error: impl FnOnce(TransportError) + Send + 'static,
    ) {
        self.ctx
            .queue()
            .enqueue(QueueEntry::new(request, on_success, on_error));
    }

    pub async fn send_now(&self, request: RequestDescriptor) -> RequestResult {
        self.ctx.queue().send_now(request).await
    }

    /// Start tracking a row the caller already knows about.
    pub fn track_row(&self, row_id: RowId, row_hash: RowHash) -> bool {
        self.ctx.rows().track(row_id, row_hash)
    }

    pub fn row(&self, row_id: &RowId) -> Option<Row> {
        self.ctx.rows().get(row_id)
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.ctx.rows().ids()
    }

    /// Enter the disconnected state, halting queued dispatch.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.ctx.link().disconnect(reason.clone()) {
            tracing::warn!(
                reason = %reason,
                pending = self.ctx.queue().len(),
                "disconnected from server"
            );
            self.ctx.events().emit(EngineEvent::Disconnected { reason });
        }
    }

    /// Leave the disconnected state and resume queued dispatch.
    pub fn reconnect(&self) {
        if self.ctx.link().reconnect() {
            tracing::info!("reconnected to server");
            self.ctx.queue().resume();
            self.ctx.events().emit(EngineEvent::Reconnected);
        }
    }

    /// Drop all queued requests, failing each with `Dropped`.
    pub fn clear_queue(&self) -> usize {
        self.ctx.queue().clear()
    }

    pub fn reset(&self) {
        self.ctx.reset();
    }
}
