//! Bulk page loads.

use crate::engine::VettingEngine;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::protocol::PageResponse;
use crate::reconcile::BulkReport;
use crate::row::PageId;
use crate::transport::RequestDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadDecision {
    Reloaded(BulkReport),
    /// Votes are settling; try again later.
    Deferred,
    NoCurrentPage,
    Disconnected,
}

impl VettingEngine {
    /// Load `page` through the request queue and apply its rows as a bulk
    /// snapshot. The page becomes the current page.
    pub async fn load_page(&self, page: &PageId) -> Result<BulkReport> {
        self.ctx.set_current_page(page.clone());
        let config = self.config();
        let request = RequestDescriptor::get(format!("voting/{}/page/{}", config.locale, page))
            .with_timeout(config.request_timeout())
            .with_label("page");
        let response = self.ctx.queue().submit(request).await?;
        let body: PageResponse = response.decode()?;
        tracing::info!(page = %page, rows = body.section.rows.len(), "page loaded");
        Ok(self.apply_bulk_snapshot(body.section.rows))
    }

    /// Reload the current page unless votes are still settling.
    pub async fn reload_current_page(&self) -> Result<ReloadDecision> {
        if self.is_disconnected() {
            return Ok(ReloadDecision::Disconnected);
        }
        let Some(page) = self.ctx.current_page() else {
            return Ok(ReloadDecision::NoCurrentPage);
        };
        if self.is_busy() {
            tracing::warn!(
                page = %page,
                pending = self.ctx.tracker().count(),
                "votes still settling; deferring page reload"
            );
            self.ctx
                .events()
                .emit(EngineEvent::BulkReloadDeferred { page });
            return Ok(ReloadDecision::Deferred);
        }
        Ok(ReloadDecision::Reloaded(self.load_page(&page).await?))
    }
}
