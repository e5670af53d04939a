//! Fetching and applying the latest data for a single row.

use crate::engine::VettingEngine;
use crate::error::EngineError;
use crate::error::Result;
use crate::error::TransportError;
use crate::events::EngineEvent;
use crate::protocol::PageResponse;
use crate::reconcile::ApplyOutcome;
use crate::reconcile::SnapshotOrigin;
use crate::row::RowHash;
use crate::row::RowId;
use crate::transport::RequestDescriptor;

impl VettingEngine {
    /// Fetch `row_id` directly, bypassing the request queue, and apply the
    /// result as a single-row snapshot.
    ///
    /// On failure the row is marked as failed to refresh and the error is
    /// returned; the row's transition state is left alone.
    pub async fn refresh_row(&self, row_id: &RowId) -> Result<ApplyOutcome> {
        let row_hash = self
            .ctx
            .rows()
            .with_row(row_id, |row| row.row_hash().clone())
            .ok_or_else(|| EngineError::UnknownRow(row_id.clone()))?;

        let generation = self.ctx.generation();
        let request = self.single_row_request(row_id, &row_hash);
        let fetched = self
            .ctx
            .queue()
            .send_now(request)
            .await
            .and_then(|response| response.decode::<PageResponse>());
        if self.ctx.generation() != generation {
            tracing::debug!(row = %row_id, "engine reset during refresh; discarding result");
            return Err(TransportError::Dropped.into());
        }
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                self.fail_refresh(row_id, format!("Error while loading: {err}"));
                return Err(err.into());
            }
        };

        let mut rows = page.section.rows;
        let Some(snapshot) = rows.remove(&row_hash) else {
            let err = EngineError::RowMissing {
                row_id: row_id.clone(),
                row_hash,
            };
            self.fail_refresh(row_id, err.to_string());
            return Err(err);
        };
        if &snapshot.xpstrid != row_id {
            tracing::error!(
                requested = %row_id,
                returned = %snapshot.xpstrid,
                "single-row refresh returned a different row id"
            );
        }
        Ok(self.apply_to_row(row_id, &row_hash, snapshot, SnapshotOrigin::SingleRow))
    }

    fn single_row_request(&self, row_id: &RowId, row_hash: &RowHash) -> RequestDescriptor {
        let config = self.config();
        let request = RequestDescriptor::get(format!("voting/{}/row/{}", config.locale, row_id))
            .with_query("fhash", row_hash.as_str())
            .with_timeout(config.row_refresh_timeout())
            .with_label("row-refresh");
        if config.dashboard {
            request.with_query("dashboard", "true")
        } else {
            request
        }
    }

    fn fail_refresh(&self, row_id: &RowId, message: String) {
        tracing::warn!(row = %row_id, message = %message, "row refresh failed");
        self.ctx
            .rows()
            .with_row(row_id, |row| row.mark_refresh_failed(message.clone()));
        self.ctx.events().emit(EngineEvent::RowFailed {
            row_id: row_id.clone(),
            message,
        });
    }
}
