//! Applying server snapshots to tracked rows.
//!
//! A snapshot whose checksum matches the row's last applied checksum is a
//! no-op. Otherwise bulk snapshots (page loads) apply only to idle rows,
//! so they cannot clobber a vote that is still being confirmed, and the
//! single-row refresh that confirms a vote may also apply to a row waiting
//! for exactly that refresh.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::checksum::row_checksum;
use crate::engine::VettingEngine;
use crate::error::ErrorCategory;
use crate::events::EngineEvent;
use crate::protocol::RowSnapshot;
use crate::row::Row;
use crate::row::RowHash;
use crate::row::RowId;
use crate::row::RowView;
use crate::row::TransitionState;
use crate::row::ValueHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Part of a multi-row page response.
    Bulk,
    /// A refresh of one row, typically confirming a vote.
    SingleRow,
}

impl SnapshotOrigin {
    fn admits(self, state: TransitionState) -> bool {
        match self {
            SnapshotOrigin::Bulk => state == TransitionState::Idle,
            SnapshotOrigin::SingleRow => matches!(
                state,
                TransitionState::Idle | TransitionState::AwaitingConfirmedRefresh
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied { checksum: i32 },
    /// Identical to what the row already shows.
    Unchanged,
    /// The row was busy; the snapshot was discarded.
    Dropped { state: TransitionState },
}

/// Per-row results of one bulk application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub applied: Vec<RowId>,
    pub unchanged: Vec<RowId>,
    pub dropped: Vec<RowId>,
    /// Rows seen for the first time, also listed under `applied`.
    pub tracked: Vec<RowId>,
}

impl Row {
    pub(crate) fn apply_snapshot(
        &mut self,
        snapshot: RowSnapshot,
        origin: SnapshotOrigin,
    ) -> ApplyOutcome {
        let checksum = row_checksum(&snapshot);
        if self.checksum() == Some(checksum) {
            return ApplyOutcome::Unchanged;
        }
        if !origin.admits(self.state()) {
            return ApplyOutcome::Dropped {
                state: self.state(),
            };
        }
        let view = derive_view(&snapshot);
        if origin == SnapshotOrigin::Bulk {
            self.clear_flags();
        }
        self.install(snapshot, checksum, view);
        ApplyOutcome::Applied { checksum }
    }
}

/// Compute the derived view, logging any inconsistency in the snapshot.
pub fn derive_view(snapshot: &RowSnapshot) -> RowView {
    let winning = consistent_winner(snapshot);
    let winning_value = winning
        .as_ref()
        .and_then(|hash| snapshot.items.get(hash))
        .map(|item| item.value.clone());
    let by_input_value = snapshot
        .items
        .iter()
        .map(|(hash, item)| (item.input_value().to_string(), hash.clone()))
        .collect::<BTreeMap<_, _>>();
    RowView {
        winning,
        winning_value,
        user_vote: snapshot.vote_vhash.clone(),
        by_input_value,
    }
}

/// The winning candidate, if the snapshot names one that exists.
fn consistent_winner(snapshot: &RowSnapshot) -> Option<ValueHash> {
    let category = ErrorCategory::Consistency.as_str();
    let Some(winning) = &snapshot.winning_vhash else {
        tracing::error!(row = %snapshot.xpstrid, category, "row has no winning value hash");
        return None;
    };
    if snapshot.items.is_empty() {
        tracing::error!(row = %snapshot.xpstrid, category, "row has no candidate items");
        return None;
    }
    if !snapshot.items.contains_key(winning) {
        tracing::error!(
            row = %snapshot.xpstrid,
            winning = %winning,
            category,
            "row names a winning value hash with no matching item"
        );
        return None;
    }
    Some(winning.clone())
}

impl VettingEngine {
    /// Apply one snapshot to the row it names, tracking the row if new.
    pub fn apply_row_snapshot(
        &self,
        row_hash: &RowHash,
        snapshot: RowSnapshot,
        origin: SnapshotOrigin,
    ) -> ApplyOutcome {
        let row_id = snapshot.xpstrid.clone();
        self.apply_to_row(&row_id, row_hash, snapshot, origin)
    }

    pub(crate) fn apply_to_row(
        &self,
        row_id: &RowId,
        row_hash: &RowHash,
        snapshot: RowSnapshot,
        origin: SnapshotOrigin,
    ) -> ApplyOutcome {
        let outcome = self.ctx.rows().with_rows(|rows| {
            let row = rows
                .entry(row_id.clone())
                .or_insert_with(|| Row::new(row_id.clone(), row_hash.clone()));
            let outcome = row.apply_snapshot(snapshot, origin);
            if matches!(outcome, ApplyOutcome::Applied { .. }) {
                row.set_row_hash(row_hash.clone());
            }
            outcome
        });
        self.report_outcome(row_id, origin, outcome);
        outcome
    }

    /// Apply every row of a page response.
    pub fn apply_bulk_snapshot(&self, rows: BTreeMap<RowHash, RowSnapshot>) -> BulkReport {
        let mut report = BulkReport::default();
        for (row_hash, snapshot) in rows {
            let row_id = snapshot.xpstrid.clone();
            if !self.ctx.rows().contains(&row_id) {
                report.tracked.push(row_id.clone());
            }
            match self.apply_to_row(&row_id, &row_hash, snapshot, SnapshotOrigin::Bulk) {
                ApplyOutcome::Applied { .. } => report.applied.push(row_id),
                ApplyOutcome::Unchanged => report.unchanged.push(row_id),
                ApplyOutcome::Dropped { .. } => report.dropped.push(row_id),
            }
        }
        tracing::debug!(
            applied = report.applied.len(),
            unchanged = report.unchanged.len(),
            dropped = report.dropped.len(),
            tracked = report.tracked.len(),
            "bulk snapshot applied"
        );
        report
    }

    fn report_outcome(&self, row_id: &RowId, origin: SnapshotOrigin, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied { checksum } => {
                tracing::debug!(row = %row_id, checksum, ?origin, "snapshot applied");
                self.ctx.events().emit(EngineEvent::RowApplied {
                    row_id: row_id.clone(),
                    checksum,
                    origin,
                });
            }
            ApplyOutcome::Unchanged => {
                tracing::trace!(row = %row_id, ?origin, "snapshot unchanged");
            }
            ApplyOutcome::Dropped { state } => {
                tracing::warn!(
                    row = %row_id,
                    state = state.as_str(),
                    ?origin,
                    "snapshot dropped for busy row"
                );
                self.ctx.events().emit(EngineEvent::SnapshotDropped {
                    row_id: row_id.clone(),
                    state,
                });
            }
        }
    }
}
