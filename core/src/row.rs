//! Per-row transition state and the table of tracked rows.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;

use crate::diagnostics::Diagnostic;
use crate::protocol::CandidateItem;
use crate::protocol::RowSnapshot;
use crate::protocol::TestKind;
use crate::sync::lock;
use crate::vote::VoteChoice;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a row (the server's `xpstrid`).
    RowId
);
string_id!(
    /// Key under which the server files a row in page responses.
    RowHash
);
string_id!(
    /// Identifier of one candidate value within a row.
    ValueHash
);
string_id!(
    /// Identifier of a page of rows.
    PageId
);

/// Where a row is in the vote lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransitionState {
    Idle,
    Submitting,
    AwaitingConfirmedRefresh,
    /// A vote failed in transport. Cleared only by an explicit retry.
    Error,
}

impl TransitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionState::Idle => "idle",
            TransitionState::Submitting => "submitting",
            TransitionState::AwaitingConfirmedRefresh => "awaiting-refresh",
            TransitionState::Error => "error",
        }
    }

    /// A vote operation owns the row.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransitionState::Submitting | TransitionState::AwaitingConfirmedRefresh
        )
    }
}

/// What the row looks like apart from its data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Presentation {
    #[default]
    Normal,
    /// The vote never reached a verdict; the row content is replaced by
    /// this message until the voter retries.
    Failed { message: String },
    /// The row data could not be refreshed.
    RefreshFailed { message: String },
}

/// A vote the user has made but the server has not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub choice: VoteChoice,
    pub started_at: Instant,
}

/// Values derived from the applied snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowView {
    pub winning: Option<ValueHash>,
    pub winning_value: Option<String>,
    pub user_vote: Option<ValueHash>,
    /// Candidate lookup by the value a voter would type.
    pub by_input_value: BTreeMap<String, ValueHash>,
}

#[derive(Debug, Clone)]
pub struct Row {
    id: RowId,
    row_hash: RowHash,
    state: TransitionState,
    wait: bool,
    checksum: Option<i32>,
    snapshot: Option<RowSnapshot>,
    view: RowView,
    presentation: Presentation,
    proposal: Option<Proposal>,
    diagnostics: Vec<Diagnostic>,
    flagged_values: BTreeMap<String, TestKind>,
    applied: u64,
}

impl Row {
    pub fn new(id: RowId, row_hash: RowHash) -> Self {
        Self {
            id,
            row_hash,
            state: TransitionState::Idle,
            wait: false,
            checksum: None,
            snapshot: None,
            view: RowView::default(),
            presentation: Presentation::Normal,
            proposal: None,
            diagnostics: Vec::new(),
            flagged_values: BTreeMap::new(),
            applied: 0,
        }
    }

    pub fn id(&self) -> &RowId {
        &self.id
    }

    pub fn row_hash(&self) -> &RowHash {
        &self.row_hash
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    /// A vote operation is outstanding on this row.
    pub fn is_waiting(&self) -> bool {
        self.wait
    }

    pub fn checksum(&self) -> Option<i32> {
        self.checksum
    }

    pub fn snapshot(&self) -> Option<&RowSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn view(&self) -> &RowView {
        &self.view
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Severity marks left on candidate values by the last accepted vote.
    pub fn flagged_values(&self) -> &BTreeMap<String, TestKind> {
        &self.flagged_values
    }

    /// How many snapshots have been applied to this row.
    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    pub fn winning_item(&self) -> Option<&CandidateItem> {
        let winning = self.view.winning.as_ref()?;
        self.snapshot.as_ref()?.items.get(winning)
    }

    /// Find the candidate a voter means by `value`.
    pub fn item_by_value(&self, value: &str) -> Option<(&ValueHash, &CandidateItem)> {
        let hash = self.view.by_input_value.get(value)?;
        let item = self.snapshot.as_ref()?.items.get(hash)?;
        Some((hash, item))
    }

    pub(crate) fn begin_vote(&mut self, choice: VoteChoice) -> Result<(), TransitionState> {
        if self.wait || self.state != TransitionState::Idle {
            return Err(self.state);
        }
        self.wait = true;
        self.state = TransitionState::Submitting;
        self.proposal = Some(Proposal {
            choice,
            started_at: Instant::now(),
        });
        self.diagnostics.clear();
        Ok(())
    }

    pub(crate) fn await_refresh(&mut self) {
        if self.state == TransitionState::Submitting {
            self.state = TransitionState::AwaitingConfirmedRefresh;
        }
    }

    /// End the outstanding vote. In-flight states fall back to idle;
    /// `Error` is kept.
    pub(crate) fn release_vote(&mut self) {
        self.wait = false;
        self.proposal = None;
        if self.state.is_in_flight() {
            self.state = TransitionState::Idle;
        }
    }

    pub(crate) fn mark_failed(&mut self, message: String) {
        self.state = TransitionState::Error;
        self.presentation = Presentation::Failed { message };
    }

    pub(crate) fn mark_refresh_failed(&mut self, message: String) {
        self.presentation = Presentation::RefreshFailed { message };
    }

    pub(crate) fn record_diagnostic(&mut self, diagnostic: Diagnostic) {
        if let (Some(value), Some(kind)) = (&diagnostic.value, diagnostic.test_kind()) {
            self.flagged_values.insert(value.clone(), kind);
        }
        self.diagnostics.push(diagnostic);
    }

    /// Leave the `Error` state so the row can be voted on again.
    pub(crate) fn recover(&mut self) -> Result<(), TransitionState> {
        if self.state.is_in_flight() || self.wait {
            return Err(self.state);
        }
        self.state = TransitionState::Idle;
        self.presentation = Presentation::Normal;
        Ok(())
    }

    pub(crate) fn set_row_hash(&mut self, row_hash: RowHash) {
        self.row_hash = row_hash;
    }

    pub(crate) fn install(&mut self, snapshot: RowSnapshot, checksum: i32, view: RowView) {
        self.snapshot = Some(snapshot);
        self.checksum = Some(checksum);
        self.view = view;
        self.presentation = Presentation::Normal;
        self.applied += 1;
    }

    pub(crate) fn clear_flags(&mut self) {
        self.flagged_values.clear();
    }
}

/// All rows the engine knows about.
#[derive(Debug, Default)]
pub struct RowTable {
    rows: Mutex<HashMap<RowId, Row>>,
}

impl RowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a row. Returns `false` if it was already tracked.
    pub fn track(&self, id: RowId, row_hash: RowHash) -> bool {
        let mut rows = lock(&self.rows);
        if rows.contains_key(&id) {
            return false;
        }
        rows.insert(id.clone(), Row::new(id, row_hash));
        true
    }

    /// A copy of the row's current state.
    pub fn get(&self, id: &RowId) -> Option<Row> {
        lock(&self.rows).get(id).cloned()
    }

    pub fn contains(&self, id: &RowId) -> bool {
        lock(&self.rows).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.rows).is_empty()
    }

    /// Tracked row ids in sorted order.
    pub fn ids(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = lock(&self.rows).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn with_row<R>(&self, id: &RowId, f: impl FnOnce(&mut Row) -> R) -> Option<R> {
        lock(&self.rows).get_mut(id).map(f)
    }

    pub(crate) fn with_rows<R>(&self, f: impl FnOnce(&mut HashMap<RowId, Row>) -> R) -> R {
        f(&mut lock(&self.rows))
    }

    pub(crate) fn clear(&self) {
        lock(&self.rows).clear();
    }
}
