//! Vote submission: claim the row, send the vote through the request
//! queue, classify the server's answer and confirm it with a single-row
//! refresh.

use std::sync::Arc;

use crate::context::EngineContext;
use crate::diagnostics::Diagnostic;
use crate::diagnostics::sanitize;
use crate::engine::VettingEngine;
use crate::error::EngineError;
use crate::error::ErrorCategory;
use crate::error::Result;
use crate::error::TransportError;
use crate::events::EngineEvent;
use crate::events::Resolution;
use crate::pending::PendingGuard;
use crate::protocol::StatusAction;
use crate::protocol::TestResult;
use crate::protocol::VoteRequest;
use crate::protocol::VoteResponse;
use crate::queue::RequestResult;
use crate::reconcile::ApplyOutcome;
use crate::row::Row;
use crate::row::RowId;
use crate::row::TransitionState;
use crate::transport::RequestDescriptor;

/// What the voter chose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteChoice {
    Value(String),
    Abstain,
    /// Vote for the value to be absent from the locale.
    Missing,
}

impl VoteChoice {
    pub fn value(&self) -> Option<&str> {
        match self {
            VoteChoice::Value(value) => Some(value),
            VoteChoice::Abstain | VoteChoice::Missing => None,
        }
    }
}

/// The server's answer to a vote, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    Accepted {
        tests: Vec<TestResult>,
        flagged: bool,
    },
    PolicyRejected {
        status_action: Option<StatusAction>,
        tests: Vec<TestResult>,
        flagged: bool,
        did_not_submit: bool,
    },
    TransportError(TransportError),
}

impl VoteOutcome {
    pub fn classify(choice: &VoteChoice, result: RequestResult) -> Self {
        let response = match result {
            Ok(response) => response,
            Err(err) => return VoteOutcome::TransportError(err),
        };
        if *choice == VoteChoice::Missing {
            return if response.status == 204 {
                VoteOutcome::Accepted {
                    tests: Vec::new(),
                    flagged: false,
                }
            } else {
                VoteOutcome::TransportError(TransportError::Status {
                    status: response.status,
                    reason: "expected no content".to_string(),
                })
            };
        }
        let body: VoteResponse = match response.decode() {
            Ok(body) => body,
            Err(err) => return VoteOutcome::TransportError(err),
        };
        if let Some(err) = body.err.as_deref().filter(|e| !e.is_empty()) {
            return VoteOutcome::TransportError(TransportError::Server(err.to_string()));
        }
        let flagged = body.has_flagged_tests();
        if body.did_vote {
            VoteOutcome::Accepted {
                tests: body.test_results,
                flagged,
            }
        } else {
            VoteOutcome::PolicyRejected {
                status_action: body.status_action(),
                did_not_submit: body.did_not_submit.as_deref().is_some_and(|s| !s.is_empty()),
                tests: body.test_results,
                flagged,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownRow,
    /// The row already has a vote outstanding or is in the error state.
    Busy(TransitionState),
}

/// How a call to [`VettingEngine::submit_vote`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteReport {
    /// Nothing was sent.
    Ignored(IgnoreReason),
    /// Accepted and the confirming refresh succeeded.
    Confirmed {
        apply: ApplyOutcome,
        diagnostic: Option<Diagnostic>,
    },
    /// The server declined the vote.
    Rejected { diagnostic: Option<Diagnostic> },
    /// The vote never got a verdict; the row is in the error state.
    Failed { error: TransportError },
    /// Accepted, but the confirming refresh failed.
    RefreshFailed { message: String },
}

/// Releases the row and the pending-operation count however the vote ends.
/// A row tracked again after a reset belongs to the new generation and is
/// left alone.
struct VoteGuard {
    ctx: Arc<EngineContext>,
    row_id: RowId,
    generation: u64,
    _pending: PendingGuard,
}

impl VoteGuard {
    fn is_stale(&self) -> bool {
        self.ctx.generation() != self.generation
    }
}

impl Drop for VoteGuard {
    fn drop(&mut self) {
        if !self.is_stale() {
            self.ctx.rows().with_row(&self.row_id, Row::release_vote);
        }
    }
}

impl VettingEngine {
    /// Submit a vote for `row_id` and wait until it is resolved.
    ///
    /// A vote on a row that is not idle is ignored without contacting the
    /// server. When this returns, the row is idle again unless the vote
    /// failed in transport, which leaves it in the error state.
    pub async fn submit_vote(&self, row_id: &RowId, choice: VoteChoice) -> VoteReport {
        let generation = self.ctx.generation();
        let claim = self
            .ctx
            .rows()
            .with_row(row_id, |row| row.begin_vote(choice.clone()));
        match claim {
            None => {
                tracing::debug!(row = %row_id, "vote ignored for unknown row");
                return VoteReport::Ignored(IgnoreReason::UnknownRow);
            }
            Some(Err(state)) => {
                tracing::debug!(row = %row_id, state = state.as_str(), "vote ignored for busy row");
                return VoteReport::Ignored(IgnoreReason::Busy(state));
            }
            Some(Ok(())) => {}
        }
        let guard = VoteGuard {
            ctx: Arc::clone(&self.ctx),
            row_id: row_id.clone(),
            generation,
            _pending: self.ctx.tracker().guard(),
        };
        tracing::debug!(row = %row_id, ?choice, "vote started");
        self.ctx.events().emit(EngineEvent::VoteStarted {
            row_id: row_id.clone(),
        });

        let result = match self.vote_request(row_id, &choice) {
            Ok(request) => self.ctx.queue().submit(request).await,
            Err(err) => Err(err),
        };
        if guard.is_stale() {
            tracing::debug!(row = %row_id, "engine reset while vote was in flight");
            return VoteReport::Failed {
                error: TransportError::Dropped,
            };
        }
        match VoteOutcome::classify(&choice, result) {
            VoteOutcome::TransportError(error) => self.vote_failed(row_id, error),
            VoteOutcome::PolicyRejected {
                status_action,
                tests,
                flagged,
                did_not_submit,
            } => {
                let diagnostic = Diagnostic::for_rejection(
                    row_id.clone(),
                    choice.value().map(str::to_string),
                    status_action,
                    tests,
                    flagged,
                    did_not_submit,
                );
                self.vote_rejected(row_id, diagnostic)
            }
            VoteOutcome::Accepted { tests, flagged } => {
                let diagnostic = Diagnostic::for_accepted(
                    row_id.clone(),
                    choice.value().map(str::to_string),
                    tests,
                    flagged,
                );
                self.vote_accepted(row_id, diagnostic, &guard).await
            }
        }
    }

    fn vote_request(
        &self,
        row_id: &RowId,
        choice: &VoteChoice,
    ) -> std::result::Result<RequestDescriptor, TransportError> {
        let endpoint = format!("voting/{}/row/{}", self.config().locale, row_id);
        let request = match choice {
            VoteChoice::Missing => RequestDescriptor::delete(endpoint),
            VoteChoice::Value(_) | VoteChoice::Abstain => {
                let body = VoteRequest {
                    value: choice.value().map(str::to_string),
                    vote_level_changed: self.ctx.vote_level(),
                };
                let payload = serde_json::to_value(&body)
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                RequestDescriptor::post(endpoint, payload)
            }
        };
        Ok(request.with_label("vote"))
    }

    fn vote_failed(&self, row_id: &RowId, error: TransportError) -> VoteReport {
        let message = format!(
            "Could not check value. Try reloading the page. {}",
            sanitize(&error.to_string())
        );
        tracing::warn!(
            row = %row_id,
            error = %error,
            category = error.category().as_str(),
            "vote failed"
        );
        self.ctx
            .rows()
            .with_row(row_id, |row| row.mark_failed(message.clone()));
        self.ctx.events().emit(EngineEvent::RowFailed {
            row_id: row_id.clone(),
            message,
        });
        self.resolved(row_id, Resolution::Failed);
        VoteReport::Failed { error }
    }

    fn vote_rejected(&self, row_id: &RowId, diagnostic: Option<Diagnostic>) -> VoteReport {
        tracing::info!(
            row = %row_id,
            category = ErrorCategory::Policy.as_str(),
            status_action = diagnostic
                .as_ref()
                .and_then(|d| d.status_action.as_ref())
                .map(|a| a.as_str().to_string()),
            "vote not accepted"
        );
        self.surface(row_id, diagnostic.as_ref());
        self.resolved(row_id, Resolution::Rejected);
        VoteReport::Rejected { diagnostic }
    }

    async fn vote_accepted(
        &self,
        row_id: &RowId,
        diagnostic: Option<Diagnostic>,
        guard: &VoteGuard,
    ) -> VoteReport {
        tracing::info!(row = %row_id, "vote accepted; confirming");
        self.ctx.rows().with_row(row_id, Row::await_refresh);
        let refreshed = self.refresh_row(row_id).await;
        if guard.is_stale() {
            return VoteReport::RefreshFailed {
                message: TransportError::Dropped.to_string(),
            };
        }
        let report = match refreshed {
            Ok(apply) => {
                self.surface(row_id, diagnostic.as_ref());
                VoteReport::Confirmed { apply, diagnostic }
            }
            Err(err) => VoteReport::RefreshFailed {
                message: err.to_string(),
            },
        };
        self.resolved(row_id, Resolution::Accepted);
        report
    }

    fn surface(&self, row_id: &RowId, diagnostic: Option<&Diagnostic>) {
        let Some(diagnostic) = diagnostic else {
            return;
        };
        self.ctx
            .rows()
            .with_row(row_id, |row| row.record_diagnostic(diagnostic.clone()));
        self.ctx
            .events()
            .emit(EngineEvent::Diagnostic(diagnostic.clone()));
    }

    fn resolved(&self, row_id: &RowId, resolution: Resolution) {
        self.ctx.events().emit(EngineEvent::VoteResolved {
            row_id: row_id.clone(),
            resolution,
        });
    }

    /// Clear a failed row and fetch it again. This is the explicit retry
    /// that leaves the error state.
    pub async fn recover_row(&self, row_id: &RowId) -> Result<ApplyOutcome> {
        self.ctx
            .rows()
            .with_row(row_id, Row::recover)
            .ok_or_else(|| EngineError::UnknownRow(row_id.clone()))?
            .map_err(|state| EngineError::RowBusy {
                row_id: row_id.clone(),
                state,
            })?;
        tracing::info!(row = %row_id, "row recovered; refreshing");
        self.refresh_row(row_id).await
    }

    /// Record the vote level chosen by the voter. Choosing their default
    /// level is sent as 0.
    pub fn set_vote_level(&self, level: u32, default_level: u32) {
        let level = if level == default_level { 0 } else { level };
        self.ctx.set_vote_level(level);
    }
}
