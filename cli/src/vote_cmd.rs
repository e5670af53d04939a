//! `vetting vote`.

use clap::ArgGroup;
use clap::Args;
use serde::Serialize;
use vetting_core::RowHash;
use vetting_core::RowId;
use vetting_core::VettingEngine;
use vetting_core::VoteChoice;
use vetting_core::VoteReport;
use vetting_core::diagnostics::Diagnostic;
use vetting_core::error::ErrorCategory;
use vetting_core::vote::IgnoreReason;

use crate::exit_code_for;
use crate::exit_codes;
use crate::page_cmd::RowSummary;
use crate::page_cmd::summarize;
use crate::print_engine_error;
use crate::print_json;

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("choice")
        .required(true)
        .args(["value", "abstain", "missing"]),
))]
pub struct VoteArgs {
    /// Row id (xpstrid)
    pub row: String,

    /// Row hash the server files the row under
    #[arg(long, value_name = "HASH")]
    pub hash: String,

    /// Vote for this value
    #[arg(long, value_name = "VALUE")]
    pub value: Option<String>,

    /// Abstain on the row
    #[arg(long)]
    pub abstain: bool,

    /// Vote for the value to be absent
    #[arg(long)]
    pub missing: bool,

    /// Vote with this level instead of the default
    #[arg(long, value_name = "LEVEL")]
    pub level: Option<u32>,
}

impl VoteArgs {
    pub fn choice(&self) -> VoteChoice {
        match (&self.value, self.missing) {
            (Some(value), _) => VoteChoice::Value(value.clone()),
            (None, true) => VoteChoice::Missing,
            (None, false) => VoteChoice::Abstain,
        }
    }
}

#[derive(Debug, Serialize)]
struct VoteSummary {
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<Diagnostic>,
    rows: Vec<RowSummary>,
}

fn describe(report: VoteReport) -> (i32, &'static str, Option<String>, Option<Diagnostic>) {
    match report {
        VoteReport::Confirmed { diagnostic, .. } => {
            (exit_codes::SUCCESS, "confirmed", None, diagnostic)
        }
        VoteReport::Rejected { diagnostic } => (exit_codes::REJECTED, "rejected", None, diagnostic),
        VoteReport::Ignored(IgnoreReason::UnknownRow) => (
            exit_codes::REJECTED,
            "ignored",
            Some("row is not loaded".to_string()),
            None,
        ),
        VoteReport::Ignored(IgnoreReason::Busy(state)) => (
            exit_codes::REJECTED,
            "ignored",
            Some(format!("row is busy ({})", state.as_str())),
            None,
        ),
        VoteReport::Failed { error } => {
            let code = match error.category() {
                ErrorCategory::Transport | ErrorCategory::Disconnected => exit_codes::UNAVAILABLE,
                _ => exit_codes::REJECTED,
            };
            (code, "failed", Some(error.to_string()), None)
        }
        VoteReport::RefreshFailed { message } => {
            (exit_codes::UNAVAILABLE, "refresh_failed", Some(message), None)
        }
    }
}

pub async fn run_vote(engine: &VettingEngine, args: VoteArgs, json: bool) -> i32 {
    let row_id = RowId::from(args.row.as_str());
    engine.track_row(row_id.clone(), RowHash::from(args.hash.as_str()));
    if let Some(level) = args.level {
        engine.set_vote_level(level, 0);
    }

    if let Err(err) = engine.refresh_row(&row_id).await {
        print_engine_error(json, &err);
        return exit_code_for(&err);
    }

    let report = engine.submit_vote(&row_id, args.choice()).await;
    tracing::debug!(row = %row_id, ?report, "vote finished");
    let (code, result, message, diagnostic) = describe(report);
    let summary = VoteSummary {
        result,
        message,
        diagnostic,
        rows: summarize(engine, std::slice::from_ref(&row_id)),
    };

    if json {
        print_json(&summary);
    } else {
        println!("Vote {}: {}", summary.result, row_id);
        if let Some(message) = &summary.message {
            println!("  {message}");
        }
        if let Some(diagnostic) = &summary.diagnostic {
            println!("  {}", diagnostic.headline);
            for test in &diagnostic.tests {
                println!("  - {}", test.message);
            }
        }
        for row in &summary.rows {
            let winning = row.winning.as_deref().unwrap_or("(no winner)");
            println!("  winning: {winning}");
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vetting_core::TransportError;
    use vetting_core::row::TransitionState;

    fn args(value: Option<&str>, abstain: bool, missing: bool) -> VoteArgs {
        VoteArgs {
            row: "r1".to_string(),
            hash: "h1".to_string(),
            value: value.map(str::to_string),
            abstain,
            missing,
            level: None,
        }
    }

    #[test]
    fn choice_follows_flags() {
        assert_eq!(
            args(Some("x"), false, false).choice(),
            VoteChoice::Value("x".into())
        );
        assert_eq!(args(None, true, false).choice(), VoteChoice::Abstain);
        assert_eq!(args(None, false, true).choice(), VoteChoice::Missing);
    }

    #[test]
    fn exit_codes_follow_report() {
        let (code, result, _, _) = describe(VoteReport::Rejected { diagnostic: None });
        assert_eq!((code, result), (exit_codes::REJECTED, "rejected"));

        let (code, _, message, _) = describe(VoteReport::Ignored(IgnoreReason::Busy(
            TransitionState::Submitting,
        )));
        assert_eq!(code, exit_codes::REJECTED);
        assert!(message.unwrap().contains("busy"));

        let (code, _, _, _) = describe(VoteReport::Failed {
            error: TransportError::Disconnected,
        });
        assert_eq!(code, exit_codes::UNAVAILABLE);
    }
}
