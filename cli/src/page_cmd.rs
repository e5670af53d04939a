//! `vetting page` and `vetting refresh`.

use clap::Args;
use serde::Serialize;
use vetting_core::ApplyOutcome;
use vetting_core::PageId;
use vetting_core::RowHash;
use vetting_core::RowId;
use vetting_core::VettingEngine;
use vetting_core::row::Presentation;
use vetting_core::row::Row;
use vetting_core::row::TransitionState;

use crate::exit_code_for;
use crate::exit_codes;
use crate::print_engine_error;
use crate::print_json;

#[derive(Debug, Args)]
pub struct PageArgs {
    /// Page id, e.g. `Languages`
    pub page: String,
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Row id (xpstrid)
    pub row: String,

    /// Row hash the server files the row under
    #[arg(long, value_name = "HASH")]
    pub hash: String,
}

/// One row as printed by the CLI.
#[derive(Debug, Serialize)]
pub struct RowSummary {
    pub row: RowId,
    pub hash: RowHash,
    pub state: TransitionState,
    pub winning: Option<String>,
    pub checksum: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl From<&Row> for RowSummary {
    fn from(row: &Row) -> Self {
        let problem = match row.presentation() {
            Presentation::Normal => None,
            Presentation::Failed { message } | Presentation::RefreshFailed { message } => {
                Some(message.clone())
            }
        };
        Self {
            row: row.id().clone(),
            hash: row.row_hash().clone(),
            state: row.state(),
            winning: row.view().winning_value.clone(),
            checksum: row.checksum(),
            problem,
        }
    }
}

impl RowSummary {
    fn print_line(&self) {
        let winning = self.winning.as_deref().unwrap_or("(no winner)");
        match &self.problem {
            Some(problem) => println!("{:<24} {winning:<32} ! {problem}", self.row.as_str()),
            None => println!("{:<24} {winning}", self.row.as_str()),
        }
    }
}

pub(crate) fn summarize(engine: &VettingEngine, ids: &[RowId]) -> Vec<RowSummary> {
    ids.iter()
        .filter_map(|id| engine.row(id))
        .map(|row| RowSummary::from(&row))
        .collect()
}

pub async fn run_page(engine: &VettingEngine, args: PageArgs, json: bool) -> i32 {
    let page = PageId::from(args.page.as_str());
    let report = match engine.load_page(&page).await {
        Ok(report) => report,
        Err(err) => {
            print_engine_error(json, &err);
            return exit_code_for(&err);
        }
    };

    let rows = summarize(engine, &engine.row_ids());
    if json {
        print_json(&serde_json::json!({
            "page": page,
            "report": report,
            "rows": rows,
        }));
    } else {
        println!("Page {page}: {} rows", rows.len());
        for row in &rows {
            row.print_line();
        }
    }
    exit_codes::SUCCESS
}

pub async fn run_refresh(engine: &VettingEngine, args: RefreshArgs, json: bool) -> i32 {
    let row_id = RowId::from(args.row.as_str());
    engine.track_row(row_id.clone(), RowHash::from(args.hash.as_str()));

    let outcome = match engine.refresh_row(&row_id).await {
        Ok(outcome) => outcome,
        Err(err) => {
            print_engine_error(json, &err);
            return exit_code_for(&err);
        }
    };

    let rows = summarize(engine, std::slice::from_ref(&row_id));
    if json {
        print_json(&serde_json::json!({ "outcome": outcome, "rows": rows }));
    } else {
        match outcome {
            ApplyOutcome::Applied { checksum } => println!("Row {row_id} updated ({checksum})"),
            ApplyOutcome::Unchanged => println!("Row {row_id} unchanged"),
            ApplyOutcome::Dropped { state } => {
                println!("Row {row_id} busy ({}); update dropped", state.as_str());
            }
        }
        for row in &rows {
            row.print_line();
        }
    }
    exit_codes::SUCCESS
}
