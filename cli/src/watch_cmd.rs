//! `vetting watch`: keep a page loaded and print what the engine does.

use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use vetting_core::EngineEvent;
use vetting_core::PageId;
use vetting_core::VettingEngine;

use crate::exit_code_for;
use crate::exit_codes;
use crate::print_engine_error;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Page id, e.g. `Languages`
    pub page: String,
}

pub fn format_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::VoteStarted { row_id } => format!("vote started on {row_id}"),
        EngineEvent::VoteResolved { row_id, resolution } => {
            format!("vote on {row_id} resolved: {resolution:?}")
        }
        EngineEvent::RowApplied {
            row_id,
            checksum,
            origin,
        } => format!("row {row_id} updated ({origin:?}, {checksum})"),
        EngineEvent::SnapshotDropped { row_id, state } => {
            format!("update for {row_id} dropped while {}", state.as_str())
        }
        EngineEvent::Diagnostic(diagnostic) => {
            format!("{}: {}", diagnostic.row_id, diagnostic.headline)
        }
        EngineEvent::RowFailed { row_id, message } => format!("row {row_id} failed: {message}"),
        EngineEvent::BulkReloadDeferred { page } => {
            format!("reload of {page} deferred while votes settle")
        }
        EngineEvent::Disconnected { reason } => format!("disconnected: {reason}"),
        EngineEvent::Reconnected => "reconnected".to_string(),
    }
}

pub async fn run_watch(engine: &VettingEngine, args: WatchArgs, json: bool) -> i32 {
    let mut events = engine.subscribe();
    if let Err(err) = engine.load_page(&PageId::from(args.page.as_str())).await {
        print_engine_error(json, &err);
        return exit_code_for(&err);
    }
    let mut poller = engine.spawn_status_poller();

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break exit_codes::SUCCESS,
            _ = &mut poller => {
                break if engine.is_disconnected() {
                    exit_codes::UNAVAILABLE
                } else {
                    exit_codes::SUCCESS
                };
            }
            received = events.recv() => match received {
                Ok(event) => {
                    if json {
                        println!("{}", serde_json::to_string(&event).unwrap_or_default());
                    } else {
                        println!("{}", format_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break exit_codes::SUCCESS,
            },
        }
    };

    // Drain what the poller emitted on its way out.
    while let Ok(event) = events.try_recv() {
        if json {
            println!("{}", serde_json::to_string(&event).unwrap_or_default());
        } else {
            println!("{}", format_event(&event));
        }
    }
    engine.reset();
    code
}
