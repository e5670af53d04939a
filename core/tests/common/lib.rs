//! Fixtures shared by the `vetting-core` integration tests.

#![allow(clippy::expect_used)]

use std::time::Duration;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use vetting_core::EngineConfig;
use vetting_core::VettingEngine;
use wiremock::MockServer;

pub const LOCALE: &str = "fr";
pub const SESSION: &str = "s3cr3t";

/// Config pointing at `server`, with a short quiet interval.
pub fn config_for(server: &MockServer) -> EngineConfig {
    EngineConfig {
        base_url: format!("{}/cldr-apps/api", server.uri()),
        locale: LOCALE.to_string(),
        session_id: Some(SESSION.to_string()),
        quiet_interval_ms: 200,
        request_timeout_ms: 5_000,
        row_refresh_timeout_ms: 5_000,
        ..EngineConfig::default()
    }
}

pub fn engine_for(server: &MockServer) -> VettingEngine {
    VettingEngine::connect(config_for(server)).expect("engine should build")
}

/// Server path of an API endpoint.
pub fn api_path(endpoint: &str) -> String {
    format!("/cldr-apps/api/{endpoint}")
}

pub fn row_path(row_id: &str) -> String {
    api_path(&format!("voting/{LOCALE}/row/{row_id}"))
}

pub fn page_path(page: &str) -> String {
    api_path(&format!("voting/{LOCALE}/page/{page}"))
}

/// Row JSON whose candidates are `(hash, value)` pairs and whose winner is
/// `winning`.
pub fn row_json(row_id: &str, winning: &str, candidates: &[(&str, &str)]) -> Value {
    let items: Map<String, Value> = candidates
        .iter()
        .map(|(hash, value)| {
            (
                (*hash).to_string(),
                json!({"value": value, "rawValue": value, "votes": {}}),
            )
        })
        .collect();
    let winning_value = candidates
        .iter()
        .find(|(hash, _)| *hash == winning)
        .map(|(_, value)| *value);
    json!({
        "xpstrid": row_id,
        "xpathId": 1,
        "winningVhash": winning,
        "winningValue": winning_value,
        "items": items,
    })
}

/// Page response body holding `rows` keyed by row hash.
pub fn page_json(rows: &[(&str, Value)]) -> Value {
    let rows: Map<String, Value> = rows
        .iter()
        .map(|(hash, row)| ((*hash).to_string(), row.clone()))
        .collect();
    json!({ "section": { "rows": rows } })
}

pub fn status_json(running_stamp: i64, locale_stamp: i64) -> Value {
    json!({
        "SurveyOK": 1,
        "status": {"surveyRunningStamp": running_stamp, "isSetup": true},
        "localeStamp": locale_stamp,
    })
}

/// Poll `condition` every few milliseconds until it holds or `limit`
/// passes. Returns whether it held.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
