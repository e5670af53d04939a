//! Connection health: the disconnected flag, status-poll assessment and the
//! locale-change gate that triggers bulk reloads.

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;

use crate::engine::VettingEngine;
use crate::error::ErrorCategory;
use crate::error::TransportError;
use crate::events::EngineEvent;
use crate::page::ReloadDecision;
use crate::protocol::StatusResponse;
use crate::sync::lock;
use crate::transport::RequestDescriptor;

#[derive(Debug, Default)]
struct LinkDetail {
    reason: Option<String>,
    /// Server start stamp seen on the first healthy poll.
    running_stamp: Option<i64>,
}

/// Whether the engine may talk to the server.
#[derive(Debug, Default)]
pub struct ConnectionState {
    disconnected: AtomicBool,
    detail: Mutex<LinkDetail>,
}

impl ConnectionState {
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        lock(&self.detail).reason.clone()
    }

    /// Returns `true` if this call changed the state.
    pub(crate) fn disconnect(&self, reason: impl Into<String>) -> bool {
        let mut detail = lock(&self.detail);
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return false;
        }
        detail.reason = Some(reason.into());
        true
    }

    /// Clears the reason and the running-stamp baseline. Returns `true` if
    /// this call changed the state.
    pub(crate) fn reconnect(&self) -> bool {
        let mut detail = lock(&self.detail);
        detail.reason = None;
        detail.running_stamp = None;
        self.disconnected.swap(false, Ordering::SeqCst)
    }

    /// The first stamp becomes the baseline; any later different stamp
    /// means the server restarted.
    fn running_stamp_changed(&self, stamp: Option<i64>) -> bool {
        let Some(stamp) = stamp else {
            return false;
        };
        let mut detail = lock(&self.detail);
        match detail.running_stamp {
            None => {
                detail.running_stamp = Some(stamp);
                false
            }
            Some(baseline) => baseline != stamp,
        }
    }

    /// Judge a status response. Checks run in a fixed order and the first
    /// that fails decides the verdict.
    pub fn assess(&self, response: &StatusResponse) -> StatusVerdict {
        if self.is_disconnected() || response.disconnected {
            return StatusVerdict::disconnected(
                self.reason().unwrap_or_else(|| "Misc Disconnect".to_string()),
            );
        }
        if let Some(err) = response.err.as_deref().filter(|e| !e.is_empty()) {
            return StatusVerdict::disconnected(err);
        }
        if let Some(code) = &response.err_code {
            return StatusVerdict::disconnected(code.clone());
        }
        if response.survey_ok == Some(0) {
            return StatusVerdict::disconnected(
                "The server is not ready to accept connections, please retry.",
            );
        }
        let Some(status) = &response.status else {
            return StatusVerdict::disconnected("The server returned an incomplete status.");
        };
        if let Some(busted) = &status.is_busted {
            return StatusVerdict::disconnected(format!(
                "The server has halted due to an error: {busted}"
            ));
        }
        if self.running_stamp_changed(status.survey_running_stamp) {
            return StatusVerdict::disconnected(
                "The server restarted since this page was loaded. Please retry.",
            );
        }
        if status.is_setup == Some(false) {
            return StatusVerdict::Starting;
        }
        StatusVerdict::Healthy
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusVerdict {
    Healthy,
    /// Reachable but still starting up.
    Starting,
    Disconnected {
        reason: String,
    },
}

impl StatusVerdict {
    fn disconnected(reason: impl Into<String>) -> Self {
        StatusVerdict::Disconnected {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampDecision {
    /// First stamp seen; recorded, nothing reloaded.
    Baseline,
    /// Not newer than the last accepted stamp.
    Stale,
    /// Newer stamp accepted; reload the current page.
    Reload,
    /// Newer stamp while votes are settling; kept for a later poll.
    Deferred,
    /// Newer stamp while disconnected; ignored.
    Halted,
}

/// Remembers the last accepted locale stamp.
#[derive(Debug, Default)]
pub struct LocaleStampGate {
    last: Mutex<Option<i64>>,
}

impl LocaleStampGate {
    pub fn observe(&self, stamp: i64, disconnected: bool, busy: bool) -> StampDecision {
        let mut last = lock(&self.last);
        match *last {
            None => {
                *last = Some(stamp);
                StampDecision::Baseline
            }
            Some(previous) if stamp <= previous => StampDecision::Stale,
            Some(_) if disconnected => StampDecision::Halted,
            Some(_) if busy => StampDecision::Deferred,
            Some(_) => {
                *last = Some(stamp);
                StampDecision::Reload
            }
        }
    }

    pub fn last(&self) -> Option<i64> {
        *lock(&self.last)
    }

    pub(crate) fn reset(&self) {
        *lock(&self.last) = None;
    }
}

impl VettingEngine {
    /// Act on a status response: disconnect on a bad verdict, otherwise
    /// feed the locale stamp through the reload gate.
    pub async fn handle_status(&self, response: &StatusResponse) -> StatusVerdict {
        let verdict = self.ctx.link().assess(response);
        match &verdict {
            StatusVerdict::Disconnected { reason } => self.disconnect(reason.clone()),
            StatusVerdict::Healthy | StatusVerdict::Starting => {
                if let Some(stamp) = response.locale_stamp {
                    self.observe_locale_stamp(stamp).await;
                }
            }
        }
        verdict
    }

    pub async fn observe_locale_stamp(&self, stamp: i64) -> StampDecision {
        let decision =
            self.ctx
                .locale_gate()
                .observe(stamp, self.is_disconnected(), self.is_busy());
        match decision {
            StampDecision::Reload => {
                tracing::info!(stamp, "locale changed on server; reloading current page");
                match self.reload_current_page().await {
                    Ok(ReloadDecision::Reloaded(report)) => {
                        tracing::debug!(
                            applied = report.applied.len(),
                            dropped = report.dropped.len(),
                            "locale reload finished"
                        );
                    }
                    Ok(other) => tracing::debug!(?other, "locale reload skipped"),
                    Err(err) => tracing::warn!(
                        error = %err,
                        category = err.category().as_str(),
                        "locale reload failed"
                    ),
                }
            }
            StampDecision::Deferred => {
                tracing::warn!(stamp, "locale changed while votes are settling; deferring reload");
                if let Some(page) = self.ctx.current_page() {
                    self.ctx
                        .events()
                        .emit(EngineEvent::BulkReloadDeferred { page });
                }
            }
            StampDecision::Baseline | StampDecision::Stale | StampDecision::Halted => {}
        }
        decision
    }

    /// Fetch `status` and act on it. A failed fetch counts as a disconnect.
    pub async fn poll_status(&self) -> StatusVerdict {
        let request = RequestDescriptor::get("status")
            .with_timeout(self.config().row_refresh_timeout())
            .with_label("status");
        let response = self
            .ctx
            .queue()
            .send_now(request)
            .await
            .and_then(|r| r.decode::<StatusResponse>());
        match response {
            Ok(status) => self.handle_status(&status).await,
            Err(TransportError::Disconnected) => StatusVerdict::Disconnected {
                reason: self
                    .ctx
                    .link()
                    .reason()
                    .unwrap_or_else(|| "Misc Disconnect".to_string()),
            },
            Err(err) => {
                let reason = format!("Status request failed: {err}");
                tracing::warn!(
                    error = %err,
                    category = ErrorCategory::Disconnected.as_str(),
                    "status poll failed"
                );
                self.disconnect(reason.clone());
                StatusVerdict::Disconnected { reason }
            }
        }
    }

    /// Poll status now and then every poll interval until disconnected or
    /// reset. Polls early when the last outstanding vote finishes.
    pub fn spawn_status_poller(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let token = self.ctx.lifecycle_token();
        tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    return;
                }
                if let StatusVerdict::Disconnected { reason } = engine.poll_status().await {
                    tracing::info!(reason = %reason, "status poller stopping");
                    return;
                }
                let interval = engine.config().status_poll_interval();
                // A reset also wakes idle waiters; cancellation wins.
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                    _ = engine.ctx.tracker().idle() => {
                        tracing::debug!("votes settled; polling status early");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerStatus;
    use crate::row::PageId;
    use crate::row::RowId;
    use crate::test_support::Reply;
    use crate::test_support::ScriptedTransport;
    use crate::test_support::engine_with;
    use crate::test_support::page_json;
    use crate::test_support::snapshot;
    use crate::transport::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn healthy(stamp: i64) -> StatusResponse {
        StatusResponse {
            survey_ok: Some(1),
            status: Some(ServerStatus {
                survey_running_stamp: Some(stamp),
                is_busted: None,
                is_setup: Some(true),
            }),
            ..StatusResponse::default()
        }
    }

    fn reason(verdict: StatusVerdict) -> String {
        match verdict {
            StatusVerdict::Disconnected { reason } => reason,
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[test]
    fn healthy_status_is_healthy() {
        let link = ConnectionState::default();
        assert_eq!(link.assess(&healthy(10)), StatusVerdict::Healthy);
        assert_eq!(link.assess(&healthy(10)), StatusVerdict::Healthy);
    }

    #[test]
    fn server_restart_is_a_disconnect() {
        let link = ConnectionState::default();
        link.assess(&healthy(10));
        assert!(reason(link.assess(&healthy(11))).contains("restarted"));
    }

    #[test]
    fn precedence_follows_check_order() {
        let link = ConnectionState::default();

        let mut both = healthy(1);
        both.err_code = Some("E_SESSION_DISCONNECTED".into());
        both.survey_ok = Some(0);
        assert_eq!(reason(link.assess(&both)), "E_SESSION_DISCONNECTED");

        let mut not_ok = healthy(1);
        not_ok.survey_ok = Some(0);
        assert!(reason(link.assess(&not_ok)).contains("not ready"));

        let mut busted = healthy(1);
        if let Some(status) = busted.status.as_mut() {
            status.is_busted = Some("out of memory".into());
        }
        assert_eq!(
            reason(link.assess(&busted)),
            "The server has halted due to an error: out of memory"
        );

        let missing = StatusResponse {
            survey_ok: Some(1),
            ..StatusResponse::default()
        };
        assert!(reason(link.assess(&missing)).contains("incomplete"));

        let flagged = StatusResponse {
            disconnected: true,
            ..healthy(1)
        };
        assert_eq!(reason(link.assess(&flagged)), "Misc Disconnect");
    }

    #[test]
    fn setup_in_progress_is_starting() {
        let link = ConnectionState::default();
        let mut starting = healthy(1);
        if let Some(status) = starting.status.as_mut() {
            status.is_setup = Some(false);
        }
        assert_eq!(link.assess(&starting), StatusVerdict::Starting);
    }

    #[test]
    fn reconnect_forgets_running_stamp() {
        let link = ConnectionState::default();
        link.assess(&healthy(1));
        assert!(link.disconnect("restart"));
        assert!(!link.disconnect("again"));
        assert_eq!(link.reason().as_deref(), Some("restart"));

        assert!(link.reconnect());
        assert_eq!(link.assess(&healthy(2)), StatusVerdict::Healthy);
    }

    fn with_stamp(stamp: i64) -> StatusResponse {
        StatusResponse {
            locale_stamp: Some(stamp),
            ..healthy(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn newer_locale_stamp_reloads_current_page() {
        let transport = ScriptedTransport::new();
        for value in ["one", "two"] {
            transport.reply(
                Method::Get,
                "voting/en/page/P",
                Reply::Json(page_json(&[("h", snapshot("r", value))])),
            );
        }
        let engine = engine_with(Arc::clone(&transport));
        engine.load_page(&PageId::from("P")).await.unwrap();

        assert_eq!(
            engine.handle_status(&with_stamp(5)).await,
            StatusVerdict::Healthy
        );
        assert_eq!(transport.count(Method::Get, "voting/en/page/P"), 1);

        engine.handle_status(&with_stamp(6)).await;
        assert_eq!(transport.count(Method::Get, "voting/en/page/P"), 2);
        assert_eq!(
            engine
                .row(&RowId::from("r"))
                .unwrap()
                .view()
                .winning_value
                .as_deref(),
            Some("two")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn busy_engine_defers_locale_reload_without_consuming_stamp() {
        let transport = ScriptedTransport::new();
        let engine = engine_with(Arc::clone(&transport));
        let mut events = engine.subscribe();
        engine.context().set_current_page(PageId::from("P"));

        engine.observe_locale_stamp(1).await;
        let _busy = engine.context().tracker().guard();

        assert_eq!(
            engine.observe_locale_stamp(2).await,
            StampDecision::Deferred
        );
        assert_eq!(engine.context().locale_gate().last(), Some(1));
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::BulkReloadDeferred {
                page: PageId::from("P")
            }
        );
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_request_disconnects() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::Get,
            "status",
            Reply::Fail(TransportError::Network("connection reset".into())),
        );
        let engine = engine_with(Arc::clone(&transport));

        let verdict = engine.poll_status().await;

        assert!(reason(verdict).contains("connection reset"));
        assert!(engine.is_disconnected());
        assert!(matches!(
            engine.poll_status().await,
            StatusVerdict::Disconnected { .. }
        ));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_stops_on_disconnect_verdict() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Get, "status", Reply::Json(json!({"SurveyOK": 1, "status": {"surveyRunningStamp": 1}})));
        transport.reply(Method::Get, "status", Reply::Json(json!({"SurveyOK": 1, "status": {"surveyRunningStamp": 2}})));
        let engine = engine_with(Arc::clone(&transport));

        let poller = engine.spawn_status_poller();
        poller.await.unwrap();

        assert_eq!(transport.count(Method::Get, "status"), 2);
        assert!(engine.is_disconnected());
        assert!(engine.context().link().reason().unwrap().contains("restarted"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_poller() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Get, "status", Reply::Json(json!({"SurveyOK": 1, "status": {}})));
        let engine = engine_with(Arc::clone(&transport));

        let poller = engine.spawn_status_poller();
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.reset();
        poller.await.unwrap();

        assert_eq!(transport.count(Method::Get, "status"), 1);
    }

    #[test]
    fn locale_gate_baseline_then_reload() {
        let gate = LocaleStampGate::default();
        assert_eq!(gate.observe(100, false, false), StampDecision::Baseline);
        assert_eq!(gate.observe(100, false, false), StampDecision::Stale);
        assert_eq!(gate.observe(90, false, false), StampDecision::Stale);
        assert_eq!(gate.observe(101, true, false), StampDecision::Halted);
        assert_eq!(gate.observe(101, false, true), StampDecision::Deferred);
        assert_eq!(gate.last(), Some(100));
        assert_eq!(gate.observe(101, false, false), StampDecision::Reload);
        assert_eq!(gate.last(), Some(101));
    }
}
