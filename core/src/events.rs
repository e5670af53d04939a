//! Engine events broadcast to subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::diagnostics::Diagnostic;
use crate::reconcile::SnapshotOrigin;
use crate::row::PageId;
use crate::row::RowId;
use crate::row::TransitionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Accepted,
    Rejected,
    Failed,
}

/// Notifications for whatever renders the rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    VoteStarted {
        row_id: RowId,
    },
    VoteResolved {
        row_id: RowId,
        resolution: Resolution,
    },
    RowApplied {
        row_id: RowId,
        checksum: i32,
        origin: SnapshotOrigin,
    },
    SnapshotDropped {
        row_id: RowId,
        state: TransitionState,
    },
    Diagnostic(Diagnostic),
    RowFailed {
        row_id: RowId,
        message: String,
    },
    BulkReloadDeferred {
        page: PageId,
    },
    Disconnected {
        reason: String,
    },
    Reconnected,
}

/// Fan-out of engine events. Sending never blocks and never fails; events
/// are simply lost when nobody is listening or a listener lags.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::Reconnected);
        bus.emit(EngineEvent::Disconnected {
            reason: "gone".into(),
        });

        assert_eq!(rx.recv().await.unwrap(), EngineEvent::Reconnected);
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::Disconnected {
                reason: "gone".into()
            }
        );
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bus = EventBus::new(1);
        bus.emit(EngineEvent::Reconnected);
    }
}
