//! Scripted transport and fixtures for unit tests.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Notify;

use crate::config_types::EngineConfig;
use crate::engine::VettingEngine;
use crate::error::TransportError;
use crate::protocol::CandidateItem;
use crate::protocol::RowSnapshot;
use crate::sync::lock;
use crate::transport::Method;
use crate::transport::RequestDescriptor;
use crate::transport::Transport;
use crate::transport::TransportResponse;

pub(crate) enum Reply {
    Json(Value),
    NoContent,
    Status(u16),
    Fail(TransportError),
}

impl Reply {
    fn into_result(self) -> Result<TransportResponse, TransportError> {
        match self {
            Reply::Json(value) => Ok(TransportResponse::json(&value)),
            Reply::NoContent => Ok(TransportResponse::no_content()),
            Reply::Status(status) => Err(TransportError::Status {
                status,
                reason: "scripted".to_string(),
            }),
            Reply::Fail(err) => Err(err),
        }
    }
}

struct Scripted {
    reply: Reply,
    delay: Duration,
    gate: Option<Arc<Notify>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub method: Method,
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub payload: Option<Value>,
    pub label: &'static str,
}

/// Answers each (method, endpoint) from a queue of scripted replies and
/// records every call. Unscripted calls fail with a 404.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: Method, endpoint: &str, scripted: Scripted) {
        lock(&self.routes)
            .entry((method, endpoint.to_string()))
            .or_default()
            .push_back(scripted);
    }

    pub fn reply(&self, method: Method, endpoint: &str, reply: Reply) {
        self.reply_after(method, endpoint, Duration::ZERO, reply);
    }

    pub fn reply_after(&self, method: Method, endpoint: &str, delay: Duration, reply: Reply) {
        self.push(
            method,
            endpoint,
            Scripted {
                reply,
                delay,
                gate: None,
            },
        );
    }

    /// Hold the reply until `gate` is notified.
    pub fn reply_when(&self, method: Method, endpoint: &str, gate: Arc<Notify>, reply: Reply) {
        self.push(
            method,
            endpoint,
            Scripted {
                reply,
                delay: Duration::ZERO,
                gate: Some(gate),
            },
        );
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|call| call.endpoint.clone())
            .collect()
    }

    pub fn count(&self, method: Method, endpoint: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.method == method && call.endpoint == endpoint)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, TransportError> {
        lock(&self.calls).push(RecordedCall {
            method: request.method,
            endpoint: request.endpoint.clone(),
            query: request.query.clone(),
            payload: request.payload.clone(),
            label: request.label,
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let scripted = lock(&self.routes)
            .get_mut(&(request.method, request.endpoint.clone()))
            .and_then(VecDeque::pop_front);
        let Some(scripted) = scripted else {
            return Err(TransportError::Status {
                status: 404,
                reason: format!("no scripted reply for {}", request.endpoint),
            });
        };
        if let Some(gate) = scripted.gate {
            gate.notified().await;
        }
        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        scripted.reply.into_result()
    }
}

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        base_url: "http://vetting.test/api/".to_string(),
        ..EngineConfig::default()
    }
}

pub(crate) fn engine_with(transport: Arc<ScriptedTransport>) -> VettingEngine {
    VettingEngine::new(test_config(), transport)
}

/// A consistent one-candidate snapshot whose winner is `value`.
pub(crate) fn snapshot(row_id: &str, value: &str) -> RowSnapshot {
    let hash = format!("v-{value}");
    RowSnapshot::new(row_id)
        .with_item(hash.as_str(), CandidateItem::new(value))
        .with_winning(hash.as_str())
}

pub(crate) fn page_json(rows: &[(&str, RowSnapshot)]) -> Value {
    let rows: serde_json::Map<String, Value> = rows
        .iter()
        .map(|(hash, snapshot)| {
            (
                (*hash).to_string(),
                serde_json::to_value(snapshot).unwrap_or(Value::Null),
            )
        })
        .collect();
    json!({ "section": { "rows": rows } })
}
