//! Request descriptors and the transport that carries them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::config_loader::ConfigLoadError;
use crate::config_types::EngineConfig;
use crate::error::TransportError;

/// Header carrying the survey session, when one is configured.
pub const SESSION_HEADER: &str = "X-SurveyTool-Session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// Everything needed to issue one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the configured base URL.
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub payload: Option<Value>,
    /// Overrides the serializer's default timeout.
    pub timeout: Option<Duration>,
    /// Short name used in logs.
    pub label: &'static str,
}

impl RequestDescriptor {
    fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            payload: None,
            timeout: None,
            label: "request",
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        let mut req = Self::new(Method::Post, endpoint);
        req.payload = Some(payload);
        req
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    pub fn no_content() -> Self {
        Self::new(204, Vec::new())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        if self.body.is_empty() {
            return Err(TransportError::Decode(format!(
                "empty body with status {}",
                self.status
            )));
        }
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Carries one request to the server.
///
/// Implementations report non-success HTTP statuses as
/// [`TransportError::Status`]; timeouts and cancellation are imposed by the
/// caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor)
    -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    session_id: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigLoadError> {
        let client = Client::builder()
            .user_agent(format!("vetting/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigLoadError::Validation(format!("http client: {e}")))?;
        Self::with_client(client, &config.base_url, config.session_id.clone())
    }

    pub fn with_client(
        client: Client,
        base_url: &str,
        session_id: Option<String>,
    ) -> Result<Self, ConfigLoadError> {
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
            session_id,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url_for(&self, request: &RequestDescriptor) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(request.endpoint.trim_start_matches('/'))
            .map_err(|e| TransportError::Network(format!("bad endpoint {}: {e}", request.endpoint)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

/// Endpoints are joined onto the base URL, so it must end with `/`.
fn normalize_base_url(base_url: &str) -> Result<Url, ConfigLoadError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ConfigLoadError::Validation(format!("base_url '{base_url}': {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(request)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(session) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session);
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout.unwrap_or_default())
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(TransportResponse::new(status.as_u16(), body.to_vec()))
    }
}
