//! Outbound transport to the data provider.
//!
//! The gateway only needs a status code and a JSON body back; the transport
//! owns URLs, authentication, and HTTP details.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;

/// Raw provider reply before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// Provider status code (HTTP status, or a task-level code from the body).
    pub status: u32,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status: u32, body: Value) -> Self {
        Self { status, body }
    }
}

/// Issues one outbound call to one endpoint path.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn send(&self, path: &str, arguments: &Value) -> Result<RawResponse, TransportError>;
}

#[derive(Clone)]
enum Credentials {
    None,
    Basic { login: String, password: String },
    Bearer(String),
}

/// reqwest-backed transport posting JSON arguments to `base_url + path`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    status_pointer: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Credentials::None,
            status_pointer: None,
        }
    }

    /// Rebuild the client with a request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, TransportError> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build client: {e}")))?;
        Ok(self)
    }

    pub fn with_basic_auth(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::Basic {
            login: login.into(),
            password: password.into(),
        };
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::Bearer(token.into());
        self
    }

    /// Read the provider status from this JSON pointer on 2xx responses
    /// (providers that report task status inside the body).
    pub fn with_status_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.status_pointer = Some(pointer.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn provider_status(&self, http_status: u16, body: &Value) -> u32 {
        if !(200..300).contains(&http_status) {
            return u32::from(http_status);
        }
        self.status_pointer
            .as_deref()
            .and_then(|pointer| body.pointer(pointer))
            .and_then(Value::as_u64)
            .and_then(|code| u32::try_from(code).ok())
            .unwrap_or_else(|| u32::from(http_status))
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(&self, path: &str, arguments: &Value) -> Result<RawResponse, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.post(&url).json(arguments);
        let request = match &self.credentials {
            Credentials::None => request,
            Credentials::Basic { login, password } => request.basic_auth(login, Some(password)),
            Credentials::Bearer(token) => request.bearer_auth(token),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let http_status = response.status().as_u16();
        // Unparseable bodies become Null and are normalized downstream as malformed.
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        let status = self.provider_status(http_status, &body);

        debug!(url = %url, http_status, status, "provider responded");
        Ok(RawResponse { status, body })
    }
}
