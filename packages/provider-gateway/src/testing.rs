//! Testing utilities including a scripted transport.
//!
//! Useful for exercising fallback and caching logic without network calls.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::{ProviderTransport, RawResponse};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond { status: u32, body: Value },
    Timeout,
    Network(String),
    Auth(String),
    /// Sleep before answering with the inner reply.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    /// 200 with `{"items": items}`.
    pub fn ok(items: Vec<Value>) -> Self {
        Self::Respond {
            status: 200,
            body: json!({ "items": items }),
        }
    }

    pub fn status(status: u32) -> Self {
        Self::Respond {
            status,
            body: Value::Null,
        }
    }

    pub fn not_found() -> Self {
        Self::status(404)
    }

    pub fn denied() -> Self {
        Self::status(403)
    }

    pub fn server_error() -> Self {
        Self::status(503)
    }

    /// 200 whose list field is explicitly null.
    pub fn malformed() -> Self {
        Self::Respond {
            status: 200,
            body: json!({ "items": null }),
        }
    }
}

/// Scripted transport recording every path it was asked to call.
///
/// Each path has a queue of replies consumed in order, then an optional
/// default. Unscripted paths answer 404.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    defaults: Mutex<HashMap<String, MockReply>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `path`.
    pub fn with_reply(self, path: &str, reply: MockReply) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used for `path` once its queue is empty.
    pub fn with_default(self, path: &str, reply: MockReply) -> Self {
        self.defaults
            .lock()
            .unwrap()
            .insert(path.to_string(), reply);
        self
    }

    /// Paths called, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Arguments sent, in order.
    pub fn sent_arguments(&self) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    fn next_reply(&self, path: &str) -> MockReply {
        if let Some(reply) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(MockReply::not_found)
    }
}

#[async_trait]
impl ProviderTransport for MockTransport {
    async fn send(&self, path: &str, arguments: &Value) -> Result<RawResponse, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_string(), arguments.clone()));

        let mut reply = self.next_reply(path);
        loop {
            match reply {
                MockReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                MockReply::Respond { status, body } => return Ok(RawResponse::new(status, body)),
                MockReply::Timeout => return Err(TransportError::Timeout),
                MockReply::Network(message) => return Err(TransportError::Network(message)),
                MockReply::Auth(message) => return Err(TransportError::Auth(message)),
            }
        }
    }
}
