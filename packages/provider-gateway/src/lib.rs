//! Outbound Provider Gateway
//!
//! A uniform client for calls to keyword, SERP, and content-data providers.
//! Each logical operation is configured as an ordered list of endpoint
//! candidates plus a status-code classification table; a single dispatch
//! loop walks the list, retries transient failures with bounded backoff,
//! stops on terminal-denied, and normalizes malformed responses to an
//! empty-but-valid result.
//!
//! # Usage
//!
//! ```rust,ignore
//! use provider_gateway::{
//!     CacheTtlTable, Gateway, HttpTransport, OperationRegistry, ResponseCache,
//! };
//!
//! let transport = HttpTransport::new("https://api.provider.com")
//!     .with_basic_auth(login, password)
//!     .with_status_pointer("/tasks/0/status_code");
//! let gateway = Gateway::new(
//!     Arc::new(transport),
//!     ResponseCache::in_memory(CacheTtlTable::default()),
//!     OperationRegistry::seo_defaults(),
//! );
//!
//! let volumes = gateway
//!     .call("search_volume", json!({"keywords": ["rust"], "language_code": "en"}))
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - [`gateway`] - Candidate dispatch loop and fallback operations
//! - [`cache`] - Response cache with per-category TTLs
//! - [`candidate`] - Endpoint candidates and classification tables
//! - [`retry`] - Backoff policy
//! - [`transport`] - HTTP transport
//! - [`testing`] - Scripted transport for tests

pub mod arguments;
pub mod cache;
pub mod candidate;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod testing;
pub mod transport;

pub use arguments::normalize_arguments;
pub use cache::{
    CacheCategory, CacheEntry, CacheKey, CacheStatsSnapshot, CacheStore, CacheTtlTable,
    MemoryCacheStore, ResponseCache,
};
pub use candidate::{
    ClassificationTable, EndpointCandidate, OperationRegistry, OperationSpec, StatusClass,
};
pub use error::{ConfigError, GatewayError, Result, TransportError};
pub use gateway::{Gateway, NormalizedResult, ResultSource};
pub use retry::RetryPolicy;
pub use testing::{MockReply, MockTransport};
pub use transport::{HttpTransport, ProviderTransport, RawResponse};
