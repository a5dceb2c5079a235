//! Server dependencies for stages and jobs (using traits for testability)
//!
//! This module provides the central dependency container passed to the
//! pipeline builder. External services sit behind trait objects so tests can
//! swap in mocks.

use std::sync::Arc;

use provider_gateway::Gateway;

use crate::kernel::stream_hub::ProgressHub;
use crate::kernel::BaseContentProvider;

// =============================================================================
// ServerDeps
// =============================================================================

/// Dependencies shared by every generation run.
#[derive(Clone)]
pub struct ServerDeps {
    /// Keyword / SERP data provider behind candidate fallback and caching.
    pub gateway: Arc<Gateway>,
    /// Content provider tried first by every writing stage.
    pub primary_ai: Arc<dyn BaseContentProvider>,
    /// Content provider tried once when the primary fails or its output is rejected.
    pub fallback_ai: Option<Arc<dyn BaseContentProvider>>,
    /// In-process pub/sub hub for real-time progress streaming to SSE endpoints
    pub progress_hub: ProgressHub,
}

impl ServerDeps {
    pub fn new(
        gateway: Arc<Gateway>,
        primary_ai: Arc<dyn BaseContentProvider>,
        fallback_ai: Option<Arc<dyn BaseContentProvider>>,
        progress_hub: ProgressHub,
    ) -> Self {
        Self {
            gateway,
            primary_ai,
            fallback_ai,
            progress_hub,
        }
    }
}
