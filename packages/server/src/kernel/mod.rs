//! Kernel module - server infrastructure and dependencies.

pub mod ai;
pub mod deps;
pub mod jobs;
pub mod sse;
pub mod stream_hub;
pub mod test_dependencies;
pub mod traits;

pub use ai::{ChatCompletionsProvider, OPENAI_BASE_URL, OPENROUTER_BASE_URL};
pub use deps::ServerDeps;
pub use stream_hub::{JobEvent, ProgressHub};
pub use test_dependencies::{MockContentProvider, MOCK_CONTENT};
pub use traits::*;
