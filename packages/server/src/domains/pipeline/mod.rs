//! Stage contract and the orchestrator that sequences stages.

mod context;
mod orchestrator;
mod progress;
mod stage;

pub use context::{ContextSlot, SlotTaken, StageContext};
pub use orchestrator::{
    Orchestrator, PipelineError, PipelineFailure, PipelineResult, RunTotals, StageRecord,
};
pub use progress::{ProgressAck, ProgressLog, ProgressPolicy, ProgressSink, ProgressUpdate};
pub use stage::{
    PipelineStage, StageError, StageHandler, StageKind, StageMetadata, StageOutput,
    StageRequirement,
};
