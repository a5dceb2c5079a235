//! Concrete pipeline stages.

mod assets;
mod data;
mod writing;

pub use assets::{CitationGenerationStage, ImageGenerationStage};
pub use data::{CompetitorAnalysisStage, KeywordAnalysisStage, ResearchStage, DATA_PROVIDER};
pub use writing::{
    ContentWriter, DraftGenerationStage, EnhancementStage, IntentAnalysisStage, OutputBounds,
    SeoPolishStage, StructurePlanningStage,
};
