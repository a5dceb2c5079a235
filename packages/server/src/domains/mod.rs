// Business domains
pub mod generation;
pub mod pipeline;
