//! Document generation domain - turns a queued job into a finished document.

pub mod activities;
pub mod digest;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod prompts;

pub use error::{PipelineError, Stage};
pub use models::{Artifact, DocumentKind, GenerationResult, SectionSpec};
pub use pipeline::{GenerationPipeline, PipelineConfig};
