//! Pipeline stages and the errors they raise.

use std::fmt;

use thiserror::Error;

use crate::kernel::is_transient;
use crate::kernel::jobs::ParamsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Research,
    ContentGeneration,
    Personalization,
    Enhancement,
    Formatting,
    Conversion,
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::ContentGeneration => "content_generation",
            Stage::Personalization => "personalization",
            Stage::Enhancement => "enhancement",
            Stage::Formatting => "formatting",
            Stage::Conversion => "conversion",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retried through the queue until the retry budget is spent.
    #[error("transient provider failure during {stage}: {message}")]
    TransientProvider { stage: Stage, message: String },

    /// Generated content is unusable; never retried.
    #[error("content validation failed: {0}")]
    ContentValidation(String),

    #[error("pipeline misconfigured: {0}")]
    Configuration(String),

    /// Permanent provider failure.
    #[error("{stage} failed: {message}")]
    Provider { stage: Stage, message: String },

    #[error("formatting failed: {0}")]
    Formatting(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("interrupted before {0}")]
    Interrupted(Stage),

    #[error(transparent)]
    InvalidParams(#[from] ParamsError),
}

impl PipelineError {
    /// Classify a collaborator failure raised during `stage`.
    pub fn from_provider(stage: Stage, error: anyhow::Error) -> Self {
        let message = format!("{:#}", error);
        if is_transient(&error) {
            PipelineError::TransientProvider { stage, message }
        } else {
            PipelineError::Provider { stage, message }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientProvider { .. })
    }
}
