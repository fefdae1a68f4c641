use serde::{Deserialize, Serialize};

use crate::common::document::DocumentContent;
use crate::kernel::TargetFormat;

/// A file produced for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub format: TargetFormat,
    pub local_path: String,
    /// Set when the upload succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The `result` payload stored on a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub title: String,
    pub sections: Vec<String>,
    pub artifacts: Vec<Artifact>,
    /// One entry per degraded stage.
    #[serde(default)]
    pub warnings: Vec<String>,
    pub document: DocumentContent,
}

impl GenerationResult {
    pub fn primary_artifact(&self) -> Option<&Artifact> {
        self.artifacts.first()
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
