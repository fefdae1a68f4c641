// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The generation pipeline is a domain that composes these traits.
//
// Naming convention: Base* for trait names (e.g., BaseAI, BaseBlobStore)

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::common::document::{DocumentContent, Section};

// =============================================================================
// AI Trait (Infrastructure - Generic LLM capabilities)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    /// Overrides the provider's default model
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response
    pub json: bool,
}

impl CompletionOptions {
    pub fn json() -> Self {
        Self {
            json: true,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Stream of text deltas from a completion.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait BaseAI: Send + Sync {
    /// Complete a system + user prompt pair (returns raw text response)
    async fn generate(&self, system: &str, user: &str, options: &CompletionOptions)
        -> Result<String>;

    /// Stream a completion as text deltas
    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<TextStream> {
        // Default implementation yields the whole completion as one delta
        let text = self.generate(system, user, options).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

// =============================================================================
// Search Service Trait (Infrastructure)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub published_date: Option<String>,
}

#[async_trait]
pub trait BaseSearchService: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

// =============================================================================
// Document Renderer Trait (Infrastructure)
// =============================================================================

/// A rendered document held in memory until saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    /// File extension of the rendered format, without the dot
    pub extension: String,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait BaseDocumentRenderer: Send + Sync {
    async fn render(&self, content: &DocumentContent) -> Result<DocumentHandle>;

    /// Write the document to `path`, returning the path actually written.
    async fn save(&self, handle: &DocumentHandle, path: &Path) -> Result<PathBuf>;
}

// =============================================================================
// Converter Trait (Infrastructure)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Markdown,
    Html,
    Pdf,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Markdown => "md",
            TargetFormat::Html => "html",
            TargetFormat::Pdf => "pdf",
        }
    }
}

impl std::str::FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(TargetFormat::Markdown),
            "html" => Ok(TargetFormat::Html),
            "pdf" => Ok(TargetFormat::Pdf),
            other => Err(format!("unknown target format: {}", other)),
        }
    }
}

#[async_trait]
pub trait BaseConverter: Send + Sync {
    /// Convert `source` next to itself; `None` when the format is unsupported.
    async fn convert(&self, source: &Path, target: TargetFormat) -> Result<Option<PathBuf>>;
}

// =============================================================================
// Blob Store Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseBlobStore: Send + Sync {
    /// Upload a local file; `None` when the store does not produce URLs.
    async fn upload(&self, path: &Path, bucket: &str, dest: &str) -> Result<Option<String>>;
}

// =============================================================================
// Enhancer Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseEnhancer: Send + Sync {
    /// Return `section` with callouts added.
    async fn enhance(&self, topic: &str, section: &Section) -> Result<Section>;
}
