//! Kernel module - job infrastructure and external collaborators.

pub mod blob_store;
pub mod converter;
pub mod deps;
pub mod enhancer;
pub mod jobs;
pub mod openai;
pub mod provider_error;
pub mod renderer;
pub mod scheduled_tasks;
pub mod tavily_client;
pub mod test_dependencies;
pub mod traits;

pub use blob_store::{HttpBlobStore, NoopBlobStore};
pub use converter::{HtmlConverter, PandocConverter};
pub use deps::{create_job_store, ServerDeps};
pub use enhancer::LlmCalloutEnhancer;
pub use openai::OpenAiProvider;
pub use provider_error::{is_transient, ProviderError};
pub use renderer::MarkdownRenderer;
pub use tavily_client::{NoopSearchService, TavilyClient};
pub use test_dependencies::TestDependencies;
pub use traits::*;
