//! Server dependencies for processors (using traits for testability)
//!
//! This module provides the dependency container handed to job processors and
//! the constructors that build the real collaborators from [`Config`].
//! All external services use trait abstractions to enable testing.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::config::Config;
use crate::kernel::jobs::{InMemoryJobStore, JobStore, PostgresJobStore};
use crate::kernel::{
    BaseAI, BaseBlobStore, BaseConverter, BaseDocumentRenderer, BaseEnhancer, BaseSearchService,
    HtmlConverter, HttpBlobStore, LlmCalloutEnhancer, MarkdownRenderer, NoopBlobStore,
    NoopSearchService, OpenAiProvider, PandocConverter, TargetFormat, TavilyClient,
};

// =============================================================================
// ServerDeps
// =============================================================================

/// Collaborators available to processors. Optional stages are skipped when
/// their collaborator is absent.
#[derive(Clone, TypedBuilder)]
pub struct ServerDeps {
    pub ai: Arc<dyn BaseAI>,
    pub search: Arc<dyn BaseSearchService>,
    pub renderer: Arc<dyn BaseDocumentRenderer>,
    #[builder(default, setter(strip_option))]
    pub converter: Option<Arc<dyn BaseConverter>>,
    #[builder(default, setter(strip_option))]
    pub blob_store: Option<Arc<dyn BaseBlobStore>>,
    #[builder(default, setter(strip_option))]
    pub enhancer: Option<Arc<dyn BaseEnhancer>>,
}

impl ServerDeps {
    /// Build the production collaborators.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut openai = OpenAiProvider::new(
            config.require_openai_api_key()?,
            config.openai_model.clone(),
        )?;
        if let Some(base_url) = &config.openai_base_url {
            openai = openai.with_base_url(base_url.trim_end_matches('/'));
        }
        let ai: Arc<dyn BaseAI> = Arc::new(openai);

        let search: Arc<dyn BaseSearchService> = match &config.tavily_api_key {
            Some(key) => Arc::new(TavilyClient::new(key.clone())?),
            None => {
                warn!("TAVILY_API_KEY not set, research stage will run without sources");
                Arc::new(NoopSearchService)
            }
        };

        let converter: Arc<dyn BaseConverter> = match config.convert_format {
            TargetFormat::Pdf => Arc::new(PandocConverter::default()),
            _ => Arc::new(HtmlConverter::new()),
        };

        let blob_store: Arc<dyn BaseBlobStore> = match &config.blob_store_url {
            Some(url) => Arc::new(HttpBlobStore::new(url.clone(), config.blob_store_token.clone())?),
            None => {
                warn!("BLOB_STORE_URL not set, artifacts stay on local disk");
                Arc::new(NoopBlobStore)
            }
        };

        let deps = Self::builder()
            .ai(ai.clone())
            .search(search)
            .renderer(Arc::new(MarkdownRenderer::new()))
            .converter(converter)
            .blob_store(blob_store);

        Ok(if config.enhance_callouts {
            deps.enhancer(Arc::new(LlmCalloutEnhancer::new(ai)))
                .build()
        } else {
            deps.build()
        })
    }
}

/// Connect the job store: Postgres when `DATABASE_URL` is set, otherwise in memory.
pub async fn create_job_store(config: &Config) -> Result<Arc<dyn JobStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to database")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;

            info!("Connected to Postgres job store");
            Ok(Arc::new(PostgresJobStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory job store (jobs are lost on exit)");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}
