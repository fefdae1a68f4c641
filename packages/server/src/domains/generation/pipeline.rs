//! Staged document generation pipeline.
//!
//! ```text
//! research ─► content generation ─► personalization ─► enhancement
//!     0-20          20-70                70-72             72-75
//!
//! ─► formatting ─► conversion ─► upload ─► completed
//!      75-90         90-95        95-100
//! ```
//!
//! Research and content generation decide the outcome: a transient provider
//! failure there asks the queue for a retry, anything else is fatal. Later
//! stages degrade to a warning on the result.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::common::document::DocumentContent;
use crate::config::Config;
use crate::kernel::jobs::{
    Job, JobOutcome, JobParams, JobProcessor, JobType, ProcessContext, DEFAULT_RETRY_BUDGET,
};
use crate::kernel::{ServerDeps, TargetFormat};

use super::activities::{
    answer_questions, convert_document, enhance_sections, format_document, gather_research,
    generate_sections, upload_artifacts, ResearchContext,
};
use super::error::{PipelineError, Stage};
use super::models::{DocumentKind, GenerationResult};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub bucket: String,
    pub max_search_results: usize,
    pub enhance_callouts: bool,
    /// Secondary format produced next to the Markdown document.
    pub convert_format: TargetFormat,
    pub retry_budget: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            bucket: "generated-documents".to_string(),
            max_search_results: 5,
            enhance_callouts: false,
            convert_format: TargetFormat::Html,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            bucket: config.blob_bucket.clone(),
            enhance_callouts: config.enhance_callouts,
            convert_format: config.convert_format,
            ..Self::default()
        }
    }
}

/// Processor for one document job type.
pub struct GenerationPipeline {
    job_type: JobType,
    deps: ServerDeps,
    config: PipelineConfig,
}

impl GenerationPipeline {
    /// Fails when callouts are enabled but no enhancer is configured.
    pub fn new(
        job_type: JobType,
        deps: ServerDeps,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        if config.enhance_callouts && deps.enhancer.is_none() {
            return Err(PipelineError::Configuration(format!(
                "{} pipeline has callouts enabled but no enhancer configured",
                job_type
            )));
        }
        Ok(Self {
            job_type,
            deps,
            config,
        })
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Map a stage failure onto the queue's retry policy.
    fn outcome_for(&self, job: &Job, error: PipelineError) -> JobOutcome {
        match error {
            PipelineError::TransientProvider { .. } if job.retry_count < self.config.retry_budget => {
                JobOutcome::Retry {
                    reason: error.to_string(),
                    retry_count: job.retry_count + 1,
                }
            }
            PipelineError::TransientProvider { .. } => {
                JobOutcome::Fatal(format!("retry budget exhausted: {}", error))
            }
            PipelineError::Interrupted(stage) => JobOutcome::Interrupted {
                reason: format!("interrupted before {}", stage),
            },
            other => JobOutcome::Fatal(other.to_string()),
        }
    }

    async fn run(
        &self,
        job: &Job,
        params: &JobParams,
        ctx: &ProcessContext,
    ) -> Result<GenerationResult, PipelineError> {
        let kind = DocumentKind::plan(params);
        let mut warnings = Vec::new();

        ctx.progress.report(0.0, Some("Starting"));

        // Research
        checkpoint(ctx, Stage::Research)?;
        ctx.progress.report(5.0, Some("Researching"));
        let research =
            match gather_research(&self.deps, params, self.config.max_search_results).await {
                Ok(research) => research,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "research unavailable, continuing without sources");
                    warnings.push(format!("research unavailable: {}", e));
                    ResearchContext::default()
                }
            };
        ctx.progress.report(20.0, Some("Research complete"));

        // Content generation
        checkpoint(ctx, Stage::ContentGeneration)?;
        let sections =
            generate_sections(&self.deps, &kind, params, &research, ctx, &mut warnings).await?;

        // Personalization
        checkpoint(ctx, Stage::Personalization)?;
        let answers = if params.questions().is_empty() {
            Vec::new()
        } else {
            ctx.progress.report(70.0, Some("Answering questions"));
            answer_questions(&self.deps, params, &sections, ctx, &mut warnings).await?
        };
        ctx.progress.report(72.0, None);

        // Enhancement
        let sections = match (&self.deps.enhancer, self.config.enhance_callouts) {
            (Some(enhancer), true) => {
                checkpoint(ctx, Stage::Enhancement)?;
                ctx.progress.report(72.0, Some("Adding callouts"));
                enhance_sections(enhancer.as_ref(), params.topic(), sections, ctx, &mut warnings)
                    .await?
            }
            _ => sections,
        };
        ctx.progress.report(75.0, None);

        let document = DocumentContent {
            title: format!("{}: {}", kind.label, params.topic()),
            topic: params.topic().to_string(),
            audience: params.audience().map(str::to_string),
            sections,
            answers,
            sources: research.source_refs(),
        };

        // Formatting
        checkpoint(ctx, Stage::Formatting)?;
        ctx.progress.report(75.0, Some("Formatting document"));
        let mut artifacts = Vec::new();
        match format_document(&self.deps, &document, &self.config.output_dir, job.id).await {
            Ok(primary) => artifacts.push(primary),
            Err(e) => {
                warn!(error = %e, "formatting failed, completing without artifacts");
                warnings.push(e.to_string());
            }
        }
        ctx.progress.report(90.0, None);

        // Conversion
        if let Some(primary) = artifacts.first().cloned() {
            checkpoint(ctx, Stage::Conversion)?;
            ctx.progress.report(90.0, Some("Converting document"));
            match convert_document(&self.deps, &primary, self.config.convert_format).await {
                Ok(Some(converted)) => artifacts.push(converted),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "conversion failed, keeping primary document only");
                    warnings.push(e.to_string());
                }
            }
        }
        ctx.progress.report(95.0, None);

        // Upload
        if !artifacts.is_empty() {
            checkpoint(ctx, Stage::Upload)?;
            ctx.progress.report(95.0, Some("Uploading artifacts"));
            upload_artifacts(
                &self.deps,
                &mut artifacts,
                &self.config.bucket,
                job.id,
                &mut warnings,
            )
            .await;
        }

        ctx.progress.report(100.0, Some("Completed"));

        Ok(GenerationResult {
            title: document.title.clone(),
            sections: document.headings(),
            artifacts,
            warnings,
            document,
        })
    }
}

/// Stop between stages once the worker has asked running jobs to give up.
fn checkpoint(ctx: &ProcessContext, next: Stage) -> Result<(), PipelineError> {
    if ctx.is_cancelled() {
        Err(PipelineError::Interrupted(next))
    } else {
        Ok(())
    }
}

#[async_trait]
impl JobProcessor for GenerationPipeline {
    async fn process(&self, job: &Job, ctx: ProcessContext) -> Result<JobOutcome> {
        let params = match JobParams::from_job(job) {
            Ok(params) => params,
            Err(e) => return Ok(JobOutcome::Fatal(PipelineError::from(e).to_string())),
        };
        if params.job_type() != self.job_type {
            return Ok(JobOutcome::Fatal(format!(
                "{} pipeline cannot process {} jobs",
                self.job_type,
                params.job_type()
            )));
        }

        info!(
            job_id = %job.id,
            job_type = %self.job_type,
            retry_count = job.retry_count,
            "starting generation"
        );

        match self.run(job, &params, &ctx).await {
            Ok(result) => {
                info!(
                    job_id = %job.id,
                    sections = result.sections.len(),
                    artifacts = result.artifacts.len(),
                    warnings = result.warnings.len(),
                    "generation complete"
                );
                Ok(JobOutcome::Completed(result.to_value()?))
            }
            Err(e) => {
                let outcome = self.outcome_for(job, e);
                warn!(job_id = %job.id, outcome = outcome.label(), "generation did not complete");
                Ok(outcome)
            }
        }
    }
}
