//! Research stage: gather web sources for the topic.

use tracing::{info, warn};

use crate::common::document::SourceRef;
use crate::domains::generation::error::{PipelineError, Stage};
use crate::kernel::jobs::JobParams;
use crate::kernel::{SearchResult, ServerDeps};

/// Characters of each source's content included in prompts.
const SOURCE_EXCERPT_CHARS: usize = 600;

#[derive(Debug, Clone, Default)]
pub struct ResearchContext {
    pub sources: Vec<SearchResult>,
}

impl ResearchContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Numbered source excerpts for prompts.
    pub fn prompt_block(&self) -> String {
        if self.sources.is_empty() {
            return "No research sources are available; rely on well-established knowledge."
                .to_string();
        }

        let mut block = String::from("Research sources:\n");
        for (i, source) in self.sources.iter().enumerate() {
            let excerpt: String = source.content.chars().take(SOURCE_EXCERPT_CHARS).collect();
            block.push_str(&format!(
                "[{}] {} ({})\n{}\n",
                i + 1,
                source.title,
                source.url,
                excerpt.trim()
            ));
        }
        block
    }

    pub fn source_refs(&self) -> Vec<SourceRef> {
        self.sources
            .iter()
            .map(|s| SourceRef {
                title: s.title.clone(),
                url: s.url.clone(),
            })
            .collect()
    }
}

fn search_query(params: &JobParams) -> String {
    match params.audience() {
        Some(audience) => format!("{} for {}", params.topic(), audience),
        None => params.topic().to_string(),
    }
}

/// Search for sources on the job's topic.
///
/// Sources without a URL are dropped, and the rest are ordered by score.
pub async fn gather_research(
    deps: &ServerDeps,
    params: &JobParams,
    max_results: usize,
) -> Result<ResearchContext, PipelineError> {
    let query = search_query(params);

    let mut sources = deps
        .search
        .search(&query, max_results)
        .await
        .map_err(|e| PipelineError::from_provider(Stage::Research, e))?;

    sources.retain(|s| !s.url.trim().is_empty());
    sources.sort_by(|a, b| b.score.total_cmp(&a.score));
    sources.truncate(max_results);

    if sources.is_empty() {
        warn!(query = %query, "search returned no usable sources");
    } else {
        info!(query = %query, sources = sources.len(), "research complete");
    }

    Ok(ResearchContext { sources })
}
