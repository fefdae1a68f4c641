//! LLM-backed callout enhancer.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{BaseAI, BaseEnhancer, CompletionOptions};
use crate::common::document::{Callout, Section};

const MAX_CALLOUTS: usize = 3;

const SYSTEM_PROMPT: &str = "You annotate educational documents. Given one section, propose short \
callouts that help a reader: notes, tips, warnings or examples. Never restate the section text.";

#[derive(Debug, Deserialize)]
struct CalloutsResponse {
    #[serde(default)]
    callouts: Vec<Callout>,
}

/// Adds callouts to a section by asking the completion provider for them.
pub struct LlmCalloutEnhancer {
    ai: Arc<dyn BaseAI>,
}

impl LlmCalloutEnhancer {
    pub fn new(ai: Arc<dyn BaseAI>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl BaseEnhancer for LlmCalloutEnhancer {
    async fn enhance(&self, topic: &str, section: &Section) -> Result<Section> {
        let user = format!(
            "Topic: {}\nSection: {}\n\n{}\n\n\
             Return a JSON object {{\"callouts\": [{{\"kind\": \"note|tip|warning|example\", \"text\": \"...\"}}]}} \
             with at most {} callouts.",
            topic, section.heading, section.content, MAX_CALLOUTS
        );

        let raw = self
            .ai
            .generate(SYSTEM_PROMPT, &user, &CompletionOptions::json().with_temperature(0.3))
            .await?;
        let parsed: CalloutsResponse =
            serde_json::from_str(raw.trim()).context("Failed to parse callouts response")?;

        let mut enhanced = section.clone();
        enhanced.callouts.extend(
            parsed
                .callouts
                .into_iter()
                .filter(|c| !c.text.trim().is_empty())
                .take(MAX_CALLOUTS),
        );
        Ok(enhanced)
    }
}
