//! Markdown document renderer.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::traits::{BaseDocumentRenderer, DocumentHandle};
use crate::common::document::DocumentContent;

/// Renders documents as CommonMark.
#[derive(Debug, Default, Clone)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn to_markdown(content: &DocumentContent) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", content.title.trim());
        if let Some(audience) = &content.audience {
            let _ = writeln!(out, "*Prepared for: {}*\n", audience.trim());
        }

        for section in &content.sections {
            let _ = writeln!(out, "## {}\n", section.heading.trim());
            let _ = writeln!(out, "{}\n", section.content.trim());

            if !section.key_points.is_empty() {
                out.push_str("**Key points**\n\n");
                for point in &section.key_points {
                    let _ = writeln!(out, "- {}", point.trim());
                }
                out.push('\n');
            }

            for callout in &section.callouts {
                let _ = writeln!(out, "> **{}:** {}\n", callout.kind.label(), callout.text.trim());
            }
        }

        if !content.answers.is_empty() {
            out.push_str("## Your Questions\n\n");
            for qa in &content.answers {
                let _ = writeln!(out, "### {}\n", qa.question.trim());
                let _ = writeln!(out, "{}\n", qa.answer.trim());
            }
        }

        if !content.sources.is_empty() {
            out.push_str("## Sources\n\n");
            for source in &content.sources {
                let _ = writeln!(out, "- [{}]({})", source.title.trim(), source.url);
            }
            out.push('\n');
        }

        out
    }
}

#[async_trait]
impl BaseDocumentRenderer for MarkdownRenderer {
    async fn render(&self, content: &DocumentContent) -> Result<DocumentHandle> {
        if content.sections.is_empty() {
            anyhow::bail!("document has no sections to render");
        }
        Ok(DocumentHandle {
            extension: "md".to_string(),
            body: Self::to_markdown(content).into_bytes(),
        })
    }

    async fn save(&self, handle: &DocumentHandle, path: &Path) -> Result<PathBuf> {
        let path = path.with_extension(&handle.extension);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &handle.body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
