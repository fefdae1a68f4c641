//! Secondary-format converters for rendered Markdown documents.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pulldown_cmark::{html, Options, Parser};
use tokio::process::Command;
use tracing::debug;

use super::traits::{BaseConverter, TargetFormat};

/// Converts Markdown to standalone HTML in process.
#[derive(Debug, Default, Clone)]
pub struct HtmlConverter;

impl HtmlConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn markdown_to_html(markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let parser = Parser::new_ext(markdown, options);
        let mut body = String::new();
        html::push_html(&mut body, parser);

        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n</head>\n<body>\n{}</body>\n</html>\n",
            body
        )
    }
}

#[async_trait]
impl BaseConverter for HtmlConverter {
    async fn convert(&self, source: &Path, target: TargetFormat) -> Result<Option<PathBuf>> {
        if target != TargetFormat::Html {
            return Ok(None);
        }

        let markdown = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let output = source.with_extension(target.extension());
        tokio::fs::write(&output, Self::markdown_to_html(&markdown))
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;

        debug!(source = %source.display(), output = %output.display(), "converted to html");
        Ok(Some(output))
    }
}

/// Converts through an external `pandoc` binary (PDF and HTML).
#[derive(Debug, Clone)]
pub struct PandocConverter {
    pandoc_path: String,
}

impl Default for PandocConverter {
    fn default() -> Self {
        Self {
            pandoc_path: "pandoc".to_string(),
        }
    }
}

impl PandocConverter {
    pub fn new(pandoc_path: impl Into<String>) -> Self {
        Self {
            pandoc_path: pandoc_path.into(),
        }
    }
}

#[async_trait]
impl BaseConverter for PandocConverter {
    async fn convert(&self, source: &Path, target: TargetFormat) -> Result<Option<PathBuf>> {
        if target == TargetFormat::Markdown {
            return Ok(None);
        }

        let output = source.with_extension(target.extension());
        let result = Command::new(&self.pandoc_path)
            .arg(source)
            .arg("-o")
            .arg(&output)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.pandoc_path))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "pandoc failed with exit code {}: {}",
                result.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        debug!(source = %source.display(), output = %output.display(), "converted with pandoc");
        Ok(Some(output))
    }
}
