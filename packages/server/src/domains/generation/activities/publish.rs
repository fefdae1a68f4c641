//! Formatting, conversion and upload stages.
//!
//! None of these fail a job on their own. The pipeline records a warning and
//! returns whatever artifacts were produced.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::common::document::DocumentContent;
use crate::domains::generation::error::PipelineError;
use crate::domains::generation::models::Artifact;
use crate::kernel::{ServerDeps, TargetFormat};

/// Base path (without extension) of a job's primary document.
pub fn document_path(output_dir: &Path, job_id: Uuid) -> PathBuf {
    output_dir.join(job_id.to_string()).join("document")
}

/// Render `content` and save it under `output_dir`.
pub async fn format_document(
    deps: &ServerDeps,
    content: &DocumentContent,
    output_dir: &Path,
    job_id: Uuid,
) -> Result<Artifact, PipelineError> {
    let handle = deps
        .renderer
        .render(content)
        .await
        .map_err(|e| PipelineError::Formatting(format!("{:#}", e)))?;

    let format = handle
        .extension
        .parse::<TargetFormat>()
        .unwrap_or(TargetFormat::Markdown);

    let path = deps
        .renderer
        .save(&handle, &document_path(output_dir, job_id))
        .await
        .map_err(|e| PipelineError::Formatting(format!("{:#}", e)))?;

    info!(path = %path.display(), "document saved");
    Ok(Artifact {
        format,
        local_path: path.display().to_string(),
        url: None,
    })
}

/// Convert the primary artifact to `target`. `None` when no converter is
/// configured or it does not support `target`.
pub async fn convert_document(
    deps: &ServerDeps,
    primary: &Artifact,
    target: TargetFormat,
) -> Result<Option<Artifact>, PipelineError> {
    let Some(converter) = deps.converter.as_ref() else {
        return Ok(None);
    };
    if primary.format == target {
        return Ok(None);
    }

    let converted = converter
        .convert(Path::new(&primary.local_path), target)
        .await
        .map_err(|e| PipelineError::Conversion(format!("{:#}", e)))?;

    Ok(converted.map(|path| Artifact {
        format: target,
        local_path: path.display().to_string(),
        url: None,
    }))
}

/// Upload each artifact to `bucket` as `{job_id}/{file name}`, filling in its
/// URL. Failures are per artifact.
pub async fn upload_artifacts(
    deps: &ServerDeps,
    artifacts: &mut [Artifact],
    bucket: &str,
    job_id: Uuid,
    warnings: &mut Vec<String>,
) {
    let Some(blob_store) = deps.blob_store.as_ref() else {
        return;
    };

    for artifact in artifacts.iter_mut() {
        let path = PathBuf::from(&artifact.local_path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("document.{}", artifact.format.extension()));
        let dest = format!("{}/{}", job_id, file_name);

        match blob_store.upload(&path, bucket, &dest).await {
            Ok(url) => artifact.url = url,
            Err(e) => {
                let error = PipelineError::Upload(format!("{}: {:#}", file_name, e));
                warn!(error = %error, "artifact left on local disk");
                warnings.push(error.to_string());
            }
        }
    }
}
