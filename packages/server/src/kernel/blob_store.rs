//! Blob storage for finished artifacts.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header;
use tracing::{debug, warn};

use super::traits::BaseBlobStore;

/// Object storage reached with authenticated `PUT {base_url}/{bucket}/{dest}`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn object_url(&self, bucket: &str, dest: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            bucket.trim_matches('/'),
            dest.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl BaseBlobStore for HttpBlobStore {
    async fn upload(&self, path: &Path, bucket: &str, dest: &str) -> Result<Option<String>> {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        let url = self.object_url(bucket, dest);

        let mut request = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, content_type.as_ref())
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", path.display()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Blob store error {}: {}", status, body);
        }

        debug!(url = %url, "uploaded artifact");
        Ok(Some(url))
    }
}

/// Blob store used when no storage is configured; keeps files local.
pub struct NoopBlobStore;

#[async_trait]
impl BaseBlobStore for NoopBlobStore {
    async fn upload(&self, path: &Path, _bucket: &str, _dest: &str) -> Result<Option<String>> {
        warn!(path = %path.display(), "NoopBlobStore: upload skipped, no blob store configured");
        Ok(None)
    }
}
