use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider_error::ProviderError;
use super::{BaseSearchService, SearchResult};

const PROVIDER: &str = "tavily";

/// Tavily API client for web search
pub struct TavilyClient {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

/// Tavily search depth
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum SearchDepth {
    Advanced,
}

/// Tavily API request
#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: SearchDepth,
    max_results: usize,
}

/// Tavily API response
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    results: Vec<TavilyResult>,
}

/// Individual search result from Tavily
#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    content: String,
    score: f64,
    #[serde(default)]
    published_date: Option<String>,
}

impl TavilyClient {
    /// Create a new Tavily client
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            base_url: "https://api.tavily.com".to_string(),
        })
    }

    /// Point the client at another Tavily-compatible endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl BaseSearchService for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            search_depth: SearchDepth::Advanced,
            max_results,
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, &e))
            .context("Failed to send Tavily search request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, &body).into());
        }

        let tavily_response: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, &e))
            .context("Failed to parse Tavily response")?;

        let results = tavily_response
            .results
            .into_iter()
            .map(|r| SearchResult {
                title: r.title,
                url: r.url,
                content: r.content,
                score: r.score,
                published_date: r.published_date,
            })
            .collect();

        Ok(results)
    }
}

/// No-op search service for testing or when API key not configured
pub struct NoopSearchService;

#[async_trait]
impl BaseSearchService for NoopSearchService {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
        tracing::warn!("NoopSearchService: search called but no Tavily API key configured");
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::provider_error::is_transient;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = TavilyClient::new("tvly-test".to_string())
            .unwrap()
            .with_base_url(format!("http://127.0.0.1:{}", port));
        let err = client.search("soil", 3).await.unwrap_err();

        assert!(is_transient(&err), "{:#}", err);
        assert!(err.to_string().contains("Tavily"));
    }
}
