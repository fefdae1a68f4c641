// TestDependencies - mock implementations for testing
//
// Provides mock collaborators that can be injected into ServerDeps for tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::provider_error::ProviderError;
use super::{
    BaseAI, BaseBlobStore, BaseConverter, BaseDocumentRenderer, BaseEnhancer, BaseSearchService,
    CompletionOptions, DocumentHandle, HtmlConverter, MarkdownRenderer, SearchResult, ServerDeps,
    TargetFormat, TextStream,
};
use crate::common::document::{Callout, CalloutKind, DocumentContent, Section};

/// Marker line the mock AI reads to produce a section reply.
pub const SECTION_HEADING_MARKER: &str = "Section heading:";

/// How a mocked call fails.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Provider(ProviderError),
    Other(String),
}

impl MockFailure {
    fn to_error(&self) -> anyhow::Error {
        match self {
            MockFailure::Provider(e) => anyhow::Error::new(e.clone()),
            MockFailure::Other(message) => anyhow::anyhow!("{}", message),
        }
    }
}

// =============================================================================
// Mock AI (Generic LLM capabilities)
// =============================================================================

/// Arguments captured from a completion call
#[derive(Debug, Clone)]
pub struct AiCall {
    pub system: String,
    pub user: String,
    pub json: bool,
    pub streamed: bool,
}

struct FailureRule {
    pattern: String,
    failure: MockFailure,
    /// `None` fails forever
    remaining: Option<usize>,
}

pub struct MockAI {
    responses: Arc<Mutex<Vec<String>>>,
    rules: Arc<Mutex<Vec<(String, String)>>>,
    failures: Arc<Mutex<Vec<FailureRule>>>,
    calls: Arc<Mutex<Vec<AiCall>>>,
}

impl MockAI {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            rules: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a text response to the queue
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push(response.into());
        self
    }

    /// Reply with `response` whenever the prompt contains `pattern`
    pub fn with_rule(self, pattern: &str, response: impl Into<String>) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), response.into()));
        self
    }

    /// Fail every call whose prompt contains `pattern`
    pub fn fail_when(self, pattern: &str, failure: MockFailure) -> Self {
        self.failures.lock().unwrap().push(FailureRule {
            pattern: pattern.to_string(),
            failure,
            remaining: None,
        });
        self
    }

    /// Fail the first `times` calls whose prompt contains `pattern`
    pub fn fail_times(self, pattern: &str, failure: MockFailure, times: usize) -> Self {
        self.failures.lock().unwrap().push(FailureRule {
            pattern: pattern.to_string(),
            failure,
            remaining: Some(times),
        });
        self
    }

    /// Get all calls that were sent to the AI
    pub fn calls(&self) -> Vec<AiCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose user prompt contains `text`
    pub fn calls_containing(&self, text: &str) -> Vec<AiCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user.contains(text))
            .cloned()
            .collect()
    }

    /// Check if a prompt containing the given text was sent
    pub fn was_called_with(&self, text: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.system.contains(text) || c.user.contains(text))
    }

    /// Get the number of times the AI was called
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn respond(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
        streamed: bool,
    ) -> Result<String> {
        // Record the call
        self.calls.lock().unwrap().push(AiCall {
            system: system.to_string(),
            user: user.to_string(),
            json: options.json,
            streamed,
        });

        let prompt = format!("{}\n{}", system, user);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(rule) = failures
                .iter_mut()
                .find(|r| prompt.contains(&r.pattern) && r.remaining != Some(0))
            {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Err(rule.failure.to_error());
            }
        }

        if let Some((_, response)) = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern))
        {
            return Ok(response.clone());
        }

        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return Ok(responses.remove(0));
        }

        Ok(default_reply(user, options.json))
    }
}

impl Default for MockAI {
    fn default() -> Self {
        Self::new()
    }
}

/// Replies shaped like what the generation prompts ask for
fn default_reply(user: &str, json: bool) -> String {
    let heading = user
        .lines()
        .find_map(|line| line.trim().strip_prefix(SECTION_HEADING_MARKER))
        .map(str::trim);

    match (heading, json) {
        (Some(heading), true) => json!({
            "heading": heading,
            "content": format!("Mock content about {}.", heading),
            "key_points": [format!("Key point about {}", heading)],
        })
        .to_string(),
        (Some(heading), false) => format!("- Outline point for {}", heading),
        (None, true) if user.contains("callouts") => json!({
            "callouts": [{"kind": "tip", "text": "Mock callout."}]
        })
        .to_string(),
        _ => "Mock AI response".to_string(),
    }
}

#[async_trait]
impl BaseAI for MockAI {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        self.respond(system, user, options, false)
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<TextStream> {
        let text = self.respond(system, user, options, true)?;

        // Split into small deltas so consumers see a real stream
        let chars: Vec<char> = text.chars().collect();
        let deltas: Vec<Result<String>> = chars
            .chunks(16)
            .map(|chunk| Ok(chunk.iter().collect::<String>()))
            .collect();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

// =============================================================================
// Mock Search Service
// =============================================================================

pub struct MockSearchService {
    results: Arc<Mutex<Vec<SearchResult>>>,
    failure: Arc<Mutex<Option<MockFailure>>>,
    calls: Arc<Mutex<Vec<(String, usize)>>>,
}

impl MockSearchService {
    pub fn new() -> Self {
        Self {
            results: Arc::new(Mutex::new(vec![SearchResult {
                title: "Mock Source".to_string(),
                url: "https://example.org/source".to_string(),
                content: "Mock research content.".to_string(),
                score: 0.9,
                published_date: None,
            }])),
            failure: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_results(self, results: Vec<SearchResult>) -> Self {
        *self.results.lock().unwrap() = results;
        self
    }

    /// Fail every search
    pub fn failing(self, failure: MockFailure) -> Self {
        *self.failure.lock().unwrap() = Some(failure);
        self
    }

    /// Get all (query, max_results) pairs searched
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockSearchService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseSearchService for MockSearchService {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), max_results));

        if let Some(failure) = self.failure.lock().unwrap().as_ref() {
            return Err(failure.to_error());
        }
        Ok(self
            .results
            .lock()
            .unwrap()
            .iter()
            .take(max_results)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Mock Renderer / Converter / Blob Store
// =============================================================================

/// Markdown renderer that can be told to fail
#[derive(Default)]
pub struct MockRenderer {
    fail: bool,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl BaseDocumentRenderer for MockRenderer {
    async fn render(&self, content: &DocumentContent) -> Result<DocumentHandle> {
        if self.fail {
            anyhow::bail!("mock renderer failure");
        }
        MarkdownRenderer::new().render(content).await
    }

    async fn save(&self, handle: &DocumentHandle, path: &Path) -> Result<PathBuf> {
        MarkdownRenderer::new().save(handle, path).await
    }
}

/// HTML converter that can be told to fail
#[derive(Default)]
pub struct MockConverter {
    fail: bool,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseConverter for MockConverter {
    async fn convert(&self, source: &Path, target: TargetFormat) -> Result<Option<PathBuf>> {
        self.calls.lock().unwrap().push(source.to_path_buf());
        if self.fail {
            anyhow::bail!("mock converter failure");
        }
        HtmlConverter::new().convert(source, target).await
    }
}

/// Blob store that records uploads and returns deterministic URLs
#[derive(Default)]
pub struct MockBlobStore {
    fail: bool,
    uploads: Arc<Mutex<Vec<(PathBuf, String, String)>>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Get all (path, bucket, dest) uploads
    pub fn uploads(&self) -> Vec<(PathBuf, String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseBlobStore for MockBlobStore {
    async fn upload(&self, path: &Path, bucket: &str, dest: &str) -> Result<Option<String>> {
        if self.fail {
            anyhow::bail!("mock blob store failure");
        }
        self.uploads
            .lock()
            .unwrap()
            .push((path.to_path_buf(), bucket.to_string(), dest.to_string()));
        Ok(Some(format!("https://blobs.test/{}/{}", bucket, dest)))
    }
}

// =============================================================================
// Mock Enhancer
// =============================================================================

#[derive(Default)]
pub struct MockEnhancer {
    fail: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockEnhancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Headings of every section enhanced
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseEnhancer for MockEnhancer {
    async fn enhance(&self, _topic: &str, section: &Section) -> Result<Section> {
        self.calls.lock().unwrap().push(section.heading.clone());
        if self.fail {
            anyhow::bail!("mock enhancer failure");
        }
        let mut enhanced = section.clone();
        enhanced.callouts.push(Callout {
            kind: CalloutKind::Note,
            text: format!("Mock note for {}", section.heading),
        });
        Ok(enhanced)
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub ai: Arc<MockAI>,
    pub search_service: Arc<MockSearchService>,
    pub renderer: Arc<MockRenderer>,
    pub converter: Arc<MockConverter>,
    pub blob_store: Arc<MockBlobStore>,
    pub enhancer: Arc<MockEnhancer>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            ai: Arc::new(MockAI::new()),
            search_service: Arc::new(MockSearchService::new()),
            renderer: Arc::new(MockRenderer::new()),
            converter: Arc::new(MockConverter::new()),
            blob_store: Arc::new(MockBlobStore::new()),
            enhancer: Arc::new(MockEnhancer::new()),
        }
    }

    /// Set a mock AI
    pub fn mock_ai(mut self, ai: MockAI) -> Self {
        self.ai = Arc::new(ai);
        self
    }

    /// Set a mock search service
    pub fn mock_search(mut self, service: MockSearchService) -> Self {
        self.search_service = Arc::new(service);
        self
    }

    pub fn mock_renderer(mut self, renderer: MockRenderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn mock_converter(mut self, converter: MockConverter) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    pub fn mock_blob_store(mut self, blob_store: MockBlobStore) -> Self {
        self.blob_store = Arc::new(blob_store);
        self
    }

    pub fn mock_enhancer(mut self, enhancer: MockEnhancer) -> Self {
        self.enhancer = Arc::new(enhancer);
        self
    }

    /// Convert into ServerDeps with every collaborator present
    pub fn into_server_deps(self) -> ServerDeps {
        ServerDeps::builder()
            .ai(self.ai)
            .search(self.search_service)
            .renderer(self.renderer)
            .converter(self.converter)
            .blob_store(self.blob_store)
            .enhancer(self.enhancer)
            .build()
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
