//! Content generation stage: plan then write each section in order.
//!
//! Every section runs two calls. The planning pass asks for a short outline;
//! the writing pass streams the section as JSON so progress can move while
//! the model is still writing. Later sections see a digest of earlier ones.

use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::common::document::Section;
use crate::domains::generation::digest::SectionDigest;
use crate::domains::generation::error::{PipelineError, Stage};
use crate::domains::generation::models::DocumentKind;
use crate::domains::generation::prompts::{
    SectionPrompt, PLANNER_SYSTEM_PROMPT, WRITER_SYSTEM_PROMPT,
};
use crate::kernel::jobs::{JobParams, ProcessContext};
use crate::kernel::{CompletionOptions, ServerDeps};

use super::research::ResearchContext;

/// Progress window owned by this stage.
pub const PROGRESS_START: f64 = 20.0;
pub const PROGRESS_END: f64 = 70.0;

/// Characters a section is expected to stream; drives in-section progress.
const EXPECTED_SECTION_CHARS: usize = 2_400;
/// Minimum progress step reported while streaming.
const STREAM_REPORT_STEP: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct SectionDraft {
    #[serde(default)]
    heading: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    key_points: Vec<String>,
}

/// Parse a writing-pass reply into a section titled `heading`.
///
/// Accepts the JSON object bare or inside a fenced code block. The planned
/// heading always wins over the one the model echoes back.
pub fn parse_section(raw: &str, heading: &str) -> Result<Section, String> {
    let body = strip_code_fence(raw);
    let draft: SectionDraft =
        serde_json::from_str(body).map_err(|e| format!("section is not valid JSON: {}", e))?;

    if draft.content.trim().is_empty() {
        return Err("section content is empty".to_string());
    }
    if let Some(echoed) = draft.heading.as_deref() {
        if !echoed.trim().eq_ignore_ascii_case(heading) {
            debug!(planned = heading, echoed, "model renamed section heading");
        }
    }

    Ok(Section {
        heading: heading.to_string(),
        content: draft.content.trim().to_string(),
        key_points: draft
            .key_points
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        callouts: Vec::new(),
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Write every section of `kind`, in order.
///
/// A missing mandatory section fails the stage with a content validation
/// error; optional sections that fail are dropped and noted in `warnings`.
/// Transient provider failures abort the stage so the job can be retried.
pub async fn generate_sections(
    deps: &ServerDeps,
    kind: &DocumentKind,
    params: &JobParams,
    research: &ResearchContext,
    ctx: &ProcessContext,
    warnings: &mut Vec<String>,
) -> Result<Vec<Section>, PipelineError> {
    let mut digest = SectionDigest::new();
    let mut sections = Vec::with_capacity(kind.sections.len());
    let span = (PROGRESS_END - PROGRESS_START) / kind.sections.len().max(1) as f64;

    for (index, spec) in kind.sections.iter().enumerate() {
        if ctx.is_cancelled() {
            return Err(PipelineError::Interrupted(Stage::ContentGeneration));
        }

        let base = PROGRESS_START + span * index as f64;
        let message = format!("Writing {}", spec.heading);
        ctx.progress.report(base, Some(&message));

        let prompt = SectionPrompt {
            kind,
            spec,
            params,
            research,
            digest: &digest,
        };

        match write_section(deps, &prompt, ctx, base, span).await {
            Ok(section) => {
                digest.push(&section);
                sections.push(section);
            }
            Err(e) if e.is_transient() => return Err(e),
            Err(e) if spec.mandatory => {
                return Err(PipelineError::ContentValidation(format!(
                    "mandatory section \"{}\" could not be generated: {}",
                    spec.heading,
                    reason(&e)
                )));
            }
            Err(e) => {
                warn!(section = %spec.heading, error = %e, "dropping optional section");
                warnings.push(format!(
                    "section \"{}\" omitted: {}",
                    spec.heading,
                    reason(&e)
                ));
            }
        }
    }

    ctx.progress.report(PROGRESS_END, Some("Sections written"));
    info!(
        planned = kind.sections.len(),
        written = sections.len(),
        "content generation complete"
    );
    Ok(sections)
}

async fn write_section(
    deps: &ServerDeps,
    prompt: &SectionPrompt<'_>,
    ctx: &ProcessContext,
    base: f64,
    span: f64,
) -> Result<Section, PipelineError> {
    let heading = prompt.spec.heading.as_str();

    let outline = deps
        .ai
        .generate(
            PLANNER_SYSTEM_PROMPT,
            &prompt.plan(),
            &CompletionOptions::default().with_temperature(0.4),
        )
        .await
        .map_err(|e| PipelineError::from_provider(Stage::ContentGeneration, e))?;
    ctx.progress.report(base + span * 0.1, None);

    let mut stream = deps
        .ai
        .generate_stream(
            WRITER_SYSTEM_PROMPT,
            &prompt.write(&outline),
            &CompletionOptions::json().with_temperature(0.7),
        )
        .await
        .map_err(|e| PipelineError::from_provider(Stage::ContentGeneration, e))?;

    let mut raw = String::new();
    let mut reported = base + span * 0.1;
    while let Some(delta) = stream.next().await {
        let delta = delta.map_err(|e| PipelineError::from_provider(Stage::ContentGeneration, e))?;
        raw.push_str(&delta);

        let fraction = (raw.len() as f64 / EXPECTED_SECTION_CHARS as f64).min(1.0);
        let percent = base + span * (0.1 + 0.85 * fraction);
        if percent - reported >= STREAM_REPORT_STEP {
            ctx.progress.report(percent, None);
            reported = percent;
        }
    }

    parse_section(&raw, heading).map_err(PipelineError::ContentValidation)
}

fn reason(error: &PipelineError) -> String {
    match error {
        PipelineError::ContentValidation(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{progress_channel, JobType};
    use crate::kernel::test_dependencies::{MockAI, MockFailure, TestDependencies};
    use crate::kernel::ProviderError;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn params() -> JobParams {
        JobParams::parse(JobType::ResearchPack, &json!({"topic": "Soil"})).unwrap()
    }

    fn ctx() -> ProcessContext {
        let (reporter, _rx) = progress_channel(Uuid::new_v4());
        ProcessContext::new(reporter, CancellationToken::new())
    }

    #[test]
    fn test_parse_section_accepts_fenced_json() {
        let raw = "```json\n{\"heading\": \"Intro\", \"content\": \" Body \", \"key_points\": [\"a\", \" \"]}\n```";
        let section = parse_section(raw, "Overview").unwrap();
        assert_eq!(section.heading, "Overview");
        assert_eq!(section.content, "Body");
        assert_eq!(section.key_points, vec!["a"]);
    }

    #[test]
    fn test_parse_section_rejects_empty_content() {
        assert!(parse_section(r#"{"heading": "x", "content": ""}"#, "x").is_err());
        assert!(parse_section("not json", "x").is_err());
    }

    #[tokio::test]
    async fn test_generate_sections_writes_every_section_in_order() {
        let test_deps = TestDependencies::new();
        let deps = test_deps.clone().into_server_deps();
        let kind = DocumentKind::research_pack();
        let mut warnings = Vec::new();

        let sections = generate_sections(
            &deps,
            &kind,
            &params(),
            &ResearchContext::default(),
            &ctx(),
            &mut warnings,
        )
        .await
        .unwrap();

        let headings: Vec<_> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(
            headings,
            vec![
                "Overview",
                "Key Concepts",
                "Current Landscape",
                "Practical Applications",
                "Further Reading"
            ]
        );
        assert!(warnings.is_empty());
        // Plan and write per section
        assert_eq!(test_deps.ai.call_count(), 10);
    }

    #[tokio::test]
    async fn test_later_sections_see_the_digest() {
        let test_deps = TestDependencies::new();
        let deps = test_deps.clone().into_server_deps();
        let kind = DocumentKind::research_pack();

        generate_sections(
            &deps,
            &kind,
            &params(),
            &ResearchContext::default(),
            &ctx(),
            &mut Vec::new(),
        )
        .await
        .unwrap();

        let key_concepts = test_deps.ai.calls_containing("Section heading: Key Concepts");
        assert!(!key_concepts.is_empty());
        assert!(key_concepts
            .iter()
            .all(|c| c.user.contains("Mock content about Overview.")));
    }

    #[tokio::test]
    async fn test_unparsable_optional_section_is_dropped_with_warning() {
        let ai = MockAI::new().with_rule("Section heading: Current Landscape", "not json");
        let deps = TestDependencies::new().mock_ai(ai).into_server_deps();
        let kind = DocumentKind::research_pack();
        let mut warnings = Vec::new();

        let sections = generate_sections(
            &deps,
            &kind,
            &params(),
            &ResearchContext::default(),
            &ctx(),
            &mut warnings,
        )
        .await
        .unwrap();

        assert_eq!(sections.len(), 4);
        assert!(sections.iter().all(|s| s.heading != "Current Landscape"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Current Landscape"));
    }

    #[tokio::test]
    async fn test_missing_mandatory_section_is_a_validation_error() {
        let ai = MockAI::new().with_rule("Section heading: Key Concepts", "{}");
        let deps = TestDependencies::new().mock_ai(ai).into_server_deps();

        let err = generate_sections(
            &deps,
            &DocumentKind::research_pack(),
            &params(),
            &ResearchContext::default(),
            &ctx(),
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::ContentValidation(_)));
        assert!(err.to_string().contains("Key Concepts"));
    }

    #[tokio::test]
    async fn test_transient_failure_aborts_the_stage() {
        let ai = MockAI::new().fail_when(
            "Section heading: Further Reading",
            MockFailure::Provider(ProviderError::Timeout { provider: "openai" }),
        );
        let deps = TestDependencies::new().mock_ai(ai).into_server_deps();

        let err = generate_sections(
            &deps,
            &DocumentKind::research_pack(),
            &params(),
            &ResearchContext::default(),
            &ctx(),
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_section() {
        let deps = TestDependencies::new().into_server_deps();
        let ctx = ctx();
        ctx.cancel.cancel();

        let err = generate_sections(
            &deps,
            &DocumentKind::research_pack(),
            &params(),
            &ResearchContext::default(),
            &ctx,
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted(Stage::ContentGeneration)));
    }
}
