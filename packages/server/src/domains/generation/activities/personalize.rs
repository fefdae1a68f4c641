//! Personalization stage: answer the job's follow-up questions.

use tracing::{info, warn};

use crate::common::document::{QuestionAnswer, Section};
use crate::domains::generation::error::{PipelineError, Stage};
use crate::domains::generation::prompts::{answer_prompt, ANSWER_SYSTEM_PROMPT};
use crate::kernel::jobs::{JobParams, ProcessContext};
use crate::kernel::{CompletionOptions, ServerDeps};

/// Characters of the written document passed along with each question.
const DOCUMENT_CONTEXT_CHARS: usize = 8_000;

/// Answer every question in `params` against the written sections.
///
/// A question whose answer fails is logged, skipped and noted in `warnings`;
/// the stage itself only stops for cancellation.
pub async fn answer_questions(
    deps: &ServerDeps,
    params: &JobParams,
    sections: &[Section],
    ctx: &ProcessContext,
    warnings: &mut Vec<String>,
) -> Result<Vec<QuestionAnswer>, PipelineError> {
    let questions = params.questions();
    if questions.is_empty() {
        return Ok(Vec::new());
    }

    let document = document_text(sections);
    let mut answers = Vec::with_capacity(questions.len());

    for question in questions {
        if ctx.is_cancelled() {
            return Err(PipelineError::Interrupted(Stage::Personalization));
        }

        let prompt = answer_prompt(params, &document, question);
        match deps
            .ai
            .generate(ANSWER_SYSTEM_PROMPT, &prompt, &CompletionOptions::default())
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => answers.push(QuestionAnswer {
                question: question.trim().to_string(),
                answer: answer.trim().to_string(),
            }),
            Ok(_) => {
                warn!(question = %question, "empty answer, skipping question");
                warnings.push(format!("question skipped (empty answer): {}", question.trim()));
            }
            Err(e) => {
                warn!(question = %question, error = %e, "failed to answer question, skipping");
                warnings.push(format!("question skipped: {}", question.trim()));
            }
        }
    }

    info!(
        asked = questions.len(),
        answered = answers.len(),
        "personalization complete"
    );
    Ok(answers)
}

fn document_text(sections: &[Section]) -> String {
    let text = sections
        .iter()
        .map(|s| format!("## {}\n{}", s.heading, s.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    text.chars().take(DOCUMENT_CONTEXT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{JobType, ProgressReporter};
    use crate::kernel::test_dependencies::{MockAI, MockFailure, TestDependencies};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> ProcessContext {
        ProcessContext::new(ProgressReporter::noop(Uuid::new_v4()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_failed_question_is_skipped() {
        let ai = MockAI::new()
            .fail_when("Question: Why?", MockFailure::Other("boom".into()))
            .with_rule("Question: How?", "Like this.");
        let deps = TestDependencies::new().mock_ai(ai).into_server_deps();
        let params = JobParams::parse(
            JobType::ResearchPack,
            &json!({"topic": "Soil", "questions": ["Why?", "How?"]}),
        )
        .unwrap();
        let mut warnings = Vec::new();

        let answers = answer_questions(
            &deps,
            &params,
            &[Section::new("Overview", "Soil.")],
            &ctx(),
            &mut warnings,
        )
        .await
        .unwrap();

        assert_eq!(
            answers,
            vec![QuestionAnswer {
                question: "How?".into(),
                answer: "Like this.".into()
            }]
        );
        assert_eq!(warnings, vec!["question skipped: Why?"]);
    }

    #[tokio::test]
    async fn test_no_questions_makes_no_calls() {
        let test_deps = TestDependencies::new();
        let deps = test_deps.clone().into_server_deps();
        let params = JobParams::parse(JobType::ResearchPack, &json!({"topic": "Soil"})).unwrap();

        let answers = answer_questions(&deps, &params, &[], &ctx(), &mut Vec::new())
            .await
            .unwrap();

        assert!(answers.is_empty());
        assert_eq!(test_deps.ai.call_count(), 0);
    }
}
