//! Enhancement stage: add callouts to each section.

use tracing::{info, warn};

use crate::common::document::Section;
use crate::domains::generation::error::{PipelineError, Stage};
use crate::kernel::jobs::ProcessContext;
use crate::kernel::BaseEnhancer;

/// Run `enhancer` over every section. A section whose enhancement fails is
/// kept as written.
pub async fn enhance_sections(
    enhancer: &dyn BaseEnhancer,
    topic: &str,
    sections: Vec<Section>,
    ctx: &ProcessContext,
    warnings: &mut Vec<String>,
) -> Result<Vec<Section>, PipelineError> {
    let mut enhanced = Vec::with_capacity(sections.len());
    let mut failed = 0usize;

    for section in sections {
        if ctx.is_cancelled() {
            return Err(PipelineError::Interrupted(Stage::Enhancement));
        }

        match enhancer.enhance(topic, &section).await {
            Ok(section) => enhanced.push(section),
            Err(e) => {
                warn!(section = %section.heading, error = %e, "enhancement failed, keeping section");
                failed += 1;
                enhanced.push(section);
            }
        }
    }

    if failed > 0 {
        warnings.push(format!("enhancement failed for {} section(s)", failed));
    }
    info!(sections = enhanced.len(), failed, "enhancement complete");
    Ok(enhanced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::ProgressReporter;
    use crate::kernel::test_dependencies::MockEnhancer;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> ProcessContext {
        ProcessContext::new(ProgressReporter::noop(Uuid::new_v4()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_enhance_adds_callouts() {
        let sections = enhance_sections(
            &MockEnhancer::new(),
            "soil",
            vec![Section::new("Overview", "Text")],
            &ctx(),
            &mut Vec::new(),
        )
        .await
        .unwrap();

        assert_eq!(sections[0].callouts.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_enhancement_keeps_sections() {
        let mut warnings = Vec::new();
        let sections = enhance_sections(
            &MockEnhancer::failing(),
            "soil",
            vec![Section::new("A", "a"), Section::new("B", "b")],
            &ctx(),
            &mut warnings,
        )
        .await
        .unwrap();

        assert_eq!(sections, vec![Section::new("A", "a"), Section::new("B", "b")]);
        assert_eq!(warnings, vec!["enhancement failed for 2 section(s)"]);
    }
}
