//! Target section layouts per job type.

use crate::kernel::jobs::{JobParams, JobType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpec {
    pub heading: String,
    /// A job fails when a mandatory section cannot be produced.
    pub mandatory: bool,
    pub guidance: String,
}

impl SectionSpec {
    fn new(heading: &str, mandatory: bool, guidance: &str) -> Self {
        Self {
            heading: heading.to_string(),
            mandatory,
            guidance: guidance.to_string(),
        }
    }
}

/// The document a job type produces: its label and ordered sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentKind {
    pub job_type: JobType,
    pub label: &'static str,
    pub sections: Vec<SectionSpec>,
}

impl DocumentKind {
    pub fn research_pack() -> Self {
        Self {
            job_type: JobType::ResearchPack,
            label: "Research Pack",
            sections: vec![
                SectionSpec::new(
                    "Overview",
                    true,
                    "Introduce the topic, its scope and why it matters.",
                ),
                SectionSpec::new(
                    "Key Concepts",
                    true,
                    "Define the core ideas and vocabulary a newcomer needs.",
                ),
                SectionSpec::new(
                    "Current Landscape",
                    false,
                    "Describe the present state of the field, main actors and open debates.",
                ),
                SectionSpec::new(
                    "Practical Applications",
                    false,
                    "Show concrete uses, with examples where possible.",
                ),
                SectionSpec::new(
                    "Further Reading",
                    false,
                    "Point to sources and directions for deeper study.",
                ),
            ],
        }
    }

    pub fn review_paper() -> Self {
        Self {
            job_type: JobType::ReviewPaper,
            label: "Review Paper",
            sections: vec![
                SectionSpec::new(
                    "Abstract",
                    true,
                    "Summarize the purpose, scope and main findings in one paragraph.",
                ),
                SectionSpec::new(
                    "Introduction",
                    true,
                    "Frame the research question and the structure of the review.",
                ),
                SectionSpec::new(
                    "Literature Review",
                    false,
                    "Synthesize the existing work, grouping it by theme.",
                ),
                SectionSpec::new(
                    "Discussion",
                    false,
                    "Compare findings, note gaps and disagreements.",
                ),
                SectionSpec::new(
                    "Conclusion",
                    true,
                    "State what the literature supports and what remains open.",
                ),
            ],
        }
    }

    pub fn for_job_type(job_type: JobType) -> Self {
        match job_type {
            JobType::ResearchPack => Self::research_pack(),
            JobType::ReviewPaper => Self::review_paper(),
        }
    }

    /// The layout for a specific job, honoring a section override.
    pub fn plan(params: &JobParams) -> Self {
        let kind = Self::for_job_type(params.job_type());
        match params.section_override() {
            Some(headings) => kind.with_sections(headings),
            None => kind,
        }
    }

    /// Replace the sections with `headings`; the first one becomes mandatory.
    pub fn with_sections(mut self, headings: &[String]) -> Self {
        self.sections = headings
            .iter()
            .enumerate()
            .map(|(i, heading)| {
                let heading = heading.trim();
                self.sections
                    .iter()
                    .find(|s| s.heading.eq_ignore_ascii_case(heading))
                    .map(|known| SectionSpec {
                        mandatory: i == 0,
                        ..known.clone()
                    })
                    .unwrap_or_else(|| {
                        SectionSpec::new(
                            heading,
                            i == 0,
                            "Cover this part of the topic thoroughly and concretely.",
                        )
                    })
            })
            .collect();
        self
    }

    pub fn mandatory_headings(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.mandatory)
            .map(|s| s.heading.as_str())
            .collect()
    }
}
