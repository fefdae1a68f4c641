//! Prompt builders for the generation stages.

use crate::kernel::jobs::{CitationStyle, JobParams};

use super::activities::research::ResearchContext;
use super::digest::SectionDigest;
use super::models::{DocumentKind, SectionSpec};

pub const WRITER_SYSTEM_PROMPT: &str = "You are an expert technical writer producing \
educational documents. Write accurate, concrete prose grounded in the research provided. \
Prefer plain language and short paragraphs. Never invent sources.";

pub const PLANNER_SYSTEM_PROMPT: &str = "You plan sections of educational documents. \
Reply with a short bullet outline (3 to 6 bullets) of what the section should cover. \
No prose, no headings.";

pub const ANSWER_SYSTEM_PROMPT: &str = "You answer a reader's follow-up question about a \
document you helped write. Answer in one or two short paragraphs, using only what the \
document and research support. Say so plainly when they do not cover the question.";

/// Inputs shared by the planning and writing prompts of one section.
pub struct SectionPrompt<'a> {
    pub kind: &'a DocumentKind,
    pub spec: &'a SectionSpec,
    pub params: &'a JobParams,
    pub research: &'a ResearchContext,
    pub digest: &'a SectionDigest,
}

impl SectionPrompt<'_> {
    fn header(&self) -> String {
        let mut header = format!(
            "Document: {} on \"{}\"\nAudience: {}\n",
            self.kind.label,
            self.params.topic(),
            self.params.audience().unwrap_or("general readers"),
        );
        if let JobParams::ReviewPaper(p) = self.params {
            header.push_str(&format!(
                "Citation style: {}\n",
                citation_style_name(p.citation_style)
            ));
        }
        header.push_str(&format!("Section heading: {}\n", self.spec.heading));
        header.push_str(&format!("Section goal: {}\n", self.spec.guidance));
        header
    }

    /// Planning pass: a plain-text outline for the section.
    pub fn plan(&self) -> String {
        format!(
            "{}\n{}\n\n{}\n\nOutline this section.",
            self.header(),
            self.digest.render(),
            self.research.prompt_block(),
        )
    }

    /// Writing pass: the section as a JSON object.
    pub fn write(&self, outline: &str) -> String {
        format!(
            "{}\n{}\n\n{}\n\nOutline to follow:\n{}\n\n\
             Write this section. Return a JSON object with keys \
             \"heading\" (string), \"content\" (markdown string, no headings) and \
             \"key_points\" (array of short strings).",
            self.header(),
            self.digest.render(),
            self.research.prompt_block(),
            outline.trim(),
        )
    }
}

/// Prompt answering one follow-up question against the finished sections.
pub fn answer_prompt(params: &JobParams, document_text: &str, question: &str) -> String {
    format!(
        "Topic: {}\nAudience: {}\n\nDocument:\n{}\n\nQuestion: {}",
        params.topic(),
        params.audience().unwrap_or("general readers"),
        document_text,
        question.trim(),
    )
}

fn citation_style_name(style: CitationStyle) -> &'static str {
    match style {
        CitationStyle::Apa => "APA",
        CitationStyle::Mla => "MLA",
        CitationStyle::Chicago => "Chicago",
    }
}
