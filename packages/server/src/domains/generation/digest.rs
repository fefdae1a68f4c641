//! Running digest of the sections already written for a job.
//!
//! Every later prompt carries the digest so the model can avoid repeating
//! earlier claims without re-reading whole sections.

use crate::common::document::Section;

const SUMMARY_CHARS: usize = 280;
const MAX_KEY_POINTS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct SectionDigest {
    entries: Vec<String>,
}

impl SectionDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, section: &Section) {
        let mut entry = format!(
            "- {}: {}",
            section.heading,
            summarize(&section.content, SUMMARY_CHARS)
        );
        if !section.key_points.is_empty() {
            let points: Vec<&str> = section
                .key_points
                .iter()
                .take(MAX_KEY_POINTS)
                .map(|p| p.trim())
                .collect();
            entry.push_str(&format!(" Claims made: {}.", points.join("; ")));
        }
        self.entries.push(entry);
    }

    /// Prompt block listing what has been covered.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "No sections have been written yet.".to_string();
        }
        format!(
            "Sections already written (do not repeat their claims):\n{}",
            self.entries.join("\n")
        )
    }
}

/// First `max_chars` characters of `text` on one line, cut at a word boundary.
fn summarize(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    let cut = match cut.rfind(' ') {
        Some(pos) if pos > max_chars / 2 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_digest_says_so() {
        assert!(SectionDigest::new().render().contains("No sections"));
    }

    #[test]
    fn test_digest_lists_sections_and_claims() {
        let mut digest = SectionDigest::new();
        let mut section = Section::new("Overview", "Soil is\nalive.");
        section.key_points = vec!["Soil holds carbon".into()];
        digest.push(&section);

        let rendered = digest.render();
        assert!(rendered.contains("- Overview: Soil is alive."));
        assert!(rendered.contains("Soil holds carbon"));
        assert_eq!(digest.len(), 1);
    }

    #[test]
    fn test_summarize_cuts_long_text_on_word_boundary() {
        let text = "word ".repeat(200);
        let summary = summarize(&text, 50);
        assert!(summary.ends_with('…'));
        assert!(summary.chars().count() <= 51);
        assert!(!summary.contains("wor…"));
    }
}
