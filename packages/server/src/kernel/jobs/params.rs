//! Typed per-job-type parameters.
//!
//! Params are stored as JSON on the job row but are always validated against
//! the schema for their `job_type` before a job is accepted, so a malformed
//! payload never reaches a worker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::{Job, JobType};

const MAX_TOPIC_LEN: usize = 500;
const MAX_QUESTIONS: usize = 10;
const MAX_SECTIONS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {job_type} params: {reason}")]
pub struct ParamsError {
    pub job_type: JobType,
    pub reason: String,
}

impl ParamsError {
    fn new(job_type: JobType, reason: impl Into<String>) -> Self {
        Self {
            job_type,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResearchPackParams {
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    /// Overrides the default section list; the first entry becomes mandatory.
    #[serde(default)]
    pub sections: Option<Vec<String>>,
    /// Follow-up questions answered in the personalization stage.
    #[serde(default)]
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    #[default]
    Apa,
    Mla,
    Chicago,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewPaperParams {
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub citation_style: CitationStyle,
}

/// Parameters of a job, tagged by job type.
#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    ResearchPack(ResearchPackParams),
    ReviewPaper(ReviewPaperParams),
}

impl JobParams {
    /// Parse and validate raw params for `job_type`.
    pub fn parse(job_type: JobType, raw: &serde_json::Value) -> Result<Self, ParamsError> {
        let params = match job_type {
            JobType::ResearchPack => serde_json::from_value(raw.clone())
                .map(JobParams::ResearchPack),
            JobType::ReviewPaper => serde_json::from_value(raw.clone())
                .map(JobParams::ReviewPaper),
        }
        .map_err(|e| ParamsError::new(job_type, e.to_string()))?;

        params.validate()?;
        Ok(params)
    }

    /// Parse the params stored on a job.
    pub fn from_job(job: &Job) -> Result<Self, ParamsError> {
        Self::parse(job.job_type, &job.params)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::ResearchPack(_) => JobType::ResearchPack,
            JobParams::ReviewPaper(_) => JobType::ReviewPaper,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            JobParams::ResearchPack(p) => &p.topic,
            JobParams::ReviewPaper(p) => &p.topic,
        }
    }

    pub fn audience(&self) -> Option<&str> {
        match self {
            JobParams::ResearchPack(p) => p.audience.as_deref(),
            JobParams::ReviewPaper(p) => p.audience.as_deref(),
        }
    }

    pub fn questions(&self) -> &[String] {
        match self {
            JobParams::ResearchPack(p) => &p.questions,
            JobParams::ReviewPaper(p) => &p.questions,
        }
    }

    pub fn section_override(&self) -> Option<&[String]> {
        match self {
            JobParams::ResearchPack(p) => p.sections.as_deref(),
            JobParams::ReviewPaper(_) => None,
        }
    }

    fn validate(&self) -> Result<(), ParamsError> {
        let job_type = self.job_type();
        let topic = self.topic().trim();

        if topic.is_empty() {
            return Err(ParamsError::new(job_type, "topic must not be blank"));
        }
        if topic.chars().count() > MAX_TOPIC_LEN {
            return Err(ParamsError::new(
                job_type,
                format!("topic exceeds {} characters", MAX_TOPIC_LEN),
            ));
        }
        if self.questions().len() > MAX_QUESTIONS {
            return Err(ParamsError::new(
                job_type,
                format!("at most {} questions allowed", MAX_QUESTIONS),
            ));
        }
        if self.questions().iter().any(|q| q.trim().is_empty()) {
            return Err(ParamsError::new(job_type, "questions must not be blank"));
        }

        if let Some(sections) = self.section_override() {
            if sections.is_empty() || sections.len() > MAX_SECTIONS {
                return Err(ParamsError::new(
                    job_type,
                    format!("sections must list between 1 and {} headings", MAX_SECTIONS),
                ));
            }
            if sections.iter().any(|s| s.trim().is_empty()) {
                return Err(ParamsError::new(job_type, "section headings must not be blank"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_research_pack_params_parse() {
        let params = JobParams::parse(JobType::ResearchPack, &json!({"topic": "X"})).unwrap();
        assert_eq!(params.topic(), "X");
        assert!(params.questions().is_empty());
        assert!(params.section_override().is_none());
    }

    #[test]
    fn review_paper_defaults_to_apa() {
        let params = JobParams::parse(JobType::ReviewPaper, &json!({"topic": "Soil"})).unwrap();
        match params {
            JobParams::ReviewPaper(p) => assert_eq!(p.citation_style, CitationStyle::Apa),
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn blank_topic_is_rejected() {
        let err = JobParams::parse(JobType::ResearchPack, &json!({"topic": "   "})).unwrap_err();
        assert!(err.reason.contains("blank"));
    }

    #[test]
    fn missing_topic_is_rejected() {
        assert!(JobParams::parse(JobType::ReviewPaper, &json!({"questions": []})).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err =
            JobParams::parse(JobType::ResearchPack, &json!({"topic": "X", "colour": "red"}))
                .unwrap_err();
        assert_eq!(err.job_type, JobType::ResearchPack);
    }

    #[test]
    fn sections_are_not_accepted_for_review_papers() {
        let raw = json!({"topic": "X", "sections": ["Intro"]});
        assert!(JobParams::parse(JobType::ReviewPaper, &raw).is_err());
    }

    #[test]
    fn empty_section_override_is_rejected() {
        let raw = json!({"topic": "X", "sections": []});
        assert!(JobParams::parse(JobType::ResearchPack, &raw).is_err());
    }

    #[test]
    fn too_many_questions_are_rejected() {
        let questions: Vec<String> = (0..11).map(|i| format!("q{}", i)).collect();
        let raw = json!({"topic": "X", "questions": questions});
        assert!(JobParams::parse(JobType::ResearchPack, &raw).is_err());
    }
}
