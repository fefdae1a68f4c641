//! Generation activities - one module per pipeline stage.

pub mod content;
pub mod enhance;
pub mod personalize;
pub mod publish;
pub mod research;

pub use content::{generate_sections, parse_section};
pub use enhance::enhance_sections;
pub use personalize::answer_questions;
pub use publish::{convert_document, format_document, upload_artifacts};
pub use research::{gather_research, ResearchContext};
