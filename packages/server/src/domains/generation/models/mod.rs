pub mod document_kind;
pub mod generation_result;

pub use document_kind::{DocumentKind, SectionSpec};
pub use generation_result::{Artifact, GenerationResult};
