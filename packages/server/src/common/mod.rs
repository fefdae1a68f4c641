// Common types shared across the application

pub mod document;

pub use document::*;
