// Document Generation Service - Core
//
// This crate provides the job queue, the polling worker and the staged
// document generation pipeline behind the `worker` and `jobctl` binaries.
// Infrastructure lives in kernel/, job-type specific processing in domains/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
