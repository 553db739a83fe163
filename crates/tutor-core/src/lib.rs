//! # tutor-core
//!
//! Core types for the tutor refinement loop.
//!
//! A teacher agent explains a question, a panel of student personas critiques
//! the explanation, judges score and rank the critiques, and a stopping
//! policy decides whether another round is worth it. This crate holds the
//! data model those pieces exchange, the error taxonomy, and the run
//! configuration.

pub mod config;
mod error;
pub mod fail_open;
pub mod telemetry;
mod types;

pub use config::{ModelConfig, RankingConfig, RunConfig, TeacherConfig, TutorConfig};
pub use error::{Result, TutorError};
pub use types::*;
