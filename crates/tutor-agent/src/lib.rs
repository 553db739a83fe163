//! # tutor-agent
//!
//! Text-generation client and the agents built on it.
//!
//! - `TextGenerator`: the stateless call contract every agent depends on,
//!   with an Anthropic HTTP implementation and a scripted one for tests
//! - Structured-output parsing with a fallback chain
//! - Teacher, student persona and single-answer agents
//!
//! Every call is independent: agents carry no conversation history, only
//! what the controller passes into each prompt.

mod answer;
mod auth;
mod client;
pub mod parsing;
mod scripted;
mod student;
mod teacher;
mod types;

pub use answer::{parse_answer, AnswerAgent, SingleAnswer};
pub use auth::{get_api_key, DEFAULT_API_KEY_ENV};
pub use client::{AnthropicClient, TextGenerator};
pub use parsing::extract_json;
pub use scripted::ScriptedGenerator;
pub use student::{competitive_context, parse_critique, StudentAgent, COMPETITIVE_CONTEXT_ROUNDS};
pub use teacher::{build_teacher_prompt, TeacherAgent, TeachingMode};
pub use types::*;
