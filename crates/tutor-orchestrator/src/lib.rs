//! # tutor-orchestrator
//!
//! Refinement controller for the tutor loop.
//!
//! This crate provides:
//! - A pure phase machine (`transition`) for teacher -> students -> reward ->
//!   stop decision rounds and the terminal grading phase
//! - `RefinementController`, which executes the machine's actions against
//!   the agents and judges and commits each round atomically
//! - A zero-shot baseline run and pairwise comparison against it
//! - Optional markdown activity log and a per-run summary

mod activity_logger;
mod controller;
mod state_machine;
mod summary;

pub use activity_logger::{ActivityLogger, ACTIVITY_LOG_FILE};
pub use controller::{RefinementController, BASELINE_LABEL, REFINED_LABEL};
pub use state_machine::{transition, Action, Event, Phase};
pub use summary::RunSummary;
