//! # tutor-scoring
//!
//! Judging, ranking and stopping for the tutor loop.
//!
//! - `judge`: severity (0-3) and uniqueness (0-1) judges behind traits, with
//!   an LCS similarity heuristic as the uniqueness fallback
//! - `ranking`: composite scoring, ranking and the teacher-facing digest
//! - `stopping`: the pure CONTINUE/STOP policy
//! - `grading`: explanation and pairwise judges for the terminal phase

pub mod grading;
pub mod judge;
pub mod ranking;
pub mod stopping;

pub use grading::{
    grade_answer, ExplanationJudge, PairwiseJudge, PairwiseVerdict, PairwiseWinner,
};
pub use judge::{
    FallbackUniquenessJudge, HeuristicUniquenessJudge, LlmSeverityJudge, LlmUniquenessJudge,
    SeverityJudge, SeverityVerdict, UniquenessJudge, UniquenessVerdict,
};
pub use ranking::{RankingEngine, RankingOutcome, NO_SIGNIFICANT_ISSUES};
pub use stopping::{decide, stop_level};
