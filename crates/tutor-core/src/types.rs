//! Core type definitions for the refinement loop

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{Result, TutorError};

/// Answer labels for four-option questions
pub const OPTION_LETTERS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Issue text recorded in score history when a persona flagged nothing
pub const NO_ISSUE_FOUND: &str = "No issue found";

/// Agent roles, used for model selection and request routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Teacher,
    Student,
    SeverityJudge,
    UniquenessJudge,
    Answerer,
    ExplanationJudge,
    PairwiseJudge,
}

impl AgentRole {
    /// Roles that share the judge model
    pub fn is_judge(&self) -> bool {
        matches!(
            self,
            Self::SeverityJudge | Self::UniquenessJudge | Self::ExplanationJudge | Self::PairwiseJudge
        )
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Teacher => write!(f, "teacher"),
            Self::Student => write!(f, "student"),
            Self::SeverityJudge => write!(f, "severity_judge"),
            Self::UniquenessJudge => write!(f, "uniqueness_judge"),
            Self::Answerer => write!(f, "answerer"),
            Self::ExplanationJudge => write!(f, "explanation_judge"),
            Self::PairwiseJudge => write!(f, "pairwise_judge"),
        }
    }
}

/// A simulated critic with a fixed evaluation lens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identifier (e.g. "advanced")
    pub id: String,
    /// Behavioral guideline, used only as a prompt fragment
    pub guidelines: String,
}

impl Persona {
    pub fn new(id: impl Into<String>, guidelines: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            guidelines: guidelines.into(),
        }
    }
}

/// One persona's critique for one round
///
/// `issue == None` means "no issue found", which is a valid outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub persona: String,
    pub issue: Option<String>,
    pub quote: Option<String>,
}

impl Critique {
    pub fn new(persona: impl Into<String>, issue: Option<String>, quote: Option<String>) -> Self {
        Self {
            persona: persona.into(),
            issue,
            quote,
        }
    }

    /// A critique that flags nothing
    pub fn no_issue(persona: impl Into<String>) -> Self {
        Self::new(persona, None, None)
    }

    pub fn has_issue(&self) -> bool {
        self.issue.is_some()
    }
}

/// What a student returned, validated at the parse boundary
///
/// `Empty` is a feedback object with no content at all (`{}`), which the
/// stopping policy treats differently from an explicit "no issue".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CritiqueMessage {
    Empty { persona: String },
    Feedback(Critique),
}

impl CritiqueMessage {
    pub fn persona(&self) -> &str {
        match self {
            Self::Empty { persona } => persona,
            Self::Feedback(critique) => &critique.persona,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty { .. })
    }

    /// View as a critique; empty feedback flags no issue
    pub fn to_critique(&self) -> Critique {
        match self {
            Self::Empty { persona } => Critique::no_issue(persona.clone()),
            Self::Feedback(critique) => critique.clone(),
        }
    }
}

/// How a judged critique's uniqueness was obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessSource {
    /// No issue, so no judging happened
    #[default]
    NotJudged,
    /// No other persona raised an issue; unique by convention
    NoPeers,
    /// Judged by the text-generation service
    Judge,
    /// Judged by the local string-similarity heuristic
    Heuristic,
}

/// A critique enriched with judge-assigned severity, uniqueness and rank
///
/// Created fresh every round by the ranking engine and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgedCritique {
    pub persona: String,
    pub issue: Option<String>,
    pub quote: Option<String>,
    /// 0 (invalid/trivial) to 3 (critical)
    pub validated_severity: u8,
    pub severity_justification: String,
    /// 0.0 (duplicate) to 1.0 (distinct)
    pub uniqueness: f64,
    /// uniqueness * 3.0
    pub uniqueness_bonus: f64,
    pub score: f64,
    /// 1-based position in the ranked round
    pub rank: usize,
    #[serde(default)]
    pub uniqueness_source: UniquenessSource,
}

/// Per-persona, append-only record of one round's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistoryEntry {
    pub iteration: usize,
    pub score: f64,
    pub rank: usize,
    pub issue: String,
    pub validated_severity: u8,
    pub severity_justification: String,
    pub uniqueness: f64,
    pub uniqueness_bonus: f64,
}

impl ScoreHistoryEntry {
    pub fn from_judged(iteration: usize, judged: &JudgedCritique) -> Self {
        Self {
            iteration,
            score: judged.score,
            rank: judged.rank,
            issue: judged
                .issue
                .clone()
                .unwrap_or_else(|| NO_ISSUE_FOUND.to_string()),
            validated_severity: judged.validated_severity,
            severity_justification: judged.severity_justification.clone(),
            uniqueness: judged.uniqueness,
            uniqueness_bonus: judged.uniqueness_bonus,
        }
    }
}

/// Score history keyed by persona id
pub type ScoreHistory = BTreeMap<String, Vec<ScoreHistoryEntry>>;

/// Immutable stopping-policy parameters for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopConfig {
    /// Only used by the superseded threshold policy
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_stagnation_window")]
    pub stagnation_window: usize,
    /// Only used by the superseded threshold policy
    #[serde(default = "default_stagnation_min_improvement")]
    pub stagnation_min_improvement: f64,
}

fn default_threshold() -> f64 {
    0.7
}

fn default_max_iterations() -> usize {
    5
}

fn default_stagnation_window() -> usize {
    2
}

fn default_stagnation_min_improvement() -> f64 {
    0.02
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_iterations: default_max_iterations(),
            stagnation_window: default_stagnation_window(),
            stagnation_min_improvement: default_stagnation_min_improvement(),
        }
    }
}

/// Outcome of the stopping policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Continue,
    Stop,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "CONTINUE"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

/// Decision plus a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopDecision {
    pub decision: Decision,
    pub reason: String,
}

impl StopDecision {
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Stop,
            reason: reason.into(),
        }
    }

    pub fn continue_with(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Continue,
            reason: reason.into(),
        }
    }

    pub fn is_stop(&self) -> bool {
        self.decision == Decision::Stop
    }
}

/// The teacher's explanation for one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherOutput {
    pub iteration: usize,
    pub explanation: String,
}

/// Composite score of one persona in one round, in persona order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaScore {
    pub persona: String,
    pub score: f64,
    pub validated_severity: u8,
}

/// Immutable record of one completed round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub iteration: usize,
    pub explanation: String,
    pub student_responses: Vec<CritiqueMessage>,
    pub reward_scores: Vec<PersonaScore>,
    /// Ranked, highest score first
    pub critique_rankings: Vec<JudgedCritique>,
    pub filtered_critiques: Vec<JudgedCritique>,
    pub digest: String,
    pub stop: StopDecision,
    pub completed_at: DateTime<Utc>,
}

impl RoundSnapshot {
    /// Highest composite score of the round, 0.0 when nobody scored
    pub fn top_score(&self) -> f64 {
        self.critique_rankings
            .first()
            .map(|c| c.score)
            .unwrap_or(0.0)
    }
}

/// Raw dataset entry before option shuffling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawQuestion {
    pub id: String,
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
    #[serde(default)]
    pub expert_explanation: String,
}

/// A four-option question graded at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub question: String,
    /// Labelled options, "A) ..." through "D) ..."
    pub options: Vec<String>,
    pub correct_letter: char,
    pub expert_explanation: String,
}

impl QuestionRecord {
    /// Build a record with a deterministic, seed-driven option order
    pub fn from_raw(raw: &RawQuestion, seed: u64) -> Result<Self> {
        if raw.question.trim().is_empty() {
            return Err(TutorError::Other(format!("question {} has no text", raw.id)));
        }
        if raw.incorrect_answers.len() < 3 {
            return Err(TutorError::Other(format!(
                "question {} needs three incorrect answers, has {}",
                raw.id,
                raw.incorrect_answers.len()
            )));
        }

        let mut items: Vec<(bool, &str)> = vec![(true, raw.correct_answer.trim())];
        items.extend(
            raw.incorrect_answers
                .iter()
                .take(3)
                .map(|answer| (false, answer.trim())),
        );

        let mut rng = StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);

        let options = items
            .iter()
            .zip(OPTION_LETTERS)
            .map(|((_, text), letter)| format!("{}) {}", letter, text))
            .collect();
        let correct_letter = items
            .iter()
            .zip(OPTION_LETTERS)
            .find(|((correct, _), _)| *correct)
            .map(|(_, letter)| letter)
            .unwrap_or('A');

        Ok(Self {
            id: raw.id.clone(),
            question: raw.question.trim().to_string(),
            options,
            correct_letter,
            expert_explanation: raw.expert_explanation.trim().to_string(),
        })
    }

    /// Question text followed by its options, one per line
    pub fn render(&self) -> String {
        let mut text = self.question.clone();
        for option in &self.options {
            text.push('\n');
            text.push_str(option);
        }
        text
    }
}

/// Outcome of the terminal grading phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResults {
    pub answer: char,
    pub correct_letter: char,
    pub is_correct: bool,
    /// 1-5 similarity to the expert explanation, 0 when the answerer gave none
    pub explanation_score: u8,
}

/// The single mutable aggregate threaded through the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementState {
    pub run_id: Uuid,
    pub explanation: String,
    pub student_responses: Vec<CritiqueMessage>,
    pub reward_scores: Vec<PersonaScore>,
    pub filtered_critiques: Vec<JudgedCritique>,
    pub critique_rankings: Vec<JudgedCritique>,
    /// Digest forwarded to the next teacher visit
    pub digest: Option<String>,
    pub student_score_history: ScoreHistory,
    pub history: Vec<RoundSnapshot>,
    pub iteration: usize,
    pub decision: Option<Decision>,
    pub reason: Option<String>,
    pub gpqa_question: Option<QuestionRecord>,
    pub single_answer: Option<String>,
    pub single_explanation: Option<String>,
    pub quiz_results: Option<QuizResults>,
}

impl RefinementState {
    /// Fresh state for one question
    pub fn new(question: QuestionRecord) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            gpqa_question: Some(question),
            ..Default::default()
        }
    }

    /// Whether the loop has reached its terminal decision
    pub fn is_stopped(&self) -> bool {
        self.decision == Some(Decision::Stop)
    }

    /// The question, or a precondition error naming the caller
    pub fn require_question(&self, caller: &str) -> Result<&QuestionRecord> {
        self.gpqa_question.as_ref().ok_or_else(|| {
            TutorError::MissingState(format!("gpqa_question not found in state ({})", caller))
        })
    }

    /// Commit a completed round
    ///
    /// Everything the round produced lands at once, so an abandoned round
    /// never leaves partial state behind.
    pub fn commit_round(&mut self, snapshot: RoundSnapshot, history_entries: Vec<(String, ScoreHistoryEntry)>) {
        self.iteration = snapshot.iteration;
        self.explanation = snapshot.explanation.clone();
        self.student_responses = snapshot.student_responses.clone();
        self.reward_scores = snapshot.reward_scores.clone();
        self.critique_rankings = snapshot.critique_rankings.clone();
        self.filtered_critiques = snapshot.filtered_critiques.clone();
        self.digest = Some(snapshot.digest.clone());
        self.decision = Some(snapshot.stop.decision);
        self.reason = Some(snapshot.stop.reason.clone());

        for (persona, entry) in history_entries {
            self.student_score_history
                .entry(persona)
                .or_default()
                .push(entry);
        }

        self.history.push(snapshot);
    }
}
