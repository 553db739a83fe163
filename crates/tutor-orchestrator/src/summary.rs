//! Per-run summary derived from a finished state

use serde::{Deserialize, Serialize};
use tutor_core::{Decision, QuizResults, RefinementState, UniquenessSource};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub question_id: Option<String>,
    pub rounds: usize,
    pub decision: Option<Decision>,
    pub reason: Option<String>,
    /// Top composite score per round, oldest first
    pub top_scores: Vec<f64>,
    /// Rounds in which at least one persona returned `{}`
    pub rounds_with_empty_feedback: usize,
    pub severity_judge_calls: usize,
    pub uniqueness_judge_calls: usize,
    pub heuristic_fallbacks: usize,
    pub quiz: Option<QuizResults>,
}

impl RunSummary {
    pub fn from_state(state: &RefinementState) -> Self {
        let judged = state.history.iter().flat_map(|r| r.critique_rankings.iter());

        let mut severity_judge_calls = 0;
        let mut uniqueness_judge_calls = 0;
        let mut heuristic_fallbacks = 0;
        for critique in judged {
            if critique.issue.is_some() {
                severity_judge_calls += 1;
            }
            match critique.uniqueness_source {
                UniquenessSource::Judge => uniqueness_judge_calls += 1,
                UniquenessSource::Heuristic => {
                    uniqueness_judge_calls += 1;
                    heuristic_fallbacks += 1;
                }
                UniquenessSource::NotJudged | UniquenessSource::NoPeers => {}
            }
        }

        Self {
            run_id: state.run_id,
            question_id: state.gpqa_question.as_ref().map(|q| q.id.clone()),
            rounds: state.history.len(),
            decision: state.decision,
            reason: state.reason.clone(),
            top_scores: state.history.iter().map(|r| r.top_score()).collect(),
            rounds_with_empty_feedback: state
                .history
                .iter()
                .filter(|r| r.student_responses.iter().any(|m| m.is_empty()))
                .count(),
            severity_judge_calls,
            uniqueness_judge_calls,
            heuristic_fallbacks,
            quiz: state.quiz_results.clone(),
        }
    }

    /// Whether the final answer was correct, if grading ran
    pub fn is_correct(&self) -> Option<bool> {
        self.quiz.as_ref().map(|q| q.is_correct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tutor_core::{
        Critique, CritiqueMessage, JudgedCritique, PersonaScore, RoundSnapshot, StopDecision,
    };

    fn judged(persona: &str, issue: Option<&str>, score: f64, source: UniquenessSource) -> JudgedCritique {
        JudgedCritique {
            persona: persona.to_string(),
            issue: issue.map(str::to_string),
            quote: None,
            validated_severity: if issue.is_some() { 2 } else { 0 },
            severity_justification: String::new(),
            uniqueness: 0.5,
            uniqueness_bonus: 1.5,
            score,
            rank: 1,
            uniqueness_source: source,
        }
    }

    fn round(iteration: usize, critiques: Vec<JudgedCritique>, empty: bool) -> RoundSnapshot {
        let mut responses: Vec<CritiqueMessage> = critiques
            .iter()
            .map(|c| CritiqueMessage::Feedback(Critique::new(c.persona.clone(), c.issue.clone(), None)))
            .collect();
        if empty {
            responses.push(CritiqueMessage::Empty {
                persona: "quiet".to_string(),
            });
        }
        RoundSnapshot {
            iteration,
            explanation: format!("explanation {}", iteration),
            student_responses: responses,
            reward_scores: critiques
                .iter()
                .map(|c| PersonaScore {
                    persona: c.persona.clone(),
                    score: c.score,
                    validated_severity: c.validated_severity,
                })
                .collect(),
            critique_rankings: critiques,
            filtered_critiques: vec![],
            digest: String::new(),
            stop: StopDecision::continue_with("test"),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut state = RefinementState::default();
        state.history = vec![
            round(
                1,
                vec![
                    judged("a", Some("gap"), 3.5, UniquenessSource::Judge),
                    judged("b", Some("typo"), 2.0, UniquenessSource::Heuristic),
                    judged("c", None, 0.0, UniquenessSource::NotJudged),
                ],
                false,
            ),
            round(
                2,
                vec![judged("a", Some("gap"), 5.0, UniquenessSource::NoPeers)],
                true,
            ),
        ];
        state.decision = Some(Decision::Stop);

        let summary = RunSummary::from_state(&state);
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.top_scores, vec![3.5, 5.0]);
        assert_eq!(summary.severity_judge_calls, 3);
        assert_eq!(summary.uniqueness_judge_calls, 2);
        assert_eq!(summary.heuristic_fallbacks, 1);
        assert_eq!(summary.rounds_with_empty_feedback, 1);
        assert_eq!(summary.decision, Some(Decision::Stop));
        assert_eq!(summary.is_correct(), None);
    }

    #[test]
    fn test_empty_state() {
        let summary = RunSummary::from_state(&RefinementState::default());
        assert_eq!(summary.rounds, 0);
        assert!(summary.top_scores.is_empty());
        assert!(summary.question_id.is_none());
    }
}
