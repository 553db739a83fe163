//! Pure phase machine for the refinement loop
//!
//! `transition(phase, event) -> (phase, actions)` has no I/O and never
//! panics: anything it cannot handle lands in `Failed`. The controller owns
//! all side effects and reports their outcome back as events.
//!
//! ```text
//! Idle -> Teacher -> Students -> Reward -> StopDecision -+-> Teacher
//!                                                        +-> Grading -> Complete
//! ```

use tutor_core::Decision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Producing the explanation for `iteration`
    Teacher { iteration: usize },
    Students { iteration: usize },
    Reward { iteration: usize },
    StopDecision { iteration: usize },
    /// One-shot answer and grading, outside the refinement cycle
    Grading { rounds: usize },
    Complete { rounds: usize, reason: String },
    Failed { error: String },
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Begin driving a state that already holds `completed_rounds` rounds
    Start {
        completed_rounds: usize,
        stopped: bool,
    },
    ExplanationReady,
    CritiquesCollected { count: usize },
    RewardComputed,
    Decided { decision: Decision, reason: String },
    GradingComplete,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    InvokeTeacher { iteration: usize },
    InvokeStudents { iteration: usize },
    RankCritiques { iteration: usize },
    DecideStop { iteration: usize },
    /// Append the finished round to the state and its history
    CommitRound { iteration: usize },
    AnswerAndGrade,
    LogActivity { message: String },
}

/// Pure transition function
pub fn transition(phase: Phase, event: Event) -> (Phase, Vec<Action>) {
    match (phase, event) {
        (
            Phase::Idle,
            Event::Start {
                completed_rounds,
                stopped: false,
            },
        ) => {
            let iteration = completed_rounds + 1;
            (
                Phase::Teacher { iteration },
                vec![
                    Action::LogActivity {
                        message: format!("Starting refinement at round {}", iteration),
                    },
                    Action::InvokeTeacher { iteration },
                ],
            )
        }

        // A stopped state never re-enters the cycle
        (
            Phase::Idle,
            Event::Start {
                completed_rounds,
                stopped: true,
            },
        ) => (
            Phase::Grading {
                rounds: completed_rounds,
            },
            vec![
                Action::LogActivity {
                    message: "Refinement already stopped, grading only".to_string(),
                },
                Action::AnswerAndGrade,
            ],
        ),

        (Phase::Teacher { iteration }, Event::ExplanationReady) => (
            Phase::Students { iteration },
            vec![Action::InvokeStudents { iteration }],
        ),

        (Phase::Students { iteration }, Event::CritiquesCollected { count }) => (
            Phase::Reward { iteration },
            vec![
                Action::LogActivity {
                    message: format!("Round {}: {} critiques collected", iteration, count),
                },
                Action::RankCritiques { iteration },
            ],
        ),

        (Phase::Reward { iteration }, Event::RewardComputed) => (
            Phase::StopDecision { iteration },
            vec![Action::DecideStop { iteration }],
        ),

        (
            Phase::StopDecision { iteration },
            Event::Decided {
                decision: Decision::Continue,
                reason,
            },
        ) => {
            let next = iteration + 1;
            (
                Phase::Teacher { iteration: next },
                vec![
                    Action::CommitRound { iteration },
                    Action::LogActivity {
                        message: format!("Round {}: CONTINUE ({})", iteration, reason),
                    },
                    Action::InvokeTeacher { iteration: next },
                ],
            )
        }

        (
            Phase::StopDecision { iteration },
            Event::Decided {
                decision: Decision::Stop,
                reason,
            },
        ) => (
            Phase::Grading { rounds: iteration },
            vec![
                Action::CommitRound { iteration },
                Action::LogActivity {
                    message: format!("Round {}: STOP ({})", iteration, reason),
                },
                Action::AnswerAndGrade,
            ],
        ),

        (Phase::Grading { rounds }, Event::GradingComplete) => (
            Phase::Complete {
                rounds,
                reason: "graded".to_string(),
            },
            vec![Action::LogActivity {
                message: format!("Run complete after {} rounds", rounds),
            }],
        ),

        // Errors from any non-terminal phase
        (phase, Event::Error { message }) if !phase.is_terminal() => (
            Phase::Failed {
                error: format!("{:?}: {}", phase, message),
            },
            vec![Action::LogActivity {
                message: format!("Error: {}", message),
            }],
        ),

        (Phase::Complete { rounds, .. }, event) => (
            Phase::Failed {
                error: format!(
                    "Invalid transition from Complete ({} rounds) on event: {:?}",
                    rounds, event
                ),
            },
            vec![],
        ),

        (Phase::Failed { error }, event) => (
            Phase::Failed {
                error: format!(
                    "Invalid transition from Failed state (error: {}) on event: {:?}",
                    error, event
                ),
            },
            vec![],
        ),

        (phase, event) => (
            Phase::Failed {
                error: format!(
                    "Invalid phase transition: {:?} cannot handle event {:?}",
                    phase, event
                ),
            },
            vec![],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(completed_rounds: usize) -> Event {
        Event::Start {
            completed_rounds,
            stopped: false,
        }
    }

    fn decided(decision: Decision) -> Event {
        Event::Decided {
            decision,
            reason: "test".to_string(),
        }
    }

    /// Walk one round from Teacher to StopDecision
    fn through_round(phase: Phase) -> Phase {
        let (phase, _) = transition(phase, Event::ExplanationReady);
        let (phase, _) = transition(phase, Event::CritiquesCollected { count: 3 });
        let (phase, _) = transition(phase, Event::RewardComputed);
        phase
    }

    #[test]
    fn test_two_rounds_then_grading() {
        let (phase, actions) = transition(Phase::Idle, start(0));
        assert_eq!(phase, Phase::Teacher { iteration: 1 });
        assert!(actions.contains(&Action::InvokeTeacher { iteration: 1 }));

        let phase = through_round(phase);
        assert_eq!(phase, Phase::StopDecision { iteration: 1 });

        let (phase, actions) = transition(phase, decided(Decision::Continue));
        assert_eq!(phase, Phase::Teacher { iteration: 2 });
        assert_eq!(actions[0], Action::CommitRound { iteration: 1 });
        assert_eq!(actions[2], Action::InvokeTeacher { iteration: 2 });

        let phase = through_round(phase);
        let (phase, actions) = transition(phase, decided(Decision::Stop));
        assert_eq!(phase, Phase::Grading { rounds: 2 });
        assert_eq!(actions[0], Action::CommitRound { iteration: 2 });
        assert_eq!(actions.last(), Some(&Action::AnswerAndGrade));

        let (phase, _) = transition(phase, Event::GradingComplete);
        assert!(matches!(phase, Phase::Complete { rounds: 2, .. }));
    }

    #[test]
    fn test_start_continues_iteration_count() {
        let (phase, _) = transition(Phase::Idle, start(3));
        assert_eq!(phase, Phase::Teacher { iteration: 4 });
    }

    #[test]
    fn test_stopped_state_goes_straight_to_grading() {
        let (phase, actions) = transition(
            Phase::Idle,
            Event::Start {
                completed_rounds: 2,
                stopped: true,
            },
        );
        assert_eq!(phase, Phase::Grading { rounds: 2 });
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::InvokeTeacher { .. })));
    }

    #[test]
    fn test_error_from_any_phase() {
        for phase in [
            Phase::Idle,
            Phase::Teacher { iteration: 1 },
            Phase::Students { iteration: 1 },
            Phase::Reward { iteration: 1 },
            Phase::StopDecision { iteration: 1 },
            Phase::Grading { rounds: 1 },
        ] {
            let (next, _) = transition(
                phase,
                Event::Error {
                    message: "boom".to_string(),
                },
            );
            assert!(matches!(next, Phase::Failed { .. }));
        }
    }

    #[test]
    fn test_invalid_transition_never_panics() {
        let (phase, actions) = transition(Phase::Teacher { iteration: 1 }, Event::RewardComputed);
        assert!(matches!(phase, Phase::Failed { .. }));
        assert!(actions.is_empty());

        let (phase, _) = transition(Phase::Idle, Event::GradingComplete);
        assert!(matches!(phase, Phase::Failed { .. }));
    }

    #[test]
    fn test_terminal_phases_reject_events() {
        let complete = Phase::Complete {
            rounds: 1,
            reason: "done".to_string(),
        };
        let (phase, _) = transition(complete, start(0));
        assert!(matches!(phase, Phase::Failed { .. }));

        let failed = Phase::Failed {
            error: "original".to_string(),
        };
        let (phase, _) = transition(
            failed,
            Event::Error {
                message: "again".to_string(),
            },
        );
        match phase {
            Phase::Failed { error } => assert!(error.contains("original")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }
}
