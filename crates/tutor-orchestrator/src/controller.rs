//! Refinement controller - drives the phase machine against real agents
//!
//! Each round runs teacher -> students -> reward -> stop decision with its
//! intermediate results held locally; only `CommitRound` touches the state.
//! A fatal error therefore abandons the round in flight and leaves every
//! previously committed round intact.

use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tutor_agent::{AnswerAgent, StudentAgent, TeacherAgent, TextGenerator};
use tutor_core::{
    CritiqueMessage, Decision, QuestionRecord, QuizResults, RefinementState, Result,
    RoundSnapshot, ScoreHistoryEntry, StopDecision, TeacherOutput, TutorConfig, TutorError,
};
use tutor_scoring::{
    decide, grade_answer, ExplanationJudge, FallbackUniquenessJudge, LlmSeverityJudge,
    LlmUniquenessJudge, PairwiseJudge, PairwiseVerdict, RankingEngine, RankingOutcome,
    SeverityJudge, UniquenessJudge,
};

use crate::activity_logger::ActivityLogger;
use crate::state_machine::{transition, Action, Event, Phase};

/// Label of the refined explanation in pairwise comparisons
pub const REFINED_LABEL: &str = "system";
/// Label of the zero-shot explanation in pairwise comparisons
pub const BASELINE_LABEL: &str = "baseline";

/// Results of the round in flight, not yet committed
#[derive(Default)]
struct RoundWork {
    iteration: usize,
    teacher: Option<TeacherOutput>,
    responses: Vec<CritiqueMessage>,
    outcome: Option<RankingOutcome>,
    stop: Option<StopDecision>,
}

impl RoundWork {
    fn explanation(&self) -> Result<&str> {
        self.teacher
            .as_ref()
            .map(|t| t.explanation.as_str())
            .ok_or_else(|| TutorError::MissingState("round explanation".to_string()))
    }

    fn outcome(&self) -> Result<&RankingOutcome> {
        self.outcome
            .as_ref()
            .ok_or_else(|| TutorError::MissingState("round ranking".to_string()))
    }

    fn into_snapshot(self) -> Result<(RoundSnapshot, Vec<(String, ScoreHistoryEntry)>)> {
        let missing = |what: &str| TutorError::MissingState(format!("round {}", what));
        let teacher = self.teacher.ok_or_else(|| missing("explanation"))?;
        let outcome = self.outcome.ok_or_else(|| missing("ranking"))?;
        let stop = self.stop.ok_or_else(|| missing("stop decision"))?;

        let snapshot = RoundSnapshot {
            iteration: self.iteration,
            explanation: teacher.explanation,
            student_responses: self.responses,
            reward_scores: outcome.reward_scores,
            critique_rankings: outcome.ranked,
            filtered_critiques: outcome.filtered,
            digest: outcome.digest,
            stop,
            completed_at: chrono::Utc::now(),
        };
        Ok((snapshot, outcome.history_entries))
    }
}

pub struct RefinementController {
    config: Arc<TutorConfig>,
    teacher: TeacherAgent,
    students: StudentAgent,
    answerer: AnswerAgent,
    ranking: RankingEngine,
    explanation_judge: ExplanationJudge,
    pairwise_judge: PairwiseJudge,
    activity_logger: Option<ActivityLogger>,
}

impl RefinementController {
    /// Controller whose judges all call the text-generation service
    ///
    /// Uniqueness judging degrades to the similarity heuristic on failure.
    pub fn new(generator: Arc<dyn TextGenerator>, config: Arc<TutorConfig>) -> Result<Self> {
        let severity: Arc<dyn SeverityJudge> =
            Arc::new(LlmSeverityJudge::new(generator.clone(), &config.models));
        let uniqueness: Arc<dyn UniquenessJudge> = Arc::new(FallbackUniquenessJudge::new(
            Arc::new(LlmUniquenessJudge::new(generator.clone(), &config.models)),
        ));
        Self::with_judges(generator, config, severity, uniqueness)
    }

    /// Controller with caller-supplied critique judges
    ///
    /// Fails with `TutorError::Config` when the configuration is unusable.
    pub fn with_judges(
        generator: Arc<dyn TextGenerator>,
        config: Arc<TutorConfig>,
        severity: Arc<dyn SeverityJudge>,
        uniqueness: Arc<dyn UniquenessJudge>,
    ) -> Result<Self> {
        config.validate()?;

        let mut ranking = RankingEngine::new(severity, uniqueness, config.ranking.top_k);
        if !config.run.concurrent_personas {
            ranking = ranking.sequential();
        }

        Ok(Self {
            teacher: TeacherAgent::new(generator.clone(), config.clone()),
            students: StudentAgent::new(generator.clone(), config.clone()),
            answerer: AnswerAgent::new(generator.clone(), config.clone()),
            explanation_judge: ExplanationJudge::new(generator.clone(), &config.models),
            pairwise_judge: PairwiseJudge::new(generator, &config.models),
            ranking,
            config,
            activity_logger: None,
        })
    }

    /// Enable activity logging to `<dir>/activity.md`
    pub fn with_activity_logging(mut self, dir: &Path) -> Self {
        self.activity_logger = Some(ActivityLogger::new(dir));
        self
    }

    pub fn config(&self) -> &TutorConfig {
        &self.config
    }

    /// Refine until the stopping policy says STOP, then answer and grade
    ///
    /// On error the state holds every round committed before the failure.
    pub async fn run(&self, state: &mut RefinementState) -> Result<()> {
        let question = state.require_question("refinement")?.clone();
        info!(
            "Starting refinement run {} for question {}",
            state.run_id, question.id
        );

        if state.history.is_empty() {
            if let Some(logger) = &self.activity_logger {
                let personas: Vec<String> =
                    self.config.personas.iter().map(|p| p.id.clone()).collect();
                logger
                    .log_run_start(&question.id, &personas, self.config.stopping.max_iterations)
                    .await;
            }
        }

        let mut phase = Phase::Idle;
        let mut event = Event::Start {
            completed_rounds: state.iteration,
            stopped: state.is_stopped(),
        };
        let mut work = RoundWork::default();

        loop {
            let (next, actions) = transition(phase, event);
            phase = next;
            if let Phase::Failed { error } = &phase {
                return Err(TutorError::InvalidTransition(error.clone()));
            }

            let mut next_event = None;
            for action in actions {
                match self.execute(action, state, &question, &mut work).await {
                    Ok(Some(produced)) => next_event = Some(produced),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Round {} abandoned: {}", work.iteration, e);
                        if let Some(logger) = &self.activity_logger {
                            logger.log_round_failed(work.iteration, &e.to_string()).await;
                        }
                        let (failed, _) = transition(
                            phase,
                            Event::Error {
                                message: e.to_string(),
                            },
                        );
                        debug!(?failed, "Refinement failed");
                        return Err(e);
                    }
                }
            }

            if phase.is_terminal() {
                info!(
                    "Refinement run {} finished after {} rounds",
                    state.run_id, state.iteration
                );
                return Ok(());
            }

            event = next_event.ok_or_else(|| {
                TutorError::InvalidTransition(format!("{:?} produced no event", phase))
            })?;
        }
    }

    async fn execute(
        &self,
        action: Action,
        state: &mut RefinementState,
        question: &QuestionRecord,
        work: &mut RoundWork,
    ) -> Result<Option<Event>> {
        match action {
            Action::LogActivity { message } => {
                info!("{}", message);
                Ok(None)
            }

            Action::InvokeTeacher { iteration } => {
                *work = RoundWork {
                    iteration,
                    ..Default::default()
                };
                let output = self
                    .teacher
                    .explain(question, state.digest.as_deref(), iteration)
                    .await?;
                work.teacher = Some(output);
                Ok(Some(Event::ExplanationReady))
            }

            Action::InvokeStudents { iteration } => {
                let explanation = work.explanation()?;
                let responses = self
                    .collect_critiques(state, question, explanation)
                    .await?;
                debug!(iteration, "Collected {} critiques", responses.len());
                let count = responses.len();
                work.responses = responses;
                Ok(Some(Event::CritiquesCollected { count }))
            }

            Action::RankCritiques { iteration } => {
                let outcome = self
                    .ranking
                    .rank(&work.responses, work.explanation()?, iteration)
                    .await?;
                work.outcome = Some(outcome);
                Ok(Some(Event::RewardComputed))
            }

            Action::DecideStop { iteration } => {
                let stop = decide(
                    &work.responses,
                    &work.outcome()?.reward_scores,
                    &state.history,
                    iteration,
                    &self.config.stopping,
                );
                let event = Event::Decided {
                    decision: stop.decision,
                    reason: stop.reason.clone(),
                };
                work.stop = Some(stop);
                Ok(Some(event))
            }

            Action::CommitRound { iteration } => {
                let (snapshot, history_entries) = std::mem::take(work).into_snapshot()?;
                if let Some(logger) = &self.activity_logger {
                    logger.log_round(&snapshot).await;
                }
                info!(
                    "Round {} committed: top score {:.2}, decision {}",
                    iteration,
                    snapshot.top_score(),
                    snapshot.stop.decision
                );
                state.commit_round(snapshot, history_entries);
                Ok(None)
            }

            Action::AnswerAndGrade => {
                self.grade(state).await?;
                Ok(Some(Event::GradingComplete))
            }
        }
    }

    async fn collect_critiques(
        &self,
        state: &RefinementState,
        question: &QuestionRecord,
        explanation: &str,
    ) -> Result<Vec<CritiqueMessage>> {
        let history_for = |persona: &str| {
            state
                .student_score_history
                .get(persona)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        };

        if self.config.run.concurrent_personas {
            let futures = self.config.personas.iter().map(|persona| {
                self.students
                    .critique(persona, question, explanation, history_for(&persona.id))
            });
            join_all(futures).await.into_iter().collect()
        } else {
            let mut responses = Vec::with_capacity(self.config.personas.len());
            for persona in &self.config.personas {
                responses.push(
                    self.students
                        .critique(persona, question, explanation, history_for(&persona.id))
                        .await?,
                );
            }
            Ok(responses)
        }
    }

    /// Terminal phase: answer the question from the final explanation and grade it
    pub async fn grade(&self, state: &mut RefinementState) -> Result<QuizResults> {
        let question = state.require_question("grading")?.clone();
        if state.explanation.trim().is_empty() {
            return Err(TutorError::MissingState(
                "explanation not found in state (grading)".to_string(),
            ));
        }

        let answer = self.answerer.answer(&question, &state.explanation).await?;
        let explanation_score = self
            .explanation_judge
            .score(&question.expert_explanation, &answer.explanation)
            .await?;
        let results = grade_answer(&question, &answer, explanation_score);

        if let Some(logger) = &self.activity_logger {
            logger
                .log_run_complete(
                    state.iteration,
                    state.reason.as_deref().unwrap_or_default(),
                    &results,
                )
                .await;
        }

        state.single_answer = Some(answer.letter.to_string());
        state.single_explanation = Some(answer.explanation);
        state.quiz_results = Some(results.clone());
        Ok(results)
    }

    /// Zero-shot comparison run: one baseline explanation, then grading
    pub async fn run_baseline(&self, question: QuestionRecord) -> Result<RefinementState> {
        let mut state = RefinementState::new(question);
        let question = state.require_question("baseline")?.clone();
        info!("Starting baseline run {} for question {}", state.run_id, question.id);

        let output = self.teacher.explain_baseline(&question).await?;
        state.explanation = output.explanation;
        state.iteration = output.iteration;
        state.decision = Some(Decision::Stop);
        state.reason = Some("Baseline: single zero-shot explanation.".to_string());

        self.grade(&mut state).await?;
        Ok(state)
    }

    /// Judge the refined explanation against the baseline head-to-head
    pub async fn compare_with_baseline(
        &self,
        refined: &RefinementState,
        baseline: &RefinementState,
    ) -> Result<PairwiseVerdict> {
        let question = refined.require_question("pairwise comparison")?;
        self.pairwise_judge
            .compare(
                &question.question,
                (REFINED_LABEL, &refined.explanation),
                (BASELINE_LABEL, &baseline.explanation),
            )
            .await
    }
}
