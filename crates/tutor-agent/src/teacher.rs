//! Teacher agent: writes and revises the explanation

use std::sync::Arc;
use tracing::{debug, info};
use tutor_core::{AgentRole, QuestionRecord, Result, TeacherOutput, TutorConfig, TutorError};

use crate::client::TextGenerator;
use crate::parsing::normalize_words;
use crate::types::{GenerationOptions, GenerationRequest};

/// How the teacher is prompted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeachingMode {
    /// Zero-shot, no feedback
    Baseline,
    /// Revises using the previous round's digest
    Adaptive,
}

const ADAPTIVE_EXAMPLE: &str = "Example of the explanation style: When matter and antimatter \
annihilate they convert their mass-energy into photons, conserving both energy and momentum. For \
relativistic particles we use E^2 = (pc)^2 + (mc^2)^2; for photons E = pc. The Lorentz factor \
gamma = 1/sqrt(1 - v^2/c^2) links speed to energy through E = gamma*m*c^2 and p = gamma*m*v. \
Apply conservation: initial energy equals the summed photon energies, and the initial momentum \
vector equals the vector sum of photon momenta, split into horizontal and vertical components. \
The photon angle and energy reveal the initial momentum and thus gamma, from which \
v/c = sqrt(1 - 1/gamma^2). This framework applies broadly to two-body decay and annihilation.";

/// Build the system and user prompts for one teacher call
pub fn build_teacher_prompt(
    mode: TeachingMode,
    question: &str,
    digest: Option<&str>,
    word_cap: usize,
) -> (String, String) {
    match mode {
        TeachingMode::Baseline => {
            let system = format!(
                "You are an expert teacher teaching undergraduate Physics students with varying \
                 skills and backgrounds. Provide a clear, accurate explanation (maximum {} words) \
                 covering the key concepts, a step-by-step account of the core mechanism, a brief \
                 example if helpful, and any important definitions or formulas. Write in clear \
                 prose without headers or bullet points. Do NOT directly reference the given \
                 question or reveal the correct answer; teach the underlying concepts generically.",
                word_cap
            );
            let user = format!("Question: {}\n\nProvide a clear explanation.", question);
            (system, user)
        }
        TeachingMode::Adaptive => {
            let system = format!(
                "You are the Teacher Agent in an adaptive learning system for undergraduate \
                 Physics students. Produce a clear, self-contained explanation of the concepts \
                 behind the question. On the first round write a well-structured explanation; on \
                 later rounds revise it using the ranked student critiques. Prefer tightening, \
                 clarifying or replacing over adding material. Write a single block of prose, \
                 6-10 sentences, no more than {} words. Do NOT directly reference the given \
                 question or reveal the correct answer.\n\n{}",
                word_cap, ADAPTIVE_EXAMPLE
            );

            let mut user = format!("Question: {}\n", question);
            if let Some(digest) = digest {
                user.push_str("\nRanked student critiques to address:\n");
                user.push_str(digest);
                user.push('\n');
            }
            user.push_str("\nProvide the explanation.");
            (system, user)
        }
    }
}

/// Produces explanations through the text-generation service
pub struct TeacherAgent {
    generator: Arc<dyn TextGenerator>,
    config: Arc<TutorConfig>,
}

impl TeacherAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, config: Arc<TutorConfig>) -> Self {
        Self { generator, config }
    }

    /// Adaptive explanation for `iteration`, revising against `digest`
    pub async fn explain(
        &self,
        question: &QuestionRecord,
        digest: Option<&str>,
        iteration: usize,
    ) -> Result<TeacherOutput> {
        let explanation = self
            .generate(TeachingMode::Adaptive, question, digest)
            .await?;
        info!(
            "Teacher produced explanation for round {} ({} words)",
            iteration,
            explanation.split_whitespace().count()
        );
        Ok(TeacherOutput {
            iteration,
            explanation,
        })
    }

    /// Zero-shot explanation with no feedback
    pub async fn explain_baseline(&self, question: &QuestionRecord) -> Result<TeacherOutput> {
        let explanation = self
            .generate(TeachingMode::Baseline, question, None)
            .await?;
        Ok(TeacherOutput {
            iteration: 1,
            explanation,
        })
    }

    async fn generate(
        &self,
        mode: TeachingMode,
        question: &QuestionRecord,
        digest: Option<&str>,
    ) -> Result<String> {
        let word_cap = self.config.teacher.word_cap;
        let (system, user) = build_teacher_prompt(mode, &question.question, digest, word_cap);
        debug!(?mode, "Teacher prompt: {} chars", user.len());

        let options = GenerationOptions {
            max_tokens: self.config.teacher.max_tokens,
            ..Default::default()
        }
        .with_model(self.config.models.model_for_role(AgentRole::Teacher));
        let request = GenerationRequest::new(AgentRole::Teacher, system, user, options);

        let raw = self.generator.generate(request).await?.into_text();
        let explanation = normalize_words(&raw, word_cap);
        if explanation.is_empty() {
            return Err(TutorError::InvalidOutput(
                "teacher returned an empty explanation".to_string(),
            ));
        }
        Ok(explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedGenerator;
    use tutor_core::RawQuestion;

    fn question() -> QuestionRecord {
        QuestionRecord::from_raw(
            &RawQuestion {
                id: "q1".to_string(),
                question: "Why does a spinning top precess?".to_string(),
                correct_answer: "Gravity exerts a torque".to_string(),
                incorrect_answers: vec!["Friction".into(), "Air drag".into(), "Magnetism".into()],
                expert_explanation: "Torque changes angular momentum direction.".to_string(),
            },
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_adaptive_prompt_includes_digest() {
        let (_, user) = build_teacher_prompt(
            TeachingMode::Adaptive,
            "Q?",
            Some("1. [advanced] Missing torque"),
            180,
        );
        assert!(user.contains("Missing torque"));

        let (_, first_round) = build_teacher_prompt(TeachingMode::Adaptive, "Q?", None, 180);
        assert!(!first_round.contains("critiques to address"));
    }

    #[test]
    fn test_baseline_prompt_mentions_word_cap() {
        let (system, _) = build_teacher_prompt(TeachingMode::Baseline, "Q?", Some("ignored"), 42);
        assert!(system.contains("42 words"));
    }

    #[tokio::test]
    async fn test_explanation_is_truncated_to_word_cap() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(AgentRole::Teacher, "one  two\nthree four five six");

        let mut config = TutorConfig::default();
        config.teacher.word_cap = 4;
        let teacher = TeacherAgent::new(generator.clone(), Arc::new(config));

        let out = teacher.explain(&question(), None, 1).await.unwrap();
        assert_eq!(out.explanation, "one two three four");
        assert_eq!(out.iteration, 1);

        let request = &generator.requests()[0];
        assert_eq!(request.options.max_tokens, 500);
        assert!(!request.options.json_mode);
    }

    #[tokio::test]
    async fn test_empty_explanation_is_invalid() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(AgentRole::Teacher, "   \n ");
        let teacher = TeacherAgent::new(generator, Arc::new(TutorConfig::default()));

        let err = teacher.explain_baseline(&question()).await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidOutput(_)));
    }
}
