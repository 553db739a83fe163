//! Student persona agent: one critique per persona per round

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use tutor_core::{
    AgentRole, Critique, CritiqueMessage, Persona, QuestionRecord, Result, ScoreHistoryEntry,
    TutorConfig, TutorError,
};

use crate::client::TextGenerator;
use crate::parsing::json_kind;
use crate::types::{GenerationOptions, GenerationRequest};

/// How many past rounds a persona sees of its own standing
pub const COMPETITIVE_CONTEXT_ROUNDS: usize = 3;

/// Render a persona's recent standing for its prompt
pub fn competitive_context(history: &[ScoreHistoryEntry]) -> String {
    if history.is_empty() {
        return "This is the first round; no previous scores.".to_string();
    }

    let start = history.len().saturating_sub(COMPETITIVE_CONTEXT_ROUNDS);
    let mut text = String::from("Your recent standing among the student panel:\n");
    for entry in &history[start..] {
        text.push_str(&format!(
            "- round {}: rank {}, score {:.2}, severity {} ({})\n",
            entry.iteration, entry.rank, entry.score, entry.validated_severity, entry.issue
        ));
    }
    text.push_str(
        "Critiques are judged for severity and rewarded for raising issues nobody else raised.",
    );
    text
}

fn system_prompt(persona: &Persona) -> String {
    format!(
        "{} Read the teacher's explanation and find the single most important issue from your \
         point of view: an error, a confusing step, a missing piece, or a misleading phrasing. \
         Stay on the topic of the question; avoid tangents. If there is nothing worth fixing, \
         set \"issue\" to null. Return ONLY JSON of the form \
         {{\"issue\": string|null, \"quote\": string|null}} where \"quote\" is the exact phrase \
         from the explanation the issue refers to.",
        persona.guidelines
    )
}

/// Map a student reply onto a validated critique message
///
/// `{}` is empty feedback; blank strings count as null.
pub fn parse_critique(persona: &str, value: Value) -> Result<CritiqueMessage> {
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(TutorError::InvalidOutput(format!(
                "student {} returned {} instead of an object",
                persona,
                json_kind(&other)
            )))
        }
    };

    if map.is_empty() {
        return Ok(CritiqueMessage::Empty {
            persona: persona.to_string(),
        });
    }

    let field = |key: &str| -> Result<Option<String>> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => {
                let s = s.trim();
                Ok((!s.is_empty()).then(|| s.to_string()))
            }
            Some(other) => Err(TutorError::InvalidOutput(format!(
                "student {} returned {} for '{}'",
                persona,
                json_kind(other),
                key
            ))),
        }
    };

    Ok(CritiqueMessage::Feedback(Critique::new(
        persona,
        field("issue")?,
        field("quote")?,
    )))
}

/// Asks each persona for a critique
pub struct StudentAgent {
    generator: Arc<dyn TextGenerator>,
    config: Arc<TutorConfig>,
}

impl StudentAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, config: Arc<TutorConfig>) -> Self {
        Self { generator, config }
    }

    pub async fn critique(
        &self,
        persona: &Persona,
        question: &QuestionRecord,
        explanation: &str,
        history: &[ScoreHistoryEntry],
    ) -> Result<CritiqueMessage> {
        let user = format!(
            "Question:\n{}\n\nExplanation:\n{}\n\n{}",
            question.question,
            explanation,
            competitive_context(history)
        );

        let options = GenerationOptions {
            temperature: 0.0,
            json_mode: true,
            max_tokens: self.config.models.max_tokens,
            model: None,
        }
        .with_model(self.config.models.model_for_role(AgentRole::Student));
        let request = GenerationRequest::new(AgentRole::Student, system_prompt(persona), user, options)
            .with_subject(&persona.id);

        let value = self.generator.generate(request).await?.into_json()?;
        let message = parse_critique(&persona.id, value)?;
        debug!(
            persona = %persona.id,
            empty = message.is_empty(),
            "Student critique received"
        );
        Ok(message)
    }
}
