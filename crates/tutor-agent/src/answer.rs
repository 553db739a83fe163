//! Single-answer agent for the terminal grading phase

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use tutor_core::{AgentRole, QuestionRecord, Result, TutorConfig, TutorError, OPTION_LETTERS};

use crate::client::TextGenerator;
use crate::parsing::{extract_json, extract_letter, extract_one_sentence};
use crate::types::{GenerationOptions, GenerationOutput, GenerationRequest};

const ANSWER_SYSTEM_PROMPT: &str = "You are a student. Answer the multiple-choice question \
strictly using what is conveyed in the teacher's explanation. Return ONLY JSON of the form \
{\"answer\": \"A\"|\"B\"|\"C\"|\"D\", \"explanation\": \"one sentence\"}.";

/// A student's answer to the graded question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleAnswer {
    pub letter: char,
    /// One sentence of reasoning, may be empty
    pub explanation: String,
}

fn normalize_letter(raw: &str) -> Option<char> {
    let c = raw.trim().chars().next()?.to_ascii_uppercase();
    OPTION_LETTERS.contains(&c).then_some(c)
}

/// Interpret an answer reply, falling back to free-text extraction
pub fn parse_answer(output: GenerationOutput) -> Result<SingleAnswer> {
    let (value, text) = match output {
        GenerationOutput::Structured(value) => (Some(value), String::new()),
        GenerationOutput::Text(text) => (extract_json(&text).ok(), text),
    };

    if let Some(Value::Object(map)) = &value {
        let letter = map
            .get("answer")
            .and_then(Value::as_str)
            .and_then(normalize_letter);
        if let Some(letter) = letter {
            let explanation = map
                .get("explanation")
                .and_then(Value::as_str)
                .map(extract_one_sentence)
                .unwrap_or_default();
            return Ok(SingleAnswer {
                letter,
                explanation,
            });
        }
    }

    let source = if text.is_empty() {
        value.map(|v| v.to_string()).unwrap_or_default()
    } else {
        text
    };
    warn!("Answer reply was not the expected JSON; extracting from free text");

    let letter = extract_letter(&source).ok_or_else(|| {
        TutorError::InvalidOutput("answer reply contains no option letter".to_string())
    })?;
    Ok(SingleAnswer {
        letter,
        explanation: extract_one_sentence(&source),
    })
}

/// Neutral student that answers using only the final explanation
pub struct AnswerAgent {
    generator: Arc<dyn TextGenerator>,
    config: Arc<TutorConfig>,
}

impl AnswerAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, config: Arc<TutorConfig>) -> Self {
        Self { generator, config }
    }

    pub async fn answer(&self, question: &QuestionRecord, explanation: &str) -> Result<SingleAnswer> {
        let user = format!(
            "Explanation:\n{}\n\nQuestion:\n{}",
            explanation,
            question.render()
        );
        let options = GenerationOptions {
            temperature: 0.0,
            json_mode: true,
            max_tokens: self.config.models.max_tokens,
            model: None,
        }
        .with_model(self.config.models.model_for_role(AgentRole::Answerer));
        let request =
            GenerationRequest::new(AgentRole::Answerer, ANSWER_SYSTEM_PROMPT, user, options);

        let answer = parse_answer(self.generator.generate(request).await?)?;
        debug!(letter = %answer.letter, "Single answer received");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_answer() {
        let answer = parse_answer(GenerationOutput::from(
            "{\"answer\": \"c\", \"explanation\": \"Torque from gravity. It precesses.\"}",
        ))
        .unwrap();
        assert_eq!(answer.letter, 'C');
        assert_eq!(answer.explanation, "Torque from gravity.");
    }

    #[test]
    fn test_parse_structured_answer() {
        let answer = parse_answer(GenerationOutput::from(json!({"answer": "B"}))).unwrap();
        assert_eq!(answer.letter, 'B');
        assert_eq!(answer.explanation, "");
    }

    #[test]
    fn test_parse_free_text_fallback() {
        let answer =
            parse_answer(GenerationOutput::from("Answer: D. Momentum must be conserved. Done"))
                .unwrap();
        assert_eq!(answer.letter, 'D');
        assert_eq!(answer.explanation, "Answer: D.");
    }

    #[test]
    fn test_invalid_json_letter_falls_back_to_text() {
        let answer =
            parse_answer(GenerationOutput::from("{\"answer\": \"E\"} but really (A)")).unwrap();
        assert_eq!(answer.letter, 'A');
    }

    #[test]
    fn test_no_letter_is_invalid() {
        let err = parse_answer(GenerationOutput::from("i do not know")).unwrap_err();
        assert!(matches!(err, TutorError::InvalidOutput(_)));
    }
}
