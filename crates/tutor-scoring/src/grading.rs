//! Grading judges for the terminal phase

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use tutor_agent::parsing::json_kind;
use tutor_agent::{GenerationOptions, GenerationRequest, SingleAnswer, TextGenerator};
use tutor_core::{AgentRole, ModelConfig, QuestionRecord, QuizResults, Result, TutorError};

const EXPLANATION_JUDGE_PROMPT: &str = "You are an impartial judge. Compare the student's \
explanation to the expert explanation and rate how similar they are in substance and reasoning. \
Return ONLY valid JSON of the form {\"explanation_score\": 1|2|3|4|5} where 1 = very different \
and 5 = very similar. Do not include any other keys or any prose.";

/// Criteria the pairwise judge weighs
pub const PAIRWISE_METRICS: [&str; 5] = [
    "clarity",
    "correctness",
    "completeness",
    "alignment",
    "efficiency",
];

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a 1-5 explanation score; anything else is fatal
pub fn parse_explanation_score(value: &Value) -> Result<u8> {
    let Value::Object(map) = value else {
        return Err(TutorError::InvalidOutput(format!(
            "explanation judge returned {}",
            json_kind(value)
        )));
    };

    let score = map
        .get("explanation_score")
        .and_then(integer_value)
        .ok_or_else(|| {
            TutorError::InvalidOutput("'explanation_score' must be an integer".to_string())
        })?;

    if !(1..=5).contains(&score) {
        return Err(TutorError::InvalidOutput(format!(
            "'explanation_score' must be within 1-5, got {}",
            score
        )));
    }
    Ok(score as u8)
}

/// Scores a student's explanation against the expert's
pub struct ExplanationJudge {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl ExplanationJudge {
    pub fn new(generator: Arc<dyn TextGenerator>, models: &ModelConfig) -> Self {
        Self {
            generator,
            model: models.model_for_role(AgentRole::ExplanationJudge).to_string(),
        }
    }

    /// 1-5 similarity; an empty student explanation scores 0 without a call
    pub async fn score(&self, expert: &str, student: &str) -> Result<u8> {
        if expert.trim().is_empty() {
            return Err(TutorError::MissingState(
                "expert explanation is empty".to_string(),
            ));
        }
        if student.trim().is_empty() {
            return Ok(0);
        }

        let user = format!(
            "Expert Explanation:\n{}\n\nStudent Explanation:\n{}",
            expert.trim(),
            student.trim()
        );
        let request = GenerationRequest::new(
            AgentRole::ExplanationJudge,
            EXPLANATION_JUDGE_PROMPT,
            user,
            GenerationOptions::judge(500).with_model(&self.model),
        );

        let value = self.generator.generate(request).await?.into_json()?;
        parse_explanation_score(&value)
    }
}

/// Assemble the quiz outcome for one answered question
pub fn grade_answer(
    question: &QuestionRecord,
    answer: &SingleAnswer,
    explanation_score: u8,
) -> QuizResults {
    let is_correct = answer.letter == question.correct_letter;
    info!(
        "Graded {}: answered {}, correct {}, explanation score {}",
        question.id, answer.letter, question.correct_letter, explanation_score
    );
    QuizResults {
        answer: answer.letter,
        correct_letter: question.correct_letter,
        is_correct,
        explanation_score,
    }
}

/// Winner of a head-to-head comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairwiseWinner {
    A,
    B,
    #[serde(rename = "tie")]
    Tie,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairwiseVerdict {
    pub winner: PairwiseWinner,
    pub label_a: String,
    pub label_b: String,
    /// Rationale per metric
    pub rationales: BTreeMap<String, String>,
}

impl PairwiseVerdict {
    /// Label of the winning explanation, `None` on a tie
    pub fn winning_label(&self) -> Option<&str> {
        match self.winner {
            PairwiseWinner::A => Some(self.label_a.as_str()),
            PairwiseWinner::B => Some(self.label_b.as_str()),
            PairwiseWinner::Tie => None,
        }
    }
}

/// Read a pairwise verdict; an unknown winner is fatal
pub fn parse_pairwise(value: &Value, label_a: &str, label_b: &str) -> Result<PairwiseVerdict> {
    let winner = value
        .get("winner")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            TutorError::InvalidOutput("pairwise judge reply has no 'winner' string".to_string())
        })?;

    let winner = match winner.trim().to_uppercase().as_str() {
        "A" => PairwiseWinner::A,
        "B" => PairwiseWinner::B,
        "TIE" => PairwiseWinner::Tie,
        other => {
            return Err(TutorError::InvalidOutput(format!(
                "'winner' must be one of A, B, tie; got {}",
                other
            )))
        }
    };

    let rationales = value
        .get("rationales")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let text = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(PairwiseVerdict {
        winner,
        label_a: label_a.to_string(),
        label_b: label_b.to_string(),
        rationales,
    })
}

/// Compares two explanations of the same question
pub struct PairwiseJudge {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl PairwiseJudge {
    pub fn new(generator: Arc<dyn TextGenerator>, models: &ModelConfig) -> Self {
        Self {
            generator,
            model: models.model_for_role(AgentRole::PairwiseJudge).to_string(),
        }
    }

    pub async fn compare(
        &self,
        question: &str,
        (label_a, explanation_a): (&str, &str),
        (label_b, explanation_b): (&str, &str),
    ) -> Result<PairwiseVerdict> {
        for (name, text) in [
            ("question", question),
            ("explanation A", explanation_a),
            ("explanation B", explanation_b),
        ] {
            if text.trim().is_empty() {
                return Err(TutorError::MissingState(format!("{} is empty", name)));
            }
        }

        let system = format!(
            "You are the Pairwise Explanation Judge. Compare two explanations of the same \
             question head-to-head on these metrics: {}. Choose the better overall explanation; \
             if quality is indistinguishable, return \"tie\". Return ONLY valid JSON of the form \
             {{\"winner\": \"A\"|\"B\"|\"tie\", \"rationales\": {{<metric>: \"...\"}}}}. \
             Rationales must be concise and specific to the texts.",
            PAIRWISE_METRICS.join(", ")
        );
        let payload = serde_json::json!({
            "question": question,
            "A": {"label": label_a, "text": explanation_a},
            "B": {"label": label_b, "text": explanation_b},
        });

        let options = GenerationOptions {
            temperature: 1.0,
            ..GenerationOptions::judge(800)
        }
        .with_model(&self.model);
        let request = GenerationRequest::new(
            AgentRole::PairwiseJudge,
            system,
            serde_json::to_string_pretty(&payload)?,
            options,
        );

        let value = self.generator.generate(request).await?.into_json()?;
        let verdict = parse_pairwise(&value, label_a, label_b)?;
        info!("Pairwise verdict: {:?}", verdict.winner);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tutor_agent::ScriptedGenerator;
    use tutor_core::RawQuestion;

    #[test]
    fn test_parse_explanation_score() {
        assert_eq!(parse_explanation_score(&json!({"explanation_score": 4})).unwrap(), 4);
        assert_eq!(parse_explanation_score(&json!({"explanation_score": "5"})).unwrap(), 5);
        for bad in [
            json!({"explanation_score": 0}),
            json!({"explanation_score": 6}),
            json!({"explanation_score": "great"}),
            json!({}),
            json!([4]),
        ] {
            assert!(matches!(
                parse_explanation_score(&bad),
                Err(TutorError::InvalidOutput(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_student_explanation_scores_zero_without_call() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = ExplanationJudge::new(generator.clone(), &ModelConfig::default());

        assert_eq!(judge.score("Expert text.", "  ").await.unwrap(), 0);
        assert_eq!(generator.call_count(), 0);

        let err = judge.score(" ", "student").await.unwrap_err();
        assert!(matches!(err, TutorError::MissingState(_)));
    }

    #[tokio::test]
    async fn test_explanation_judge_call() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(AgentRole::ExplanationJudge, "```json\n{\"explanation_score\": 3}\n```");
        let judge = ExplanationJudge::new(generator, &ModelConfig::default());
        assert_eq!(judge.score("Expert.", "Student.").await.unwrap(), 3);
    }

    #[test]
    fn test_grade_answer() {
        let question = QuestionRecord::from_raw(
            &RawQuestion {
                id: "q".into(),
                question: "Which?".into(),
                correct_answer: "right".into(),
                incorrect_answers: vec!["w1".into(), "w2".into(), "w3".into()],
                expert_explanation: String::new(),
            },
            9,
        )
        .unwrap();
        let answer = SingleAnswer {
            letter: question.correct_letter,
            explanation: String::new(),
        };
        let results = grade_answer(&question, &answer, 4);
        assert!(results.is_correct);
        assert_eq!(results.explanation_score, 4);
    }

    #[test]
    fn test_parse_pairwise() {
        let verdict = parse_pairwise(
            &json!({"winner": " tie ", "rationales": {"clarity": "both clear", "efficiency": 2}}),
            "system",
            "baseline",
        )
        .unwrap();
        assert_eq!(verdict.winner, PairwiseWinner::Tie);
        assert_eq!(verdict.winning_label(), None);
        assert_eq!(verdict.rationales["efficiency"], "2");

        let verdict = parse_pairwise(&json!({"winner": "a"}), "system", "baseline").unwrap();
        assert_eq!(verdict.winning_label(), Some("system"));
        assert!(verdict.rationales.is_empty());

        assert!(parse_pairwise(&json!({"winner": "C"}), "a", "b").is_err());
        assert!(parse_pairwise(&json!({}), "a", "b").is_err());
    }

    #[tokio::test]
    async fn test_pairwise_rejects_empty_explanation() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = PairwiseJudge::new(generator.clone(), &ModelConfig::default());
        let err = judge
            .compare("Q?", ("system", "text"), ("baseline", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::MissingState(_)));
        assert_eq!(generator.call_count(), 0);
    }
}
