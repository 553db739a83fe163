//! Critique judges: severity and uniqueness
//!
//! Both judges sit behind traits so the ranking engine never knows whether a
//! verdict came from the text-generation service or from a local heuristic.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use tutor_agent::{GenerationOptions, GenerationRequest, TextGenerator};
use tutor_core::{AgentRole, ModelConfig, Result, UniquenessSource};

/// Severity assigned when the judge's value is unusable
pub const DEFAULT_SEVERITY: u8 = 1;

/// Highest valid severity
pub const MAX_SEVERITY: u8 = 3;

/// Max tokens for judge replies
const JUDGE_MAX_TOKENS: u32 = 300;

/// Judge-assigned severity of one issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityVerdict {
    /// 0 (invalid/trivial) to 3 (critical)
    pub severity: u8,
    pub justification: String,
}

/// Judge-assigned uniqueness of one issue against its peers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniquenessVerdict {
    /// 0.0 (duplicate) to 1.0 (distinct)
    pub uniqueness: f64,
    pub source: UniquenessSource,
}

impl UniquenessVerdict {
    /// Verdict for an issue nobody else raised
    pub fn no_peers() -> Self {
        Self {
            uniqueness: 1.0,
            source: UniquenessSource::NoPeers,
        }
    }
}

#[async_trait]
pub trait SeverityJudge: Send + Sync {
    async fn judge_severity(
        &self,
        issue: &str,
        explanation: &str,
        quote: Option<&str>,
    ) -> Result<SeverityVerdict>;
}

#[async_trait]
pub trait UniquenessJudge: Send + Sync {
    /// Must return 1.0 without judging when `other_issues` is empty
    async fn judge_uniqueness(
        &self,
        issue: &str,
        other_issues: &[String],
    ) -> Result<UniquenessVerdict>;
}

const SEVERITY_SYSTEM_PROMPT: &str = "You are an impartial judge of student critiques. Rate \
how severe the flagged issue is for the given explanation. Scale: 0 = invalid or trivial (the \
issue is wrong, off-topic or purely stylistic); 1 = minor (small omission or wording); 2 = \
moderate (a confusing or incomplete step a student would trip over); 3 = critical (creates a \
misconception or makes the explanation unusable). Return ONLY JSON of the form \
{\"severity\": 0|1|2|3, \"justification\": \"one short sentence\"}.";

const UNIQUENESS_SYSTEM_PROMPT: &str = "You compare one student's issue with the issues other \
students raised about the same explanation. Rate how distinct it is: 1.0 = completely unique, \
0.0 = a near-duplicate of another issue. Return ONLY JSON of the form {\"uniqueness\": <float \
between 0 and 1>}.";

fn severity_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Interpret a severity reply
///
/// Missing, non-integer or out-of-range severities become
/// `DEFAULT_SEVERITY`; judging noise must not abort a round.
pub fn parse_severity(value: &Value) -> SeverityVerdict {
    let justification = value
        .get("justification")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let raw = value.get("severity").and_then(severity_value);
    let severity = match raw {
        Some(v) if (0..=i64::from(MAX_SEVERITY)).contains(&v) => v as u8,
        other => {
            let returned = other
                .map(|v| v.to_string())
                .or_else(|| value.get("severity").map(|v| v.to_string()));
            warn!(
                "Severity judge returned {:?}; using {}",
                returned, DEFAULT_SEVERITY
            );
            DEFAULT_SEVERITY
        }
    };

    SeverityVerdict {
        severity,
        justification,
    }
}

/// Interpret a uniqueness reply, clamped to [0, 1]
///
/// Returns `None` when the reply carries no usable value; a string must be
/// a bare number.
pub fn parse_uniqueness(value: &Value) -> Option<f64> {
    let raw = match value.get("uniqueness")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}

/// Severity judge backed by the text-generation service
pub struct LlmSeverityJudge {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl LlmSeverityJudge {
    pub fn new(generator: Arc<dyn TextGenerator>, models: &ModelConfig) -> Self {
        Self {
            generator,
            model: models.model_for_role(AgentRole::SeverityJudge).to_string(),
        }
    }
}

#[async_trait]
impl SeverityJudge for LlmSeverityJudge {
    async fn judge_severity(
        &self,
        issue: &str,
        explanation: &str,
        quote: Option<&str>,
    ) -> Result<SeverityVerdict> {
        let mut user = format!("Explanation:\n{}\n\nIssue:\n{}", explanation, issue);
        if let Some(quote) = quote {
            user.push_str(&format!("\n\nQuoted passage:\n\"{}\"", quote));
        }

        let request = GenerationRequest::new(
            AgentRole::SeverityJudge,
            SEVERITY_SYSTEM_PROMPT,
            user,
            GenerationOptions::judge(JUDGE_MAX_TOKENS).with_model(&self.model),
        );

        // Parse failure is fatal; only the value itself is clamped
        let value = self.generator.generate(request).await?.into_json()?;
        let verdict = parse_severity(&value);
        debug!(severity = verdict.severity, "Severity judged");
        Ok(verdict)
    }
}

/// Uniqueness judge backed by the text-generation service
pub struct LlmUniquenessJudge {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl LlmUniquenessJudge {
    pub fn new(generator: Arc<dyn TextGenerator>, models: &ModelConfig) -> Self {
        Self {
            generator,
            model: models.model_for_role(AgentRole::UniquenessJudge).to_string(),
        }
    }
}

#[async_trait]
impl UniquenessJudge for LlmUniquenessJudge {
    async fn judge_uniqueness(
        &self,
        issue: &str,
        other_issues: &[String],
    ) -> Result<UniquenessVerdict> {
        if other_issues.is_empty() {
            return Ok(UniquenessVerdict::no_peers());
        }

        let mut user = format!("This student's issue:\n{}\n\nOther students' issues:\n", issue);
        for (i, other) in other_issues.iter().enumerate() {
            user.push_str(&format!("{}. {}\n", i + 1, other));
        }

        let request = GenerationRequest::new(
            AgentRole::UniquenessJudge,
            UNIQUENESS_SYSTEM_PROMPT,
            user,
            GenerationOptions::judge(JUDGE_MAX_TOKENS).with_model(&self.model),
        );

        let value = self.generator.generate(request).await?.into_json()?;
        let uniqueness = parse_uniqueness(&value).ok_or_else(|| {
            tutor_core::TutorError::InvalidOutput(
                "uniqueness judge reply has no 'uniqueness' value".to_string(),
            )
        })?;

        Ok(UniquenessVerdict {
            uniqueness,
            source: UniquenessSource::Judge,
        })
    }
}

/// Longest-common-subsequence length over chars
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity ratio `2 * lcs / (len_a + len_b)`, case-insensitive, in [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    (2 * lcs_len(&a, &b)) as f64 / total as f64
}

/// Local uniqueness judge: `1 - max(similarity)` against every peer
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicUniquenessJudge;

impl HeuristicUniquenessJudge {
    pub fn score(&self, issue: &str, other_issues: &[String]) -> UniquenessVerdict {
        if other_issues.is_empty() {
            return UniquenessVerdict::no_peers();
        }

        let max_similarity = other_issues
            .iter()
            .map(|other| similarity(issue, other))
            .fold(0.0_f64, f64::max);

        UniquenessVerdict {
            uniqueness: (1.0 - max_similarity).clamp(0.0, 1.0),
            source: UniquenessSource::Heuristic,
        }
    }
}

#[async_trait]
impl UniquenessJudge for HeuristicUniquenessJudge {
    async fn judge_uniqueness(
        &self,
        issue: &str,
        other_issues: &[String],
    ) -> Result<UniquenessVerdict> {
        Ok(self.score(issue, other_issues))
    }
}

/// Primary judge with a local heuristic behind it
///
/// Any failure of the primary judge, external or malformed reply, degrades
/// to the heuristic, so this judge never fails.
pub struct FallbackUniquenessJudge {
    primary: Arc<dyn UniquenessJudge>,
    fallback: HeuristicUniquenessJudge,
}

impl FallbackUniquenessJudge {
    pub fn new(primary: Arc<dyn UniquenessJudge>) -> Self {
        Self {
            primary,
            fallback: HeuristicUniquenessJudge,
        }
    }
}

#[async_trait]
impl UniquenessJudge for FallbackUniquenessJudge {
    async fn judge_uniqueness(
        &self,
        issue: &str,
        other_issues: &[String],
    ) -> Result<UniquenessVerdict> {
        match self.primary.judge_uniqueness(issue, other_issues).await {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                warn!("Uniqueness judge failed ({}); using similarity heuristic", e);
                Ok(self.fallback.score(issue, other_issues))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tutor_agent::ScriptedGenerator;

    #[test]
    fn test_parse_severity_in_range() {
        let verdict = parse_severity(&json!({"severity": 3, "justification": " Wrong sign "}));
        assert_eq!(verdict.severity, 3);
        assert_eq!(verdict.justification, "Wrong sign");

        assert_eq!(parse_severity(&json!({"severity": 0})).severity, 0);
        assert_eq!(parse_severity(&json!({"severity": "2"})).severity, 2);
        assert_eq!(parse_severity(&json!({"severity": 2.0})).severity, 2);
    }

    #[test]
    fn test_parse_severity_clamps_to_default() {
        for bad in [
            json!({"severity": 7}),
            json!({"severity": -1}),
            json!({"severity": 1.5}),
            json!({"severity": "high"}),
            json!({"justification": "no value"}),
            json!([1, 2]),
        ] {
            assert_eq!(parse_severity(&bad).severity, DEFAULT_SEVERITY, "{}", bad);
        }
    }

    #[test]
    fn test_parse_uniqueness() {
        assert_eq!(parse_uniqueness(&json!({"uniqueness": 0.25})), Some(0.25));
        assert_eq!(parse_uniqueness(&json!({"uniqueness": 4})), Some(1.0));
        assert_eq!(parse_uniqueness(&json!({"uniqueness": " 0.4 "})), Some(0.4));
        assert_eq!(parse_uniqueness(&json!({"other": 1})), None);
    }

    #[test]
    fn test_parse_uniqueness_rejects_non_numeric_strings() {
        for bad in ["high", "very distinct", "about 0.4", "2023 edition", "NaN", ""] {
            assert_eq!(parse_uniqueness(&json!({ "uniqueness": bad })), None, "{}", bad);
        }
        assert_eq!(parse_uniqueness(&json!({"uniqueness": "10"})), Some(1.0));
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("Missing units", "missing units"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        let s = similarity("abcd", "abxd");
        assert!((s - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_uses_most_similar_peer() {
        let judge = HeuristicUniquenessJudge;
        let verdict = judge.score(
            "abcd",
            &["xyzw".to_string(), "abxd".to_string()],
        );
        assert!((verdict.uniqueness - 0.25).abs() < 1e-9);
        assert_eq!(verdict.source, UniquenessSource::Heuristic);
    }

    #[test]
    fn test_heuristic_no_peers_is_unique() {
        let verdict = HeuristicUniquenessJudge.score("anything", &[]);
        assert_eq!(verdict.uniqueness, 1.0);
        assert_eq!(verdict.source, UniquenessSource::NoPeers);
    }

    #[tokio::test]
    async fn test_llm_uniqueness_no_peers_skips_call() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = LlmUniquenessJudge::new(generator.clone(), &ModelConfig::default());

        let verdict = judge.judge_uniqueness("issue", &[]).await.unwrap();
        assert_eq!(verdict.uniqueness, 1.0);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_on_external_failure() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_error(AgentRole::UniquenessJudge, "503 upstream");
        let judge = FallbackUniquenessJudge::new(Arc::new(LlmUniquenessJudge::new(
            generator.clone(),
            &ModelConfig::default(),
        )));

        let verdict = judge
            .judge_uniqueness("abcd", &["abxd".to_string()])
            .await
            .unwrap();
        assert_eq!(verdict.source, UniquenessSource::Heuristic);
        assert!((verdict.uniqueness - 0.25).abs() < 1e-9);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_on_malformed_reply() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(AgentRole::UniquenessJudge, "they look different to me");
        let judge = FallbackUniquenessJudge::new(Arc::new(LlmUniquenessJudge::new(
            generator,
            &ModelConfig::default(),
        )));

        let verdict = judge
            .judge_uniqueness("abc", &["xyz".to_string()])
            .await
            .unwrap();
        assert_eq!(verdict.source, UniquenessSource::Heuristic);
        assert_eq!(verdict.uniqueness, 1.0);
    }

    #[tokio::test]
    async fn test_fallback_on_non_numeric_uniqueness() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(
            AgentRole::UniquenessJudge,
            json!({"uniqueness": "very distinct"}),
        );
        let judge = FallbackUniquenessJudge::new(Arc::new(LlmUniquenessJudge::new(
            generator.clone(),
            &ModelConfig::default(),
        )));

        let verdict = judge
            .judge_uniqueness("abcd", &["abcd".to_string()])
            .await
            .unwrap();
        assert_eq!(verdict.source, UniquenessSource::Heuristic);
        assert_eq!(verdict.uniqueness, 0.0);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_severity_parse_failure_is_fatal() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(AgentRole::SeverityJudge, "pretty bad I guess");
        let judge = LlmSeverityJudge::new(generator, &ModelConfig::default());

        let err = judge.judge_severity("issue", "text", None).await.unwrap_err();
        assert!(matches!(err, tutor_core::TutorError::Parse(_)));
    }

    #[tokio::test]
    async fn test_llm_severity_request_shape() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(AgentRole::SeverityJudge, json!({"severity": 2, "justification": "ok"}));
        let judge = LlmSeverityJudge::new(generator.clone(), &ModelConfig::default());

        let verdict = judge
            .judge_severity("Missing units", "v = 3", Some("v = 3"))
            .await
            .unwrap();
        assert_eq!(verdict.severity, 2);

        let request = &generator.requests()[0];
        assert_eq!(request.options.temperature, 0.0);
        assert!(request.options.json_mode);
        assert!(request.user_payload.contains("Quoted passage"));
    }
}
