//! Competitive critique ranking
//!
//! Each persona's issue is scored `severity + uniqueness * 3.0`. Severity is
//! judge-assigned, never self-reported, and the uniqueness bonus rewards
//! issues nobody else on the panel raised. Only the top `top_k` entries with
//! non-zero severity reach the teacher.
//!
//! Equal scores keep persona input order (stable sort). No secondary key is
//! defined; callers must not rely on the order of tied entries.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};
use tutor_core::{
    CritiqueMessage, JudgedCritique, PersonaScore, Result, ScoreHistoryEntry, UniquenessSource,
};

use crate::judge::{SeverityJudge, UniquenessJudge};

/// Weight of uniqueness relative to the 0-3 severity scale
pub const UNIQUENESS_WEIGHT: f64 = 3.0;

/// Digest sent to the teacher when no critique has non-zero severity
pub const NO_SIGNIFICANT_ISSUES: &str = "No significant issues identified by students.";

/// Everything one round of ranking produced
#[derive(Debug, Clone, PartialEq)]
pub struct RankingOutcome {
    /// Highest score first, ranks 1..=n
    pub ranked: Vec<JudgedCritique>,
    /// Top-k entries with severity > 0
    pub filtered: Vec<JudgedCritique>,
    pub digest: String,
    /// Per persona, in input order
    pub reward_scores: Vec<PersonaScore>,
    /// One entry per persona, in input order
    pub history_entries: Vec<(String, ScoreHistoryEntry)>,
}

/// Composite score for one judged issue
pub fn composite_score(severity: u8, uniqueness: f64) -> f64 {
    f64::from(severity) + uniqueness * UNIQUENESS_WEIGHT
}

/// Teacher-facing summary of the filtered critiques
pub fn format_digest(filtered: &[JudgedCritique]) -> String {
    if filtered.is_empty() {
        return NO_SIGNIFICANT_ISSUES.to_string();
    }

    let mut digest = String::new();
    for (i, critique) in filtered.iter().enumerate() {
        digest.push_str(&format!(
            "{}. [{}] (severity {}, score {:.2}) {}\n",
            i + 1,
            critique.persona,
            critique.validated_severity,
            critique.score,
            critique.issue.as_deref().unwrap_or_default()
        ));
        if let Some(quote) = &critique.quote {
            digest.push_str(&format!("   Quote: \"{}\"\n", quote));
        }
    }
    digest.trim_end().to_string()
}

/// Judges, scores and ranks one round of critiques
pub struct RankingEngine {
    severity: Arc<dyn SeverityJudge>,
    uniqueness: Arc<dyn UniquenessJudge>,
    top_k: usize,
    concurrent: bool,
}

impl RankingEngine {
    pub fn new(
        severity: Arc<dyn SeverityJudge>,
        uniqueness: Arc<dyn UniquenessJudge>,
        top_k: usize,
    ) -> Self {
        Self {
            severity,
            uniqueness,
            top_k,
            concurrent: true,
        }
    }

    /// Judge personas one after another instead of concurrently
    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Rank one round
    ///
    /// Severity failures are fatal for the round. Judging order never
    /// affects the result: everything is collected before sorting.
    pub async fn rank(
        &self,
        critiques: &[CritiqueMessage],
        explanation: &str,
        iteration: usize,
    ) -> Result<RankingOutcome> {
        let issues: Vec<Option<String>> = critiques
            .iter()
            .map(|m| m.to_critique().issue)
            .collect();

        let judged: Vec<JudgedCritique> = if self.concurrent {
            let futures = critiques
                .iter()
                .enumerate()
                .map(|(idx, message)| self.judge_one(idx, message, &issues, explanation));
            join_all(futures).await.into_iter().collect::<Result<_>>()?
        } else {
            let mut judged = Vec::with_capacity(critiques.len());
            for (idx, message) in critiques.iter().enumerate() {
                judged.push(self.judge_one(idx, message, &issues, explanation).await?);
            }
            judged
        };

        let reward_scores = judged
            .iter()
            .map(|j| PersonaScore {
                persona: j.persona.clone(),
                score: j.score,
                validated_severity: j.validated_severity,
            })
            .collect();

        let mut ranked = judged;
        // Stable: ties keep persona order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        for (i, critique) in ranked.iter_mut().enumerate() {
            critique.rank = i + 1;
        }

        let filtered: Vec<JudgedCritique> = ranked
            .iter()
            .filter(|c| c.validated_severity > 0)
            .take(self.top_k)
            .cloned()
            .collect();
        let digest = format_digest(&filtered);

        let mut history_entries: Vec<(String, ScoreHistoryEntry)> = ranked
            .iter()
            .map(|c| (c.persona.clone(), ScoreHistoryEntry::from_judged(iteration, c)))
            .collect();
        let order = |persona: &str| {
            critiques
                .iter()
                .position(|m| m.persona() == persona)
                .unwrap_or(usize::MAX)
        };
        history_entries.sort_by_key(|(persona, _)| order(persona));

        info!(
            "Round {} ranked: top score {:.2}, {} of {} critiques forwarded",
            iteration,
            ranked.first().map(|c| c.score).unwrap_or(0.0),
            filtered.len(),
            ranked.len()
        );

        Ok(RankingOutcome {
            ranked,
            filtered,
            digest,
            reward_scores,
            history_entries,
        })
    }

    async fn judge_one(
        &self,
        idx: usize,
        message: &CritiqueMessage,
        issues: &[Option<String>],
        explanation: &str,
    ) -> Result<JudgedCritique> {
        let critique = message.to_critique();
        let Some(issue) = critique.issue.as_deref() else {
            return Ok(JudgedCritique {
                persona: critique.persona,
                issue: None,
                quote: critique.quote,
                validated_severity: 0,
                severity_justification: String::new(),
                uniqueness: 0.0,
                uniqueness_bonus: 0.0,
                score: 0.0,
                rank: 0,
                uniqueness_source: UniquenessSource::NotJudged,
            });
        };

        let verdict = self
            .severity
            .judge_severity(issue, explanation, critique.quote.as_deref())
            .await?;

        let other_issues: Vec<String> = issues
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .filter_map(|(_, other)| other.clone())
            .collect();
        let uniqueness = self
            .uniqueness
            .judge_uniqueness(issue, &other_issues)
            .await?;

        let bonus = uniqueness.uniqueness * UNIQUENESS_WEIGHT;
        let score = composite_score(verdict.severity, uniqueness.uniqueness);
        debug!(
            persona = %critique.persona,
            severity = verdict.severity,
            uniqueness = uniqueness.uniqueness,
            score,
            "Critique judged"
        );

        Ok(JudgedCritique {
            persona: critique.persona.clone(),
            issue: critique.issue.clone(),
            quote: critique.quote.clone(),
            validated_severity: verdict.severity,
            severity_justification: verdict.justification,
            uniqueness: uniqueness.uniqueness,
            uniqueness_bonus: bonus,
            score,
            rank: 0,
            uniqueness_source: uniqueness.source,
        })
    }
}
