//! Activity Logger - human-readable round log in `activity.md`
//!
//! One section per round: explanation preview, every persona's critique with
//! its judged score, the digest sent back to the teacher and the stop
//! decision. All writes are fail-open.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tutor_core::fail_open::fail_open;
use tutor_core::{QuizResults, RoundSnapshot, TutorError};

/// Maximum characters of an explanation shown in the log
const EXPLANATION_PREVIEW_CHARS: usize = 600;

pub const ACTIVITY_LOG_FILE: &str = "activity.md";

fn preview(text: &str) -> String {
    if text.chars().count() > EXPLANATION_PREVIEW_CHARS {
        let truncated: String = text.chars().take(EXPLANATION_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    pub fn new(dir: &Path) -> Self {
        Self {
            output_path: dir.join(ACTIVITY_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Start a fresh log, overwriting any previous one
    pub async fn log_run_start(&self, question_id: &str, personas: &[String], max_iterations: usize) {
        fail_open("activity_logger::log_run_start", || async {
            let content = format!(
                "# Tutor Activity Log\n\n## Question: {}\n**Started**: {}\n**Personas**: {}\n**Max Rounds**: {}\n\n---\n\n",
                question_id,
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                personas.join(", "),
                max_iterations
            );

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await
                .map_err(|e| TutorError::Io(e.to_string()))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| TutorError::Io(e.to_string()))?;
            file.flush().await.map_err(|e| TutorError::Io(e.to_string()))?;
            Ok(())
        })
        .await;
    }

    /// Log a committed round
    pub async fn log_round(&self, round: &RoundSnapshot) {
        fail_open("activity_logger::log_round", || async {
            let mut content = format!(
                "### Round {}\n**Time**: {}\n\n**Explanation**:\n> {}\n\n",
                round.iteration,
                round.completed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                preview(&round.explanation).replace('\n', "\n> ")
            );

            content.push_str("| Rank | Persona | Severity | Uniqueness | Score | Issue |\n");
            content.push_str("|---|---|---|---|---|---|\n");
            for critique in &round.critique_rankings {
                content.push_str(&format!(
                    "| {} | {} | {} | {:.2} | {:.2} | {} |\n",
                    critique.rank,
                    critique.persona,
                    critique.validated_severity,
                    critique.uniqueness,
                    critique.score,
                    critique.issue.as_deref().unwrap_or("-").replace('|', "/")
                ));
            }

            let empty = round
                .student_responses
                .iter()
                .filter(|m| m.is_empty())
                .count();
            if empty > 0 {
                content.push_str(&format!("\n{} persona(s) returned empty feedback\n", empty));
            }

            content.push_str(&format!(
                "\n**Digest**:\n```\n{}\n```\n\n**Decision**: {} ({})\n\n---\n\n",
                round.digest, round.stop.decision, round.stop.reason
            ));

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log a round abandoned on a fatal error
    pub async fn log_round_failed(&self, iteration: usize, error: &str) {
        fail_open("activity_logger::log_round_failed", || async {
            let content = format!(
                "### Round {} abandoned\n**Error**: {}\n\n---\n\n",
                iteration, error
            );
            self.append_internal(&content).await
        })
        .await;
    }

    /// Log the grading outcome
    pub async fn log_run_complete(&self, rounds: usize, reason: &str, results: &QuizResults) {
        fail_open("activity_logger::log_run_complete", || async {
            let verdict = if results.is_correct { "✓ correct" } else { "✗ incorrect" };
            let content = format!(
                "## Run Summary\n\n\
                **Completed**: {}\n\
                **Rounds**: {}\n\
                **Stop Reason**: {}\n\
                **Answer**: {} (expected {}) {}\n\
                **Explanation Score**: {}/5\n\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                rounds,
                reason,
                results.answer,
                results.correct_letter,
                verdict,
                results.explanation_score
            );
            self.append_internal(&content).await
        })
        .await;
    }

    async fn append_internal(&self, content: &str) -> tutor_core::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await
            .map_err(|e| TutorError::Io(e.to_string()))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| TutorError::Io(e.to_string()))?;
        file.flush().await.map_err(|e| TutorError::Io(e.to_string()))?;

        Ok(())
    }
}
