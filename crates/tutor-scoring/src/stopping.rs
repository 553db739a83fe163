//! Stopping policy
//!
//! Rules, first match wins:
//!
//! 1. `iteration >= max_iterations`
//! 2. every persona returned empty feedback (`{}`)
//! 3. every persona's level is 1 (nothing actionable)
//! 4. stagnation: no level-3 critique in the current round nor in the
//!    rounds before it that complete a window of `stagnation_window` rounds
//! 5. otherwise continue
//!
//! Levels live on a 1-3 scale: `validated_severity` clamped to `1..=3`, so a
//! persona that raised nothing counts as 1.
//!
//! The earlier policy that compared a 0-1 score against `threshold` with a
//! minimum improvement per window is superseded; `StopConfig::threshold` and
//! `StopConfig::stagnation_min_improvement` are not consulted.

use tracing::debug;
use tutor_core::{CritiqueMessage, PersonaScore, RoundSnapshot, StopConfig, StopDecision};

/// Highest level; its absence over a window means stagnation
pub const TOP_LEVEL: u8 = 3;

/// Map a validated severity onto the 1-3 stopping scale
pub fn stop_level(validated_severity: u8) -> u8 {
    validated_severity.clamp(1, TOP_LEVEL)
}

fn has_top_level(scores: &[PersonaScore]) -> bool {
    scores
        .iter()
        .any(|s| stop_level(s.validated_severity) == TOP_LEVEL)
}

/// Decide whether another round is worth running
///
/// `history` holds the rounds completed before this one, oldest first; the
/// current round is described by `responses` and `scores`.
pub fn decide(
    responses: &[CritiqueMessage],
    scores: &[PersonaScore],
    history: &[RoundSnapshot],
    iteration: usize,
    config: &StopConfig,
) -> StopDecision {
    if iteration >= config.max_iterations {
        return StopDecision::stop(format!(
            "Max iterations reached ({}).",
            config.max_iterations
        ));
    }

    if !responses.is_empty() && responses.iter().all(CritiqueMessage::is_empty) {
        return StopDecision::stop("All personas returned empty feedback.");
    }

    if scores
        .iter()
        .all(|s| stop_level(s.validated_severity) == 1)
    {
        return StopDecision::stop("All personas scored 1 (no actionable feedback).");
    }

    let window = config.stagnation_window;
    if window > 0 && !has_top_level(scores) {
        let prior_needed = window - 1;
        if history.len() >= prior_needed {
            let prior = &history[history.len() - prior_needed..];
            let stagnant = prior.iter().all(|round| !has_top_level(&round.reward_scores));
            debug!(window, stagnant, "Stagnation check");
            if stagnant {
                return StopDecision::stop(format!(
                    "Stagnation: no score 3 for {} consecutive rounds.",
                    window
                ));
            }
        }
    }

    StopDecision::continue_with("Actionable feedback present; continue refining.")
}
