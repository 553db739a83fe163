//! API key lookup for the text-generation service

use std::env;
use tutor_core::{Result, TutorError};

/// Fallback variable when the configured one is unset
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Get the API key
///
/// Priority:
/// 1. The configured variable (`models.api_key_env`)
/// 2. ANTHROPIC_API_KEY
pub fn get_api_key(configured_env: &str) -> Result<String> {
    lookup_api_key(configured_env, |key| env::var(key).ok())
}

fn lookup_api_key<F>(configured_env: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in [configured_env, DEFAULT_API_KEY_ENV] {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Using API key from {}", key);
            return Ok(value);
        }
    }

    Err(TutorError::Auth(format!(
        "No API key found. Set {} (or {})",
        configured_env, DEFAULT_API_KEY_ENV
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_configured_env_priority() {
        let key = lookup_api_key(
            "TUTOR_API_KEY",
            lookup_in(&[("TUTOR_API_KEY", "custom"), ("ANTHROPIC_API_KEY", "fallback")]),
        )
        .unwrap();
        assert_eq!(key, "custom");
    }

    #[test]
    fn test_default_env_fallback() {
        let key = lookup_api_key("TUTOR_API_KEY", lookup_in(&[("ANTHROPIC_API_KEY", "fallback")]))
            .unwrap();
        assert_eq!(key, "fallback");
    }

    #[test]
    fn test_blank_key_is_missing() {
        let result = lookup_api_key("TUTOR_API_KEY", lookup_in(&[("TUTOR_API_KEY", "  ")]));
        assert!(matches!(result, Err(TutorError::Auth(_))));
    }
}
