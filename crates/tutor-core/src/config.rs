//! Configuration management for the tutor loop
//!
//! A single `TutorConfig` is built once at process start (from `tutor.toml`
//! or defaults) and passed by reference into the controller and agents.
//! Nothing reads configuration from ambient global state after that.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::types::{AgentRole, Persona, StopConfig};
use crate::{Result, TutorError};

/// File name looked up by `TutorConfig::load_or_default`
pub const CONFIG_FILE_NAME: &str = "tutor.toml";

/// Run-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorConfig {
    /// Model selection
    #[serde(default)]
    pub models: ModelConfig,

    /// Stopping policy parameters
    #[serde(default)]
    pub stopping: StopConfig,

    /// Critique ranking parameters
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Teacher output limits
    #[serde(default)]
    pub teacher: TeacherConfig,

    /// Execution options
    #[serde(default)]
    pub run: RunConfig,

    /// Student personas, in iteration order
    #[serde(default = "default_personas")]
    pub personas: Vec<Persona>,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model to use
    #[serde(default = "default_model")]
    pub default: String,

    #[serde(default)]
    pub teacher: Option<String>,

    #[serde(default)]
    pub student: Option<String>,

    /// Shared by severity, uniqueness, explanation and pairwise judges
    #[serde(default)]
    pub judge: Option<String>,

    /// Used by the terminal single-answer step
    #[serde(default)]
    pub grader: Option<String>,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Upper bound on completion tokens for any call
    #[serde(default = "default_model_max_tokens")]
    pub max_tokens: u32,
}

/// Critique ranking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// How many qualifying critiques reach the teacher
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Teacher output limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherConfig {
    #[serde(default = "default_word_cap")]
    pub word_cap: usize,

    #[serde(default = "default_teacher_max_tokens")]
    pub max_tokens: u32,
}

/// Execution options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Issue per-persona student and judge calls concurrently
    #[serde(default = "default_true")]
    pub concurrent_personas: bool,

    /// Seed for deterministic option shuffling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Default value providers
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_model_max_tokens() -> u32 {
    1024
}

fn default_top_k() -> usize {
    3
}

fn default_word_cap() -> usize {
    180
}

fn default_teacher_max_tokens() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    17
}

/// The five built-in personas
pub fn default_personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "advanced",
            "You are an Advanced Student. You grasp concepts quickly and prefer deeper technical \
             details, edge cases, and advanced applications. You are frustrated by oversimplified \
             explanations.",
        ),
        Persona::new(
            "struggling",
            "You are a Struggling Student. You need concrete examples and scaffolding. You are \
             confused by jargon and abstract concepts and require step-by-step breakdowns.",
        ),
        Persona::new(
            "practical",
            "You are a Practical/Applied Learner. You want real-world applications and concrete \
             use cases and get impatient with pure theory.",
        ),
        Persona::new(
            "theoretical",
            "You are a Theoretical/Mathematical Learner. You prefer formal definitions and \
             mathematical rigor and want proofs/derivations where appropriate.",
        ),
        Persona::new(
            "skeptical_misconception",
            "You combine a Skeptical Adversary and a Misconception Spotter. You probe logic for \
             failure cases, request counterexamples or edge cases, and flag likely \
             misunderstandings or misleading phrasings. Prefer precise, testable revision \
             requests that reference exact phrases or steps in the explanation.",
        ),
    ]
}

impl ModelConfig {
    /// Model name for a role, falling back to the default
    pub fn model_for_role(&self, role: AgentRole) -> &str {
        let specific = match role {
            AgentRole::Teacher => self.teacher.as_deref(),
            AgentRole::Student => self.student.as_deref(),
            AgentRole::Answerer => self.grader.as_deref(),
            r if r.is_judge() => self.judge.as_deref(),
            _ => None,
        };
        specific.unwrap_or(&self.default)
    }

    /// Resolve per-role overrides from the environment once, at load time
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("TUTOR_MODEL") {
            self.default = model;
        }
        if let Some(model) = get("TEACHER_MODEL") {
            self.teacher = Some(model);
        }
        if let Some(model) = get("STUDENT_MODEL") {
            self.student = Some(model);
        }
        if let Some(model) = get("JUDGE_MODEL") {
            self.judge = Some(model);
        }
        if let Some(model) = get("GRADER_MODEL") {
            self.grader = Some(model);
        }
    }
}

impl TutorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TutorError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load `tutor.toml` from a directory or use defaults
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TutorError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TutorError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject configurations the controller cannot run
    pub fn validate(&self) -> Result<()> {
        if self.personas.is_empty() {
            return Err(TutorError::Config("at least one persona is required".to_string()));
        }

        let mut seen = HashSet::new();
        for persona in &self.personas {
            if persona.id.trim().is_empty() {
                return Err(TutorError::Config("persona id must not be empty".to_string()));
            }
            if !seen.insert(persona.id.as_str()) {
                return Err(TutorError::Config(format!("duplicate persona id: {}", persona.id)));
            }
        }

        if self.stopping.max_iterations == 0 {
            return Err(TutorError::Config("stopping.max_iterations must be at least 1".to_string()));
        }
        if self.ranking.top_k == 0 {
            return Err(TutorError::Config("ranking.top_k must be at least 1".to_string()));
        }
        if self.teacher.word_cap == 0 {
            return Err(TutorError::Config("teacher.word_cap must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Look up a persona by id
    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            models: ModelConfig::default(),
            stopping: StopConfig::default(),
            ranking: RankingConfig::default(),
            teacher: TeacherConfig::default(),
            run: RunConfig::default(),
            personas: default_personas(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            teacher: None,
            student: None,
            judge: None,
            grader: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_model_max_tokens(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

impl Default for TeacherConfig {
    fn default() -> Self {
        Self {
            word_cap: default_word_cap(),
            max_tokens: default_teacher_max_tokens(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrent_personas: default_true(),
            seed: default_seed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = TutorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.personas.len(), 5);
        assert_eq!(config.ranking.top_k, 3);
        assert_eq!(config.teacher.word_cap, 180);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = TutorConfig::from_toml_str(
            r#"
            [stopping]
            max_iterations = 3

            [[personas]]
            id = "visual"
            guidelines = "You are a Visual/Spatial Learner."
            "#,
        )
        .unwrap();

        assert_eq!(config.stopping.max_iterations, 3);
        assert_eq!(config.stopping.stagnation_window, 2);
        assert_eq!(config.personas.len(), 1);
        assert_eq!(config.personas[0].id, "visual");
    }

    #[test]
    fn test_duplicate_personas_rejected() {
        let result = TutorConfig::from_toml_str(
            r#"
            [[personas]]
            id = "a"
            guidelines = "x"

            [[personas]]
            id = "a"
            guidelines = "y"
            "#,
        );
        assert!(matches!(result, Err(TutorError::Config(_))));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let result = TutorConfig::from_toml_str("[stopping]\nmax_iterations = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_model_for_role_fallbacks() {
        let models = ModelConfig {
            judge: Some("judge-model".to_string()),
            ..Default::default()
        };
        assert_eq!(models.model_for_role(AgentRole::SeverityJudge), "judge-model");
        assert_eq!(models.model_for_role(AgentRole::PairwiseJudge), "judge-model");
        assert_eq!(models.model_for_role(AgentRole::Teacher), models.default);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("TEACHER_MODEL", "t-model"), ("STUDENT_MODEL", "  ")]
            .into_iter()
            .collect();
        let mut models = ModelConfig::default();
        models.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(models.teacher.as_deref(), Some("t-model"));
        assert_eq!(models.student, None);
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            TutorConfig::load_or_default(dir.path()).unwrap().personas.len(),
            5
        );

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[ranking]\ntop_k = 2\n",
        )
        .unwrap();
        let config = TutorConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.ranking.top_k, 2);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = TutorConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = TutorConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.personas, config.personas);
        assert_eq!(parsed.stopping, config.stopping);
    }
}
