//! Deterministic text generator for tests and dry runs

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;
use tutor_core::{AgentRole, Result, TutorError};

use crate::client::TextGenerator;
use crate::types::{GenerationOutput, GenerationRequest};

#[derive(Debug, Clone)]
enum ScriptedReply {
    Output(GenerationOutput),
    Failure(String),
}

type ScriptKey = (AgentRole, Option<String>);

/// Replays queued replies per role
///
/// A reply queued for a (role, subject) pair is served before the
/// role-wide queue, so tests can script one persona without scripting all of
/// them. When both queues are empty the role default is repeated, and with no
/// default the call fails with `TutorError::Generation`.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    queues: Mutex<HashMap<ScriptKey, VecDeque<ScriptedReply>>>,
    defaults: Mutex<HashMap<AgentRole, GenerationOutput>>,
    requests: Mutex<Vec<GenerationRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for every call in this role
    pub fn push(&self, role: AgentRole, output: impl Into<GenerationOutput>) -> &Self {
        self.enqueue((role, None), ScriptedReply::Output(output.into()))
    }

    /// Queue a reply for one subject (usually a persona id)
    pub fn push_for(
        &self,
        role: AgentRole,
        subject: &str,
        output: impl Into<GenerationOutput>,
    ) -> &Self {
        self.enqueue(
            (role, Some(subject.to_string())),
            ScriptedReply::Output(output.into()),
        )
    }

    /// Queue a failing call for this role
    pub fn push_error(&self, role: AgentRole, message: &str) -> &Self {
        self.enqueue((role, None), ScriptedReply::Failure(message.to_string()))
    }

    /// Queue a failing call for one subject
    pub fn push_error_for(&self, role: AgentRole, subject: &str, message: &str) -> &Self {
        self.enqueue(
            (role, Some(subject.to_string())),
            ScriptedReply::Failure(message.to_string()),
        )
    }

    /// Reply served whenever the role's queues are exhausted
    pub fn set_default(&self, role: AgentRole, output: impl Into<GenerationOutput>) -> &Self {
        if let Ok(mut defaults) = self.defaults.lock() {
            defaults.insert(role, output.into());
        }
        self
    }

    /// Total calls served (including failures)
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Calls made in one role
    pub fn calls_for(&self, role: AgentRole) -> usize {
        self.requests
            .lock()
            .map(|requests| requests.iter().filter(|r| r.role == role).count())
            .unwrap_or(0)
    }

    /// Every request received, in arrival order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn enqueue(&self, key: ScriptKey, reply: ScriptedReply) -> &Self {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(key).or_default().push_back(reply);
        }
        self
    }

    fn next_reply(&self, request: &GenerationRequest) -> Result<Option<ScriptedReply>> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| TutorError::Other("scripted generator lock poisoned".to_string()))?;

        if let Some(subject) = &request.subject {
            let key = (request.role, Some(subject.clone()));
            if let Some(reply) = queues.get_mut(&key).and_then(|q| q.pop_front()) {
                return Ok(Some(reply));
            }
        }
        if let Some(reply) = queues
            .get_mut(&(request.role, None))
            .and_then(|q| q.pop_front())
        {
            return Ok(Some(reply));
        }
        drop(queues);

        let defaults = self
            .defaults
            .lock()
            .map_err(|_| TutorError::Other("scripted generator lock poisoned".to_string()))?;
        Ok(defaults
            .get(&request.role)
            .cloned()
            .map(ScriptedReply::Output))
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        debug!(%idx, role = %request.role, subject = ?request.subject, "ScriptedGenerator::generate");

        let reply = self.next_reply(&request)?;
        let role = request.role;
        let subject = request.subject.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        match reply {
            Some(ScriptedReply::Output(output)) => Ok(output),
            Some(ScriptedReply::Failure(message)) => Err(TutorError::Generation(message)),
            None => Err(TutorError::Generation(format!(
                "no scripted reply for {} ({:?})",
                role, subject
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationOptions;

    fn request(role: AgentRole, subject: Option<&str>) -> GenerationRequest {
        let req = GenerationRequest::new(role, "sys", "payload", GenerationOptions::default());
        match subject {
            Some(s) => req.with_subject(s),
            None => req,
        }
    }

    #[tokio::test]
    async fn test_subject_queue_served_first() {
        let generator = ScriptedGenerator::new();
        generator
            .push(AgentRole::Student, "generic")
            .push_for(AgentRole::Student, "advanced", "specific");

        let first = generator
            .generate(request(AgentRole::Student, Some("advanced")))
            .await
            .unwrap();
        let second = generator
            .generate(request(AgentRole::Student, Some("advanced")))
            .await
            .unwrap();

        assert_eq!(first, GenerationOutput::from("specific"));
        assert_eq!(second, GenerationOutput::from("generic"));
        assert_eq!(generator.calls_for(AgentRole::Student), 2);
    }

    #[tokio::test]
    async fn test_default_repeats_and_exhaustion_errors() {
        let generator = ScriptedGenerator::new();
        generator.set_default(AgentRole::Teacher, "again");

        for _ in 0..3 {
            let out = generator
                .generate(request(AgentRole::Teacher, None))
                .await
                .unwrap();
            assert_eq!(out.into_text(), "again");
        }

        let err = generator
            .generate(request(AgentRole::SeverityJudge, Some("p1")))
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::Generation(_)));
        assert_eq!(generator.call_count(), 4);
        assert_eq!(generator.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let generator = ScriptedGenerator::new();
        generator.push_error(AgentRole::UniquenessJudge, "timeout");

        let err = generator
            .generate(request(AgentRole::UniquenessJudge, Some("p1")))
            .await
            .unwrap_err();
        assert!(err.is_external());
    }
}
