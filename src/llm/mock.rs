//! Scripted generative backend for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendError, GenerativeBackend};

type Responder = Box<dyn Fn(&str, &str) -> Result<String, BackendError> + Send + Sync>;

enum Script {
    Sequence(Mutex<VecDeque<Result<String, BackendError>>>),
    Always(Result<String, BackendError>),
    Respond(Responder),
}

/// Backend returning canned responses and recording every call
pub struct ScriptedBackend {
    script: Script,
    delay: Duration,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Responses in order; errors once exhausted
    pub fn sequence(responses: Vec<Result<String, BackendError>>) -> Self {
        Self::with_script(Script::Sequence(Mutex::new(responses.into())))
    }

    pub fn always(response: Result<String, BackendError>) -> Self {
        Self::with_script(Script::Always(response))
    }

    /// Compute each response from the (system, user) prompt pair
    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Self::with_script(Script::Respond(Box::new(f)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn user_prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
    }

    /// Calls whose system prompt starts with `prefix`
    pub fn calls_with_system_prefix(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.script {
            Script::Sequence(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Malformed("script exhausted".to_string()))),
            Script::Always(response) => response.clone(),
            Script::Respond(f) => f(system, user),
        }
    }
}
