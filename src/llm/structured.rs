use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{parse_object, BackendError, GenerativeBackend};

/// One JSON-only call to the generative service
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub system: String,
    pub user: String,
    /// Compact description of the expected JSON shape
    pub schema_hint: String,
    /// Maximum calls for this unit of work
    pub attempts: u32,
    /// Per-call timeout; a timeout consumes one attempt
    pub timeout: Duration,
}

/// Retry state carried from one attempt to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptState {
    /// Zero-based index of the attempt about to be made
    pub attempt: u32,
    pub last_error: Option<String>,
    pub last_raw: Option<String>,
}

/// Compute the user prompt for the next attempt from prior failure state
pub fn next_user_prompt(base: &str, schema_hint: &str, state: &AttemptState) -> String {
    if state.attempt == 0 {
        return base.to_string();
    }

    let mut prompt = String::with_capacity(base.len() + 256);
    prompt.push_str(base);
    prompt.push_str("\n\nReturn ONLY valid JSON object with no surrounding prose.");
    if !schema_hint.is_empty() {
        prompt.push_str(" Schema: ");
        prompt.push_str(schema_hint);
    }
    if let Some(error) = &state.last_error {
        prompt.push_str("\nThe previous attempt failed: ");
        prompt.push_str(error);
    }
    prompt
}

/// Result of a validated structured call
#[derive(Debug, Clone, Default)]
pub struct StructuredOutcome {
    /// The validated mapping, or the last non-empty one if none validated
    pub value: Map<String, Value>,
    pub valid: bool,
    /// Calls actually issued
    pub calls: u32,
    /// Failure state of this unit of work only
    pub diagnostics: Diagnostics,
}

/// Last raw response and last error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub last_error: Option<String>,
    pub last_raw: Option<String>,
}

impl Diagnostics {
    /// One-line description for warnings
    pub fn describe(&self) -> String {
        match (&self.last_error, &self.last_raw) {
            (Some(error), _) => error.clone(),
            (None, Some(raw)) => {
                let preview: String = raw.chars().take(200).collect();
                format!("unusable response: {}", preview)
            }
            (None, None) => "no response".to_string(),
        }
    }
}

impl From<AttemptState> for Diagnostics {
    fn from(state: AttemptState) -> Self {
        Self {
            last_error: state.last_error,
            last_raw: state.last_raw,
        }
    }
}

#[derive(Debug)]
enum AttemptFailure {
    Backend(BackendError),
    NotJson,
    Invalid,
}

impl AttemptFailure {
    fn describe(&self) -> String {
        match self {
            AttemptFailure::Backend(e) => e.to_string(),
            AttemptFailure::NotJson => "response was not a JSON object".to_string(),
            AttemptFailure::Invalid => "response did not satisfy the expected schema".to_string(),
        }
    }
}

/// JSON-only contract over a generative backend
///
/// Never surfaces backend failures: callers always get a mapping (possibly
/// empty) and apply their own validity predicate.
pub struct StructuredClient {
    backend: Arc<dyn GenerativeBackend>,
    transient_delay: Duration,
    diagnostics: Mutex<Diagnostics>,
}

impl StructuredClient {
    pub fn new(backend: Arc<dyn GenerativeBackend>, transient_delay: Duration) -> Self {
        Self {
            backend,
            transient_delay,
            diagnostics: Mutex::new(Diagnostics::default()),
        }
    }

    /// Run a call; any non-empty object is accepted
    pub async fn run_structured(&self, request: &StructuredRequest) -> Map<String, Value> {
        self.run_validated(request, |map| !map.is_empty()).await.value
    }

    /// Run a call, treating predicate failures like any other failed attempt
    ///
    /// Issues at most `request.attempts` calls (at least one).
    pub async fn run_validated<F>(&self, request: &StructuredRequest, is_valid: F) -> StructuredOutcome
    where
        F: Fn(&Map<String, Value>) -> bool,
    {
        let attempts = request.attempts.max(1);
        let mut state = AttemptState::default();
        let mut best = Map::new();

        while state.attempt < attempts {
            let user = next_user_prompt(&request.user, &request.schema_hint, &state);
            let call = self.backend.complete(&request.system, &user);

            let failure = match tokio::time::timeout(request.timeout, call).await {
                Err(_) => AttemptFailure::Backend(BackendError::Timeout(request.timeout)),
                Ok(Err(e)) => AttemptFailure::Backend(e),
                Ok(Ok(raw)) => {
                    self.record_raw(&raw);
                    let parsed = parse_object(&raw);
                    state.last_raw = Some(raw);
                    if parsed.is_empty() {
                        AttemptFailure::NotJson
                    } else if is_valid(&parsed) {
                        return StructuredOutcome {
                            value: parsed,
                            valid: true,
                            calls: state.attempt + 1,
                            diagnostics: state.into(),
                        };
                    } else {
                        best = parsed;
                        AttemptFailure::Invalid
                    }
                }
            };

            let description = failure.describe();
            debug!("Structured call attempt {}/{} failed: {}", state.attempt + 1, attempts, description);
            self.record_error(&description);

            let back_off = matches!(&failure, AttemptFailure::Backend(e) if e.is_transient_server());
            state.attempt += 1;
            state.last_error = Some(description);

            if back_off && state.attempt < attempts && !self.transient_delay.is_zero() {
                warn!("Transient service error, retrying in {:?}", self.transient_delay);
                tokio::time::sleep(self.transient_delay).await;
            }
        }

        StructuredOutcome {
            value: best,
            valid: false,
            calls: state.attempt,
            diagnostics: state.into(),
        }
    }

    /// Connectivity check: one attempt, expects `{"ok": true}`
    pub async fn ping(&self, timeout: Duration) -> bool {
        let request = StructuredRequest {
            system: "You are a JSON responder.".to_string(),
            user: r#"{"instruction": "Return ONLY {\"ok\": true} as a JSON object."}"#.to_string(),
            schema_hint: r#"{"ok": bool}"#.to_string(),
            attempts: 1,
            timeout,
        };
        let outcome = self
            .run_validated(&request, |map| map.get("ok") == Some(&Value::Bool(true)))
            .await;
        outcome.valid
    }

    /// Last raw response and last error across every call on this client
    ///
    /// Shared by concurrent callers; per-call warnings use
    /// [`StructuredOutcome::diagnostics`] instead.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record_raw(&self, raw: &str) {
        let mut diagnostics = self.diagnostics.lock().unwrap_or_else(|e| e.into_inner());
        diagnostics.last_raw = Some(raw.to_string());
    }

    fn record_error(&self, error: &str) {
        let mut diagnostics = self.diagnostics.lock().unwrap_or_else(|e| e.into_inner());
        diagnostics.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedBackend;

    fn request(attempts: u32) -> StructuredRequest {
        StructuredRequest {
            system: "system".to_string(),
            user: "payload".to_string(),
            schema_hint: r#"{"labels": [str]}"#.to_string(),
            attempts,
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_next_prompt_first_attempt_unchanged() {
        let state = AttemptState::default();
        assert_eq!(next_user_prompt("payload", "{}", &state), "payload");
    }

    #[test]
    fn test_next_prompt_strengthened_after_failure() {
        let state = AttemptState {
            attempt: 1,
            last_error: Some("response was not a JSON object".to_string()),
            last_raw: Some("hello".to_string()),
        };
        let prompt = next_user_prompt("payload", r#"{"a": int}"#, &state);
        assert!(prompt.starts_with("payload\n\nReturn ONLY valid JSON"));
        assert!(prompt.contains(r#"Schema: {"a": int}"#));
        assert!(prompt.contains("previous attempt failed: response was not a JSON object"));
    }

    #[tokio::test]
    async fn test_retries_after_prose_then_succeeds() {
        let backend = Arc::new(ScriptedBackend::sequence(vec![
            Ok("Sorry, no JSON here".to_string()),
            Ok("```json\n{\"labels\": [\"coping\"]}\n```".to_string()),
        ]));
        let client = StructuredClient::new(backend.clone(), Duration::ZERO);

        let value = client.run_structured(&request(2)).await;

        assert_eq!(value["labels"][0], "coping");
        assert_eq!(backend.call_count(), 2);
        let prompts = backend.user_prompts();
        assert!(prompts[1].contains("Return ONLY valid JSON"));
    }

    #[tokio::test]
    async fn test_never_exceeds_attempts() {
        let backend = Arc::new(ScriptedBackend::always(Ok("not json".to_string())));
        let client = StructuredClient::new(backend.clone(), Duration::ZERO);

        let value = client.run_structured(&request(3)).await;

        assert!(value.is_empty());
        assert_eq!(backend.call_count(), 3);
        assert_eq!(client.diagnostics().last_raw.as_deref(), Some("not json"));
    }

    #[tokio::test]
    async fn test_backend_errors_become_empty_mapping() {
        let backend = Arc::new(ScriptedBackend::always(Err(BackendError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })));
        let client = StructuredClient::new(backend.clone(), Duration::from_millis(1));

        let outcome = client.run_validated(&request(2), |m| !m.is_empty()).await;

        assert!(!outcome.valid);
        assert!(outcome.value.is_empty());
        assert_eq!(outcome.calls, 2);
        assert!(client.diagnostics().last_error.unwrap().contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_delay_after_transient_status() {
        let backend = Arc::new(ScriptedBackend::sequence(vec![
            Err(BackendError::Status { status: 503, body: "unavailable".to_string() }),
            Err(BackendError::Status { status: 503, body: "unavailable".to_string() }),
        ]));
        let client = StructuredClient::new(backend.clone(), Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let outcome = client.run_validated(&request(2), |m| !m.is_empty()).await;

        assert_eq!(outcome.calls, 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_non_transient_failures() {
        let backend = Arc::new(ScriptedBackend::sequence(vec![
            Err(BackendError::Malformed("truncated".to_string())),
            Err(BackendError::Status { status: 400, body: "bad request".to_string() }),
        ]));
        let client = StructuredClient::new(backend.clone(), Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let outcome = client.run_validated(&request(2), |m| !m.is_empty()).await;

        assert_eq!(outcome.calls, 2);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(outcome.diagnostics.describe().contains("400"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_keep_their_own_failure() {
        let backend = Arc::new(ScriptedBackend::responder(|_, user| {
            if user.starts_with("alpha") {
                Err(BackendError::Transport("alpha refused".to_string()))
            } else {
                Ok("plain prose from beta".to_string())
            }
        }));
        let client = StructuredClient::new(backend.clone(), Duration::ZERO);
        let mut alpha = request(2);
        alpha.user = "alpha payload".to_string();
        let mut beta = request(2);
        beta.user = "beta payload".to_string();

        let (a, b) = tokio::join!(
            client.run_validated(&alpha, |m| !m.is_empty()),
            client.run_validated(&beta, |m| !m.is_empty()),
        );

        assert!(a.diagnostics.describe().contains("alpha refused"));
        assert_eq!(b.diagnostics.describe(), "response was not a JSON object");
        assert_eq!(b.diagnostics.last_raw.as_deref(), Some("plain prose from beta"));
    }

    #[tokio::test]
    async fn test_timeout_consumes_attempt() {
        let backend = Arc::new(
            ScriptedBackend::sequence(vec![Ok("{\"ok\": true}".to_string()), Ok("{\"ok\": true}".to_string())])
                .with_delay(Duration::from_millis(500)),
        );
        let client = StructuredClient::new(backend.clone(), Duration::ZERO);
        let mut req = request(2);
        req.timeout = Duration::from_millis(20);

        let outcome = client.run_validated(&req, |m| !m.is_empty()).await;

        assert!(!outcome.valid);
        assert_eq!(outcome.calls, 2);
        assert!(client.diagnostics().last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_result_kept_as_best() {
        let backend = Arc::new(ScriptedBackend::always(Ok("{\"categories\": []}".to_string())));
        let client = StructuredClient::new(backend.clone(), Duration::ZERO);

        let outcome = client
            .run_validated(&request(2), |m| {
                m.get("categories").and_then(|c| c.as_array()).is_some_and(|c| !c.is_empty())
            })
            .await;

        assert!(!outcome.valid);
        assert!(outcome.value.contains_key("categories"));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_ping() {
        let ok = StructuredClient::new(
            Arc::new(ScriptedBackend::always(Ok("{\"ok\": true}".to_string()))),
            Duration::ZERO,
        );
        assert!(ok.ping(Duration::from_secs(1)).await);

        let failing = StructuredClient::new(
            Arc::new(ScriptedBackend::always(Err(BackendError::Transport("refused".to_string())))),
            Duration::ZERO,
        );
        assert!(!failing.ping(Duration::from_secs(1)).await);
        assert!(failing.diagnostics().describe().contains("refused"));
    }
}
