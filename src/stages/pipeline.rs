use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::llm::validation::decode;
use crate::llm::{Diagnostics, StructuredClient, StructuredOutcome, StructuredRequest};
use crate::models::{AnalysisRunConfig, ProgressLog, Segment, SegmentKey, SegmentedTranscript};
use crate::retrieval::RetrievalIndex;

/// Attempts and per-call timeout for one kind of unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBudget {
    /// Maximum calls per unit of work
    pub attempts: u32,
    pub timeout: Duration,
}

impl StageBudget {
    pub const fn new(attempts: u32, timeout_secs: u64) -> Self {
        Self {
            attempts,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

/// Concurrent call limits per call class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallLimits {
    pub summary: usize,
    pub segment: usize,
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            summary: 4,
            segment: 2,
        }
    }
}

/// Deployment configuration for the coding pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub summary: StageBudget,
    pub incident: StageBudget,
    pub category: StageBudget,
    pub quotes: StageBudget,
    pub memo: StageBudget,
    pub synthesis: StageBudget,
    pub integration: StageBudget,
    /// Timeout for the single connectivity ping
    pub preflight_timeout: Duration,
    /// Fixed delay after a transient server error
    pub transient_retry_delay: Duration,
    pub limits: CallLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summary: StageBudget::new(2, 60),
            incident: StageBudget::new(2, 60),
            category: StageBudget::new(2, 75),
            quotes: StageBudget::new(2, 60),
            memo: StageBudget::new(2, 75),
            synthesis: StageBudget::new(2, 75),
            integration: StageBudget::new(2, 60),
            preflight_timeout: Duration::from_secs(20),
            transient_retry_delay: Duration::from_secs(2),
            limits: CallLimits::default(),
        }
    }
}

impl PipelineConfig {
    /// Override the attempt budget of every stage
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        for budget in [
            &mut self.summary,
            &mut self.incident,
            &mut self.category,
            &mut self.quotes,
            &mut self.memo,
            &mut self.synthesis,
            &mut self.integration,
        ] {
            budget.attempts = attempts;
        }
        self
    }
}

/// Generative call classes with separate concurrency limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    Summary,
    Segment,
}

/// Counting semaphores bounding in-flight generative calls
#[derive(Debug)]
pub struct CallGate {
    summary: Semaphore,
    segment: Semaphore,
}

impl CallGate {
    pub fn new(limits: CallLimits) -> Self {
        Self {
            summary: Semaphore::new(limits.summary.max(1)),
            segment: Semaphore::new(limits.segment.max(1)),
        }
    }

    /// Wait for a permit; `None` only if the gate was closed
    pub async fn acquire(&self, class: CallClass) -> Option<SemaphorePermit<'_>> {
        let semaphore = match class {
            CallClass::Summary => &self.summary,
            CallClass::Segment => &self.segment,
        };
        semaphore.acquire().await.ok()
    }

    pub fn available(&self, class: CallClass) -> usize {
        match class {
            CallClass::Summary => self.summary.available_permits(),
            CallClass::Segment => self.segment.available_permits(),
        }
    }
}

/// Typed result of a gated structured call
#[derive(Debug, Clone, Default)]
pub struct TypedOutcome<T> {
    pub value: T,
    pub valid: bool,
    pub calls: u32,
    pub diagnostics: Diagnostics,
}

/// Structured client, call gate and budgets shared by every stage
pub struct StageServices {
    pub client: StructuredClient,
    pub gate: CallGate,
    pub budgets: PipelineConfig,
}

impl StageServices {
    pub fn new(client: StructuredClient, budgets: PipelineConfig) -> Self {
        Self {
            client,
            gate: CallGate::new(budgets.limits),
            budgets,
        }
    }

    /// One unit of work: at most `budget.attempts` calls under a single permit
    pub async fn call<F>(
        &self,
        class: CallClass,
        budget: StageBudget,
        system: String,
        user: String,
        schema_hint: &str,
        is_valid: F,
    ) -> StructuredOutcome
    where
        F: Fn(&Map<String, Value>) -> bool,
    {
        let request = StructuredRequest {
            system,
            user,
            schema_hint: schema_hint.to_string(),
            attempts: budget.attempts,
            timeout: budget.timeout,
        };
        let _permit = self.gate.acquire(class).await;
        self.client.run_validated(&request, is_valid).await
    }

    /// Like [`call`](Self::call), decoding the mapping into a typed record
    ///
    /// A mapping that does not decode counts as a failed attempt; on
    /// exhaustion the best mapping is decoded leniently or defaulted.
    pub async fn request<T, F>(
        &self,
        class: CallClass,
        budget: StageBudget,
        system: String,
        user: String,
        schema_hint: &str,
        is_valid: F,
    ) -> TypedOutcome<T>
    where
        T: DeserializeOwned + Default,
        F: Fn(&T) -> bool,
    {
        let outcome = self
            .call(class, budget, system, user, schema_hint, |map| {
                decode::<T>(map).is_some_and(|record| is_valid(&record))
            })
            .await;

        TypedOutcome {
            value: decode::<T>(&outcome.value).unwrap_or_default(),
            valid: outcome.valid,
            calls: outcome.calls,
            diagnostics: outcome.diagnostics,
        }
    }
}

/// Read-only inputs shared by both coders and the integrator
pub struct PipelineContext {
    pub services: Arc<StageServices>,
    pub index: RetrievalIndex,
    pub config: AnalysisRunConfig,
    /// Transcripts in arrival order, segments in emission order
    pub transcripts: Vec<SegmentedTranscript>,
    pub summaries: HashMap<String, String>,
    pub log: ProgressLog,
}

impl PipelineContext {
    /// Every segment, transcript arrival order then segment number
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.transcripts.iter().flat_map(|t| t.segments.iter())
    }

    pub fn segment_keys(&self) -> impl Iterator<Item = &SegmentKey> {
        self.segments().map(|s| &s.key)
    }

    pub fn segment_text(&self, key: &SegmentKey) -> Option<&str> {
        self.transcripts
            .iter()
            .find(|t| t.transcript_id == key.transcript_id)
            .and_then(|t| t.segments.iter().find(|s| s.key == *key))
            .map(|s| s.text.as_str())
    }

    pub fn summary_for(&self, transcript_id: &str) -> &str {
        self.summaries
            .get(transcript_id)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn budgets(&self) -> &PipelineConfig {
        &self.services.budgets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.incident.attempts, 2);
        assert_eq!(config.category.timeout, Duration::from_secs(75));
        assert_eq!(config.transient_retry_delay, Duration::from_secs(2));
        assert_eq!(config.limits, CallLimits { summary: 4, segment: 2 });
    }

    #[test]
    fn test_with_attempts_overrides_every_stage() {
        let config = PipelineConfig::default().with_attempts(3);
        assert_eq!(config.summary.attempts, 3);
        assert_eq!(config.integration.attempts, 3);
    }

    #[tokio::test]
    async fn test_call_gate_bounds_permits() {
        let gate = CallGate::new(CallLimits { summary: 1, segment: 2 });

        let first = gate.acquire(CallClass::Segment).await;
        assert!(first.is_some());
        assert_eq!(gate.available(CallClass::Segment), 1);
        assert_eq!(gate.available(CallClass::Summary), 1);

        drop(first);
        assert_eq!(gate.available(CallClass::Segment), 2);
    }
}
