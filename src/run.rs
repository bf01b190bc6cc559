use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::info;
use uuid::Uuid;

use crate::llm::{GenerativeBackend, StructuredClient};
use crate::models::{
    artifact, AnalysisRunConfig, CoderRun, IntegratedResult, ProgressLog, RunOutput, RunResult,
    TranscriptInput,
};
use crate::retrieval::{Embedder, RetrievalIndex};
use crate::stages::{
    execute_integration, execute_summaries, segment_transcripts, Coder, PipelineConfig,
    PipelineContext, SegmenterConfig, StageServices,
};
use crate::RunError;

/// One end-to-end analysis over a set of transcripts
pub struct AnalysisRun {
    config: AnalysisRunConfig,
    pipeline: PipelineConfig,
    backend: Arc<dyn GenerativeBackend>,
    embedder: Arc<dyn Embedder>,
    log: ProgressLog,
}

impl AnalysisRun {
    pub fn new(
        config: AnalysisRunConfig,
        backend: Arc<dyn GenerativeBackend>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            pipeline: PipelineConfig::default(),
            backend,
            embedder,
            log: ProgressLog::new(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Handle on the run's progress log, shared with the running pipeline
    pub fn progress(&self) -> ProgressLog {
        self.log.clone()
    }

    /// Execute the run
    ///
    /// Always returns an output with a result record. Invalid input stops
    /// the run before any service call; everything after that degrades
    /// to warnings, except integration failures, which are recorded as the
    /// terminal error while the coder artifacts are kept.
    pub async fn execute(self, transcripts: Vec<TranscriptInput>) -> RunOutput {
        let run_id = Uuid::new_v4().to_string();
        let log = self.log.clone();
        log.info(format!("Run {} started", run_id));

        if let Err(e) = self.config.validate().and_then(|_| validate_inputs(&transcripts)) {
            return rejected_run(run_id, &e, log);
        }

        let config = self.config;
        let model = self.backend.model_name().to_string();
        let client = StructuredClient::new(self.backend, self.pipeline.transient_retry_delay);
        if !client.ping(self.pipeline.preflight_timeout).await {
            log.warn(format!(
                "Preflight check failed, continuing: {}",
                client.diagnostics().describe()
            ));
        }
        let services = Arc::new(StageServices::new(client, self.pipeline));

        let mut artifacts = Vec::new();
        let segmented = segment_transcripts(
            &transcripts,
            &SegmenterConfig::with_length(config.segment_length),
        );
        for transcript in &segmented {
            if transcript.is_empty() {
                log.warn(format!("{} produced no segments", transcript.transcript_id));
            }
            artifacts.push(artifact::segments(&transcript.transcript_id));
        }
        let total: usize = segmented.iter().map(|t| t.len()).sum();
        log.info(format!(
            "Segmented {} transcripts into {} segments",
            segmented.len(),
            total
        ));

        let mut index = RetrievalIndex::new(self.embedder);
        for transcript in &segmented {
            if let Err(e) = index.index(&transcript.transcript_id, &transcript.segments).await {
                log.warn(format!("Indexing {} failed: {:#}", transcript.transcript_id, e));
            }
        }
        log.info(format!("Retrieval index ready ({} passages)", index.len()));

        let summaries = execute_summaries(services.clone(), &config, &transcripts, &log).await;
        let summary_map: HashMap<String, String> = summaries
            .iter()
            .map(|s| (s.transcript_id.clone(), s.summary.clone()))
            .collect();

        let ctx = Arc::new(PipelineContext {
            services,
            index,
            config: config.clone(),
            transcripts: segmented.clone(),
            summaries: summary_map,
            log: log.clone(),
        });

        let mut error = None;
        let coders = run_coders(&ctx, config.coder_count, &mut error).await;
        for run in &coders {
            artifacts.push(artifact::incidents(&run.coder_id));
            artifacts.push(artifact::categories(&run.coder_id));
            artifacts.push(artifact::memos(&run.coder_id));
            artifacts.push(artifact::synthesis(&run.coder_id));
        }

        let mut integrated = None;
        if config.coder_count > 1 && coders.len() > 1 {
            let task_ctx = ctx.clone();
            let task_coders = coders.clone();
            let handle = tokio::spawn(async move { execute_integration(&task_ctx, &task_coders).await });
            match handle.await {
                Ok(result) => {
                    artifacts.extend(
                        [
                            artifact::INTEGRATED_INCIDENT_PATTERNS,
                            artifact::INTEGRATED_CATEGORIES,
                            artifact::INTEGRATED_MEMOS,
                            artifact::INTEGRATED_SYNTHESIS,
                        ]
                        .map(String::from),
                    );
                    integrated = Some(result);
                }
                Err(e) => {
                    log.warn(format!("Integration failed: {}", e));
                    error = Some(format!("Integration failed: {}", e));
                }
            }
        }

        let summary = build_summary(&config, &model, &coders, integrated.as_ref());
        artifacts.push(artifact::ANALYSIS_SUMMARY.to_string());
        log.info(summary.clone());
        log.info(format!("Run {} complete", run_id));

        RunOutput {
            result: RunResult {
                run_id,
                artifacts,
                summary,
                error,
            },
            transcripts: segmented,
            summaries,
            coders,
            integrated,
            progress: log.lines(),
        }
    }
}

async fn run_coders(ctx: &Arc<PipelineContext>, coder_count: usize, error: &mut Option<String>) -> Vec<CoderRun> {
    let mut tasks = JoinSet::new();
    for n in 1..=coder_count {
        let coder = Coder::new(format!("coder{}", n), ctx.clone());
        tasks.spawn(async move { (n, coder.run().await) });
    }

    let mut finished = Vec::with_capacity(coder_count);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(pair) => finished.push(pair),
            Err(e) => {
                ctx.log.warn(format!("Coder task failed: {}", e));
                *error = Some(format!("Coder task failed: {}", e));
            }
        }
    }

    finished.sort_by_key(|(n, _)| *n);
    finished.into_iter().map(|(_, run)| run).collect()
}

fn validate_inputs(transcripts: &[TranscriptInput]) -> Result<(), RunError> {
    if transcripts.is_empty() {
        return Err(RunError::NoTranscripts);
    }
    let mut seen = HashSet::new();
    let mut artifacts: HashMap<String, &str> = HashMap::new();
    for transcript in transcripts {
        let id = transcript.transcript_id.as_str();
        if !seen.insert(id) {
            return Err(RunError::DuplicateTranscript(id.to_string()));
        }
        let name = artifact::segments(id);
        if let Some(first) = artifacts.get(&name) {
            return Err(RunError::ArtifactClash {
                first: first.to_string(),
                second: id.to_string(),
                artifact: name,
            });
        }
        artifacts.insert(name, id);
    }
    Ok(())
}

/// Output for a run stopped before any stage: only the error is recorded
pub fn rejected_run(run_id: String, error: &RunError, log: ProgressLog) -> RunOutput {
    log.warn(format!("Run {} rejected: {}", run_id, error));
    info!("No stage was started");

    RunOutput {
        result: RunResult {
            run_id,
            artifacts: Vec::new(),
            summary: String::new(),
            error: Some(error.to_string()),
        },
        progress: log.lines(),
        ..Default::default()
    }
}

/// Deterministic settings-and-counts summary
pub fn build_summary(
    config: &AnalysisRunConfig,
    model: &str,
    coders: &[CoderRun],
    integrated: Option<&IntegratedResult>,
) -> String {
    let max_categories = if config.max_categories == 0 {
        "auto".to_string()
    } else {
        config.max_categories.to_string()
    };

    let mut summary = format!(
        "Analysis settings: {} coders; analysis_mode = \"{}\"; cac_enabled = {}; max_categories = {}; segment_length = {}; model = \"{}\".",
        config.coder_count,
        config.analysis_mode,
        config.cac_enabled,
        max_categories,
        config.segment_length,
        model
    );

    for run in coders {
        summary.push_str(&format!(
            " {}: {} incidents, {} distinct labels, {} categories, {} memos.",
            run.coder_id,
            run.incidents.len(),
            run.distinct_label_count(),
            run.categories.len(),
            run.memos.len()
        ));
    }

    if let Some(integrated) = integrated {
        summary.push_str(&format!(
            " Integrated: {} incident patterns, {} categories, {} memos.",
            integrated.incident_patterns.len(),
            integrated.categories.len(),
            integrated.memos.len()
        ));
    }

    summary
}
