use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::info;

use super::{CallClass, StageServices};
use crate::llm::validation::SummaryResponse;
use crate::llm::{build_summary_payload, system_prompt, SUMMARY_PROMPT, SUMMARY_SCHEMA};
use crate::models::{AnalysisRunConfig, ProgressLog, TranscriptInput, TranscriptSummary};

/// Summarize every transcript concurrently, results in arrival order
///
/// Concurrency is bounded by the summary call class. A transcript whose
/// budget runs out gets an empty summary and a warning.
pub async fn execute_summaries(
    services: Arc<StageServices>,
    config: &AnalysisRunConfig,
    transcripts: &[TranscriptInput],
    log: &ProgressLog,
) -> Vec<TranscriptSummary> {
    info!("Summarizing {} transcripts", transcripts.len());

    let mut tasks = JoinSet::new();
    for (position, transcript) in transcripts.iter().enumerate() {
        let services = services.clone();
        let system = system_prompt(SUMMARY_PROMPT, config.analysis_mode);
        let user = build_summary_payload(config, &transcript.transcript_id, &transcript.text);
        let transcript_id = transcript.transcript_id.clone();

        tasks.spawn(async move {
            let budget = services.budgets.summary;
            let outcome = services
                .request::<SummaryResponse, _>(
                    CallClass::Summary,
                    budget,
                    system,
                    user,
                    SUMMARY_SCHEMA,
                    SummaryResponse::is_valid,
                )
                .await;
            let failure = (!outcome.valid).then(|| outcome.diagnostics.describe());
            (position, transcript_id, outcome.value.summary, failure)
        });
    }

    let mut summaries: Vec<Option<TranscriptSummary>> = vec![None; transcripts.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, transcript_id, summary, failure)) => {
                if let Some(reason) = failure {
                    log.warn(format!("Summary for {} unavailable: {}", transcript_id, reason));
                }
                summaries[position] = Some(TranscriptSummary {
                    transcript_id,
                    summary: summary.trim().to_string(),
                });
            }
            Err(e) => log.warn(format!("Summary task failed: {}", e)),
        }
    }

    let summaries: Vec<TranscriptSummary> = summaries
        .into_iter()
        .zip(transcripts)
        .map(|(summary, transcript)| {
            summary.unwrap_or_else(|| TranscriptSummary {
                transcript_id: transcript.transcript_id.clone(),
                summary: String::new(),
            })
        })
        .collect();

    let ready = summaries.iter().filter(|s| !s.summary.is_empty()).count();
    log.info(format!("Summaries ready: {}/{}", ready, summaries.len()));
    summaries
}
