use tracing::{debug, info};

use super::{CallClass, PipelineContext};
use crate::llm::validation::IncidentResponse;
use crate::llm::{
    build_incident_payload, system_prompt, INCIDENT_PROMPT, INCIDENT_SCHEMA, INCIDENT_SPANS_SCHEMA,
};
use crate::models::{
    dedupe_labels, ComparisonNote, IncidentNote, IncidentStore, PriorIncidentContext, QuotePolicy,
    Segment,
};

/// Result of incident coding for one coder
#[derive(Debug)]
pub struct IncidentCodingResult {
    /// One note per segment, in emission order
    pub incidents: Vec<IncidentNote>,
    /// Segments whose budget ran out without a label
    pub unlabeled: usize,
    /// Generative calls issued
    pub calls: u32,
}

/// Execute incident coding: every segment, in order, against the prior window
///
/// The coordinating task owns the incident store and the window, so segments
/// are coded strictly one after another and each call sees every earlier
/// labeling decision of this coder.
pub async fn execute_incident_coding(ctx: &PipelineContext, coder_id: &str) -> IncidentCodingResult {
    let mut store = IncidentStore::seeded(ctx.segment_keys());
    let mut window = PriorIncidentContext::new();
    let mut unlabeled = 0;
    let mut calls = 0;

    info!("{}: coding {} segments", coder_id, store.len());

    for transcript in &ctx.transcripts {
        for segment in &transcript.segments {
            let (note, issued) = code_segment(ctx, coder_id, segment, &window).await;
            calls += issued;

            if note.is_labeled() {
                window.record(&note);
            } else {
                unlabeled += 1;
            }
            store.merge(note);
        }

        ctx.log.info(format!(
            "{}: coded {} ({} segments)",
            coder_id,
            transcript.transcript_id,
            transcript.len()
        ));
    }

    if unlabeled > 0 {
        ctx.log.warn(format!(
            "{}: {} of {} segments left unlabeled",
            coder_id,
            unlabeled,
            store.len()
        ));
    }

    IncidentCodingResult {
        incidents: store.into_ordered(),
        unlabeled,
        calls,
    }
}

async fn code_segment(
    ctx: &PipelineContext,
    coder_id: &str,
    segment: &Segment,
    window: &PriorIncidentContext,
) -> (IncidentNote, u32) {
    let request_spans = ctx.config.quote_policy == QuotePolicy::IncidentSpans;
    let user = build_incident_payload(
        &ctx.config,
        segment,
        ctx.summary_for(segment.transcript_id()),
        &window.exposed(),
        request_spans,
    );
    let schema = if request_spans {
        INCIDENT_SPANS_SCHEMA
    } else {
        INCIDENT_SCHEMA
    };

    let outcome = ctx
        .services
        .request::<IncidentResponse, _>(
            CallClass::Segment,
            ctx.budgets().incident,
            system_prompt(INCIDENT_PROMPT, ctx.config.analysis_mode),
            user,
            schema,
            IncidentResponse::is_valid,
        )
        .await;

    if !outcome.valid {
        ctx.log.warn(format!(
            "{}: segment {} unlabeled after {} attempts: {}",
            coder_id,
            segment.key,
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    let note = incident_from_response(segment, outcome.value);
    debug!("{}: {} -> {:?}", coder_id, segment.key, note.labels);
    (note, outcome.calls)
}

/// Build the note for a segment, keeping only spans found in its text
fn incident_from_response(segment: &Segment, response: IncidentResponse) -> IncidentNote {
    let comparison_notes = response
        .comparison_notes
        .into_iter()
        .filter(|c| !(c.focus.is_empty() && c.similarities.is_empty() && c.differences.is_empty()))
        .map(|c| ComparisonNote {
            focus: c.focus,
            similarities: c.similarities,
            differences: c.differences,
        })
        .collect();

    let mut quote_spans: Vec<String> = Vec::new();
    for span in response.quote_spans {
        let span = span.trim();
        if !span.is_empty() && segment.text.contains(span) && !quote_spans.iter().any(|s| s == span) {
            quote_spans.push(span.to_string());
        }
    }

    IncidentNote {
        key: segment.key.clone(),
        labels: dedupe_labels(&response.labels),
        comparison_notes,
        analytic_memo: response.memo.trim().to_string(),
        quote_spans,
    }
}
