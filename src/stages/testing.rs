//! Shared fixtures for stage and run tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::{PipelineConfig, PipelineContext, StageServices};
use crate::llm::mock::ScriptedBackend;
use crate::llm::{
    BackendError, StructuredClient, CATEGORY_MERGE_PROMPT, CATEGORY_PROMPT, INCIDENT_PROMPT,
    MEMO_DIGEST_PROMPT, MEMO_PROMPT, PATTERN_MERGE_PROMPT, QUOTE_PROMPT, SUMMARY_PROMPT,
    SYNTHESIS_MERGE_PROMPT, SYNTHESIS_PROMPT,
};
use crate::models::{AnalysisRunConfig, ProgressLog, Segment, SegmentedTranscript};
use crate::retrieval::{HashingEmbedder, RetrievalIndex};

pub const SEGMENT_TEXTS: [&str; 3] = [
    "I look after my mother every evening. It is exhausting but I would not change it.",
    "My brother never calls to ask how she is. I feel alone with all of it.",
    "The support group helped me see I am not the only one. Now I ask for help sooner.",
];

pub fn fast_pipeline() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.transient_retry_delay = Duration::ZERO;
    for budget in [
        &mut config.summary,
        &mut config.incident,
        &mut config.category,
        &mut config.quotes,
        &mut config.memo,
        &mut config.synthesis,
        &mut config.integration,
    ] {
        budget.timeout = Duration::from_secs(5);
    }
    config.preflight_timeout = Duration::from_secs(5);
    config
}

pub fn transcript(id: &str, texts: &[&str]) -> SegmentedTranscript {
    SegmentedTranscript {
        transcript_id: id.to_string(),
        segments: texts
            .iter()
            .enumerate()
            .map(|(i, text)| Segment::new(id, i as u32 + 1, *text))
            .collect(),
    }
}

/// Context over the given transcripts, indexed with the hashing embedder
pub async fn context(
    config: AnalysisRunConfig,
    backend: Arc<ScriptedBackend>,
    transcripts: Vec<SegmentedTranscript>,
) -> PipelineContext {
    let pipeline = fast_pipeline();
    let client = StructuredClient::new(backend, pipeline.transient_retry_delay);
    let mut index = RetrievalIndex::new(Arc::new(HashingEmbedder::default()));
    for t in &transcripts {
        index.index(&t.transcript_id, &t.segments).await.unwrap();
    }
    let summaries: HashMap<String, String> = transcripts
        .iter()
        .map(|t| (t.transcript_id.clone(), format!("Summary of {}", t.transcript_id)))
        .collect();

    PipelineContext {
        services: Arc::new(StageServices::new(client, pipeline)),
        index,
        config,
        transcripts,
        summaries,
        log: ProgressLog::new(),
    }
}

fn payload(user: &str) -> Value {
    // Retried prompts carry a suffix after the JSON payload
    let body = user.split("\n\nReturn ONLY").next().unwrap_or(user);
    serde_json::from_str(body).unwrap_or(Value::Null)
}

fn ok(value: Value) -> Result<String, BackendError> {
    Ok(value.to_string())
}

/// Well-behaved service answering every stage with valid JSON
pub fn canned_response(system: &str, user: &str) -> Result<String, BackendError> {
    let payload = payload(user);

    if system.starts_with("You are a JSON responder.") {
        return ok(json!({"ok": true}));
    }
    if system.starts_with(SUMMARY_PROMPT) {
        return ok(json!({"summary": format!("A caregiver interview ({}).", payload["transcript"])}));
    }
    if system.starts_with(INCIDENT_PROMPT) {
        let n = payload["segment"]["segment_number"].as_u64().unwrap_or(0);
        let labels = match n {
            1 => vec!["carrying daily care", "Carrying daily care"],
            2 => vec!["feeling alone with care"],
            _ => vec!["seeking peer support"],
        };
        return ok(json!({
            "labels": labels,
            "comparison_notes": [{"focus": "care load", "similarities": "both", "differences": "none"}],
            "memo": format!("memo for segment {}", n),
        }));
    }
    if system.starts_with(CATEGORY_PROMPT) {
        let refs: Vec<Value> = payload["incidents"]
            .as_array()
            .map(|incidents| {
                incidents
                    .iter()
                    .map(|i| json!({"transcript": i["transcript"], "segment_number": i["segment_number"]}))
                    .collect()
            })
            .unwrap_or_default();
        return ok(json!({"categories": [
            {"name": "Sustaining care alone", "defining_properties": ["daily burden"], "comparative_insights": ["isolation grows"], "supporting_segments": refs},
            {"name": "Reaching out", "defining_properties": ["peer support"], "comparative_insights": [], "supporting_segments": []}
        ]}));
    }
    if system.starts_with(QUOTE_PROMPT) {
        let quotes: Vec<Value> = payload["categories"]
            .as_array()
            .map(|categories| {
                categories
                    .iter()
                    .map(|c| {
                        let first = c["contexts"][0].as_str().unwrap_or("");
                        let sentence = first.split(". ").next().unwrap_or("");
                        json!({"id": c["id"], "quotes": [sentence, "A quote nobody said."]})
                    })
                    .collect()
            })
            .unwrap_or_default();
        return ok(json!({"quotes": quotes}));
    }
    if system.starts_with(MEMO_PROMPT) {
        let memos: Vec<Value> = (1..=4)
            .map(|i| json!({"focus": format!("focus {}", i), "comparisons_made": ["a vs b"], "insights": "insight", "questions": ["why?"], "next_steps": ["sample more"]}))
            .collect();
        return ok(json!({"memos": memos}));
    }
    if system.starts_with(SYNTHESIS_PROMPT) {
        return ok(json!({"synthesis": "Caregivers   sustain care\n alone until peers help."}));
    }
    if system.starts_with(PATTERN_MERGE_PROMPT) {
        let mut patterns: Vec<Value> = Vec::new();
        if let Some(labels) = payload["labels"].as_array() {
            for item in labels {
                patterns.push(json!({
                    "label": item["label"],
                    "coders": [item["coder"]],
                    "segments": [{"transcript": item["transcript"], "segment_number": item["segment_number"]}],
                }));
            }
        }
        return ok(json!({"patterns": patterns}));
    }
    if system.starts_with(CATEGORY_MERGE_PROMPT) {
        return ok(json!({"categories": [{
            "name": "Sustaining care alone",
            "description": "Both coders saw isolation",
            "sources": [{"coder": "coder1", "category": "Sustaining care alone"}, {"coder": "coder2", "category": "Sustaining care alone"}],
            "alignment": "same core",
            "divergence": "none",
            "supporting_quotes": ["I look after my mother every evening", "invented quote"]
        }]}));
    }
    if system.starts_with(MEMO_DIGEST_PROMPT) {
        return ok(json!({"memos": [{"theme": "isolation", "shared_tensions": ["duty vs rest"], "cross_references": ["coder1: focus 1", "coder2: focus 1"], "open_questions": ["who helps?"]}]}));
    }
    if system.starts_with(SYNTHESIS_MERGE_PROMPT) {
        return ok(json!({"synthesis": "Both coders describe care sustained alone."}));
    }

    Err(BackendError::Malformed(format!("unexpected system prompt: {}", system)))
}
