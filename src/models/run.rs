use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    ComparativeCategory, ComparativeMemo, ComparativeSynthesis, IncidentNote, SegmentKey,
    SegmentedTranscript, TranscriptSummary,
};

/// Everything one coder produced in a single pass through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderRun {
    pub coder_id: String,
    pub incidents: Vec<IncidentNote>,
    pub categories: Vec<ComparativeCategory>,
    pub memos: Vec<ComparativeMemo>,
    pub synthesis: ComparativeSynthesis,
}

impl CoderRun {
    /// Distinct labels across all incidents, compared case-insensitively
    pub fn distinct_label_count(&self) -> usize {
        let labels: std::collections::HashSet<String> = self
            .incidents
            .iter()
            .flat_map(|n| n.labels.iter())
            .map(|l| l.to_lowercase())
            .collect();
        labels.len()
    }
}

/// A label pattern merged across coders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentPattern {
    pub label: String,
    /// Coders that produced the label
    pub coders: Vec<String>,
    /// Representative segments, sorted and unique
    pub segments: Vec<SegmentKey>,
}

/// Which coder category fed an integrated category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySource {
    pub coder: String,
    pub category: String,
}

/// Category combined across coders, with alignment notes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegratedCategory {
    pub name: String,
    pub description: String,
    pub sources: Vec<CategorySource>,
    pub alignment: String,
    pub divergence: String,
    pub supporting_quotes: Vec<String>,
}

/// Digest entry cross-referencing the coders' memos
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegratedMemo {
    pub theme: String,
    pub shared_tensions: Vec<String>,
    pub cross_references: Vec<String>,
    pub open_questions: Vec<String>,
}

/// Dataset-level artifacts merged from independent coders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegratedResult {
    pub incident_patterns: Vec<IncidentPattern>,
    pub categories: Vec<IntegratedCategory>,
    pub memos: Vec<IntegratedMemo>,
    pub synthesis: ComparativeSynthesis,
}

/// Named artifacts produced by a run
pub mod artifact {
    pub const ANALYSIS_SUMMARY: &str = "analysis_summary";
    pub const INTEGRATED_INCIDENT_PATTERNS: &str = "integrated_incident_patterns";
    pub const INTEGRATED_CATEGORIES: &str = "integrated_categories";
    pub const INTEGRATED_MEMOS: &str = "integrated_memos";
    pub const INTEGRATED_SYNTHESIS: &str = "integrated_synthesis";

    pub fn incidents(coder_id: &str) -> String {
        format!("incidents_{}", coder_id)
    }

    pub fn categories(coder_id: &str) -> String {
        format!("categories_{}", coder_id)
    }

    pub fn memos(coder_id: &str) -> String {
        format!("memos_{}", coder_id)
    }

    pub fn synthesis(coder_id: &str) -> String {
        format!("synthesis_{}", coder_id)
    }

    pub fn segments(transcript_id: &str) -> String {
        let stem = std::path::Path::new(transcript_id)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(transcript_id);
        format!("segments_{}", stem)
    }
}

/// Result record: always produced, even for runs that fail early
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    /// Artifact names in production order
    pub artifacts: Vec<String>,
    /// Deterministic settings-and-counts summary
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All in-memory outputs of a run
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub result: RunResult,
    pub transcripts: Vec<SegmentedTranscript>,
    pub summaries: Vec<TranscriptSummary>,
    pub coders: Vec<CoderRun>,
    pub integrated: Option<IntegratedResult>,
    pub progress: Vec<String>,
}

/// Human-readable, timestamped progress and warning lines for a run
///
/// Cloning shares the underlying buffer, so every coder task appends to
/// the same log. Each line is also emitted through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.push(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!("{}", message);
        self.push(&format!("Warning: {}", message));
    }

    fn push(&self, message: &str) {
        let ts = chrono::Utc::now().format("%H:%M:%S");
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push(format!("[{}] {}", ts, message));
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names() {
        assert_eq!(artifact::incidents("coder1"), "incidents_coder1");
        assert_eq!(artifact::segments("interview_03.txt"), "segments_interview_03");
    }

    #[test]
    fn test_progress_log_shared_between_clones() {
        let log = ProgressLog::new();
        let other = log.clone();
        log.info("Open coding...");
        other.warn("Agent call failed");

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] Open coding..."));
        assert!(lines[1].contains("Warning: Agent call failed"));
    }

    #[test]
    fn test_distinct_label_count() {
        let run = CoderRun {
            coder_id: "coder1".to_string(),
            incidents: vec![
                IncidentNote {
                    labels: vec!["Coping".to_string(), "waiting".to_string()],
                    ..IncidentNote::placeholder(SegmentKey::new("t", 1))
                },
                IncidentNote {
                    labels: vec!["coping".to_string()],
                    ..IncidentNote::placeholder(SegmentKey::new("t", 2))
                },
            ],
            categories: vec![],
            memos: vec![],
            synthesis: ComparativeSynthesis::default(),
        };
        assert_eq!(run.distinct_label_count(), 2);
    }
}
