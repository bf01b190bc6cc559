use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique key of a segment within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    /// Transcript identifier (usually the uploaded file name)
    #[serde(rename = "transcript")]
    pub transcript_id: String,
    /// 1-based position within the transcript
    pub segment_number: u32,
}

impl SegmentKey {
    pub fn new(transcript_id: impl Into<String>, segment_number: u32) -> Self {
        Self {
            transcript_id: transcript_id.into(),
            segment_number,
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.transcript_id, self.segment_number)
    }
}

/// A bounded, ordered slice of a transcript's raw text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(flatten)]
    pub key: SegmentKey,
    /// Segment text - a literal substring of the source transcript
    pub text: String,
}

impl Segment {
    pub fn new(transcript_id: impl Into<String>, segment_number: u32, text: impl Into<String>) -> Self {
        Self {
            key: SegmentKey::new(transcript_id, segment_number),
            text: text.into(),
        }
    }

    pub fn transcript_id(&self) -> &str {
        &self.key.transcript_id
    }

    pub fn segment_number(&self) -> u32 {
        self.key.segment_number
    }
}

/// A transcript as handed over by the extraction collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptInput {
    pub transcript_id: String,
    pub text: String,
}

impl TranscriptInput {
    pub fn new(transcript_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            transcript_id: transcript_id.into(),
            text: text.into(),
        }
    }
}

/// One narrative summary per transcript, computed before coding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub transcript_id: String,
    pub summary: String,
}

/// Segments of one transcript, in emission order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentedTranscript {
    pub transcript_id: String,
    pub segments: Vec<Segment>,
}

impl SegmentedTranscript {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
