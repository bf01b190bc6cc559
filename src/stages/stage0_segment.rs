use std::collections::VecDeque;

use tracing::debug;

use crate::models::{Segment, SegmentedTranscript, TranscriptInput};

/// Boundaries tried in order: paragraph, line, sentence, clause, word
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", ", ", " "];

/// Configuration for transcript segmentation
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Target segment length in (approximate) tokens
    pub segment_length_tokens: usize,
    /// Maximum characters shared between adjacent segments
    pub overlap_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            segment_length_tokens: 500,
            overlap_chars: 80,
        }
    }
}

impl SegmenterConfig {
    pub fn with_length(segment_length_tokens: usize) -> Self {
        Self {
            segment_length_tokens,
            ..Default::default()
        }
    }

    /// Character budget per segment (about four characters per token, never below 400)
    pub fn chunk_chars(&self) -> usize {
        self.segment_length_tokens.saturating_mul(4).max(400)
    }
}

/// Split one transcript into ordered, 1-based segments
///
/// Deterministic for identical input. Empty or whitespace-only text yields
/// no segments. Every segment is a trimmed, literal substring of `text`.
pub fn segment_transcript(transcript_id: &str, text: &str, config: &SegmenterConfig) -> Vec<Segment> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunk = config.chunk_chars();
    let overlap = config.overlap_chars.min(chunk / 2);
    let pieces = split_recursive(text, SEPARATORS, chunk, overlap);

    let segments: Vec<Segment> = pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| Segment::new(transcript_id, (i + 1) as u32, piece))
        .collect();

    debug!(
        "Segmented {} into {} segments ({} chars/segment)",
        transcript_id,
        segments.len(),
        chunk
    );

    segments
}

/// Segment every transcript, keeping arrival order
pub fn segment_transcripts(inputs: &[TranscriptInput], config: &SegmenterConfig) -> Vec<SegmentedTranscript> {
    inputs
        .iter()
        .map(|input| SegmentedTranscript {
            transcript_id: input.transcript_id.clone(),
            segments: segment_transcript(&input.transcript_id, &input.text, config),
        })
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on the coarsest separator present, recursing into oversized pieces
fn split_recursive(text: &str, separators: &[&str], chunk: usize, overlap: usize) -> Vec<String> {
    let Some(pos) = separators.iter().position(|sep| text.contains(sep)) else {
        return hard_cut(text, chunk, overlap);
    };
    let separator = separators[pos];
    let finer = &separators[pos + 1..];

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in text.split_inclusive(separator) {
        if char_len(piece) <= chunk {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, chunk, overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            out.extend(hard_cut(piece, chunk, overlap));
        } else {
            out.extend(split_recursive(piece, finer, chunk, overlap));
        }
    }

    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, chunk, overlap));
    }

    out
}

/// Greedily pack consecutive pieces into segments, carrying a bounded tail
fn merge_pieces(pieces: &[&str], chunk: usize, overlap: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > chunk && !current.is_empty() {
            push_joined(&mut out, &current);

            // Keep at most `overlap` chars of whole pieces as shared context
            while total > overlap || (total + len > chunk && total > 0) {
                match current.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }

        current.push_back(piece);
        total += len;
    }

    push_joined(&mut out, &current);
    out
}

fn push_joined(out: &mut Vec<String>, pieces: &VecDeque<&str>) {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Last resort: fixed-width character windows with `overlap` chars shared
fn hard_cut(text: &str, chunk: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = chunk.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    out
}
