use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{artifact, RunOutput, SegmentedTranscript};

pub const RESULT_FILE: &str = "result.json";
pub const PROGRESS_FILE: &str = "progress.log";

/// Write a value as pretty JSON
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    serde_json::to_writer_pretty(file, value).context("Failed to write JSON")?;
    Ok(())
}

fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

/// Write one `segments_{stem}.json` file per transcript
pub fn write_segments(dir: &Path, transcripts: &[SegmentedTranscript]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for transcript in transcripts {
        let path = artifact_path(dir, &artifact::segments(&transcript.transcript_id));
        write_json(&path, &transcript.segments)?;
        written.push(path);
    }
    Ok(written)
}

/// Write every artifact of a run, then `result.json` and `progress.log`
///
/// A rejected run still gets its result record and progress log.
pub fn write_run_output(dir: &Path, output: &RunOutput) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;

    let mut written = write_segments(dir, &output.transcripts)?;

    for run in &output.coders {
        let files = [
            (artifact::incidents(&run.coder_id), serde_json::to_value(&run.incidents)?),
            (artifact::categories(&run.coder_id), serde_json::to_value(&run.categories)?),
            (artifact::memos(&run.coder_id), serde_json::to_value(&run.memos)?),
            (artifact::synthesis(&run.coder_id), serde_json::to_value(&run.synthesis)?),
        ];
        for (name, value) in files {
            let path = artifact_path(dir, &name);
            write_json(&path, &value)?;
            written.push(path);
        }
    }

    if let Some(integrated) = &output.integrated {
        let files = [
            (artifact::INTEGRATED_INCIDENT_PATTERNS, serde_json::to_value(&integrated.incident_patterns)?),
            (artifact::INTEGRATED_CATEGORIES, serde_json::to_value(&integrated.categories)?),
            (artifact::INTEGRATED_MEMOS, serde_json::to_value(&integrated.memos)?),
            (artifact::INTEGRATED_SYNTHESIS, serde_json::to_value(&integrated.synthesis)?),
        ];
        for (name, value) in files {
            let path = artifact_path(dir, name);
            write_json(&path, &value)?;
            written.push(path);
        }
    }

    if !output.result.summary.is_empty() {
        let path = artifact_path(dir, artifact::ANALYSIS_SUMMARY);
        write_json(&path, &serde_json::json!({ "summary": output.result.summary }))?;
        written.push(path);
    }

    let path = dir.join(RESULT_FILE);
    write_json(&path, &output.result)?;
    written.push(path);

    let path = dir.join(PROGRESS_FILE);
    write_progress(&path, &output.progress)?;
    written.push(path);

    Ok(written)
}

fn write_progress(path: &Path, lines: &[String]) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// Human-readable listing of segments, wrapped for the terminal
pub fn format_segments(transcript: &SegmentedTranscript) -> String {
    let mut output = format!(
        "{} ({} segments)\n\n",
        transcript.transcript_id,
        transcript.len()
    );
    for segment in &transcript.segments {
        output.push_str(&format!(
            "[{}] {} chars\n",
            segment.key,
            segment.text.chars().count()
        ));
        output.push_str(&wrap_text(&segment.text, 80));
        output.push_str("\n\n");
    }
    output
}

/// Wrap text at approximately the given width
fn wrap_text(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut line_len = 0;

    for word in text.split_whitespace() {
        if line_len + word.len() + 1 > width && line_len > 0 {
            result.push('\n');
            line_len = 0;
        }
        if line_len > 0 {
            result.push(' ');
            line_len += 1;
        }
        result.push_str(word);
        line_len += word.len();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CoderRun, ComparativeSynthesis, IncidentNote, RunResult, Segment, SegmentKey,
    };

    fn output() -> RunOutput {
        RunOutput {
            result: RunResult {
                run_id: "run-1".to_string(),
                artifacts: vec!["segments_a".to_string(), "incidents_coder1".to_string()],
                summary: "Analysis settings: 1 coders;".to_string(),
                error: None,
            },
            transcripts: vec![SegmentedTranscript {
                transcript_id: "a.txt".to_string(),
                segments: vec![Segment::new("a.txt", 1, "Hello there.")],
            }],
            coders: vec![CoderRun {
                coder_id: "coder1".to_string(),
                incidents: vec![IncidentNote::placeholder(SegmentKey::new("a.txt", 1))],
                categories: Vec::new(),
                memos: Vec::new(),
                synthesis: ComparativeSynthesis::from_text("One paragraph."),
            }],
            progress: vec!["[10:00:00] Run run-1 started".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_write_run_output() {
        let dir = tempfile::tempdir().unwrap();

        let written = write_run_output(dir.path(), &output()).unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "segments_a.json",
                "incidents_coder1.json",
                "categories_coder1.json",
                "memos_coder1.json",
                "synthesis_coder1.json",
                "analysis_summary.json",
                "result.json",
                "progress.log"
            ]
        );

        let incidents: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("incidents_coder1.json")).unwrap()).unwrap();
        assert_eq!(incidents[0]["transcript"], "a.txt");
        assert_eq!(incidents[0]["segment_number"], 1);

        let result: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(RESULT_FILE)).unwrap()).unwrap();
        assert_eq!(result["artifacts"][1], "incidents_coder1");
        assert!(result.get("error").is_none());

        let progress = std::fs::read_to_string(dir.path().join(PROGRESS_FILE)).unwrap();
        assert_eq!(progress, "[10:00:00] Run run-1 started\n");
    }

    #[test]
    fn test_rejected_run_writes_result_only() {
        let dir = tempfile::tempdir().unwrap();
        let rejected = RunOutput {
            result: RunResult {
                run_id: "run-2".to_string(),
                error: Some("Missing service credential: OPENAI_API_KEY is not set".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let written = write_run_output(dir.path(), &rejected).unwrap();

        assert_eq!(written.len(), 2);
        let result = std::fs::read_to_string(dir.path().join(RESULT_FILE)).unwrap();
        assert!(result.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_format_segments_wraps() {
        let transcript = SegmentedTranscript {
            transcript_id: "a.txt".to_string(),
            segments: vec![Segment::new("a.txt", 1, "word ".repeat(40).trim())],
        };

        let text = format_segments(&transcript);

        assert!(text.starts_with("a.txt (1 segments)"));
        assert!(text.contains("[a.txt#1] 199 chars"));
        for line in text.lines() {
            assert!(line.len() <= 80);
        }
    }
}
