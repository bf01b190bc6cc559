use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::models::{AnalysisRunConfig, TranscriptInput};

/// Load a plain-text transcript; its id is the file name
pub fn load_transcript(path: &Path) -> Result<TranscriptInput> {
    let is_text = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
    if !is_text {
        bail!("Unsupported transcript format (expected .txt): {:?}", path);
    }

    let transcript_id = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid transcript file name: {:?}", path))?
        .to_string();
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;

    Ok(TranscriptInput::new(transcript_id, text))
}

/// Load transcripts in the order given
pub fn load_transcripts(paths: &[PathBuf]) -> Result<Vec<TranscriptInput>> {
    paths.iter().map(|p| load_transcript(p)).collect()
}

/// Load a run configuration file (missing fields take their defaults)
pub fn load_run_config(path: &Path) -> Result<AnalysisRunConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    parse_run_config(&content)
}

pub fn parse_run_config(json: &str) -> Result<AnalysisRunConfig> {
    serde_json::from_str(json).context("Failed to parse run configuration JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisMode, QuotePolicy};
    use std::io::Write;

    #[test]
    fn test_parse_run_config_defaults() {
        let config = parse_run_config(r#"{"analysis_mode": "constructionist", "coder_count": 2}"#).unwrap();

        assert_eq!(config.analysis_mode, AnalysisMode::Constructionist);
        assert_eq!(config.coder_count, 2);
        assert_eq!(config.segment_length, 500);
        assert_eq!(config.max_categories, 5);
        assert_eq!(config.quote_policy, QuotePolicy::CategoryBatch);
    }

    #[test]
    fn test_parse_run_config_rejects_unknown_mode() {
        assert!(parse_run_config(r#"{"analysis_mode": "freestyle"}"#).is_err());
    }

    #[test]
    fn test_load_transcripts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.txt");
        let a = dir.path().join("a.txt");
        std::fs::File::create(&b).unwrap().write_all(b"Second.").unwrap();
        std::fs::File::create(&a).unwrap().write_all(b"First.").unwrap();

        let transcripts = load_transcripts(&[b, a]).unwrap();

        assert_eq!(transcripts[0].transcript_id, "b.txt");
        assert_eq!(transcripts[0].text, "Second.");
        assert_eq!(transcripts[1].transcript_id, "a.txt");
    }

    #[test]
    fn test_non_text_transcript_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interview.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let err = load_transcript(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported transcript format"));
    }
}
