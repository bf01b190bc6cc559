use thiserror::Error;

/// Fatal conditions detected before any pipeline stage runs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Invalid run configuration for {field}: {message}")]
    InvalidConfig { field: &'static str, message: String },

    #[error("Missing service credential: {variable} is not set")]
    MissingCredential { variable: String },

    #[error("No transcripts supplied")]
    NoTranscripts,

    #[error("Duplicate transcript id: {0}")]
    DuplicateTranscript(String),

    #[error("Transcripts {first} and {second} would share the artifact {artifact}")]
    ArtifactClash {
        first: String,
        second: String,
        artifact: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_error_display() {
        let err = RunError::MissingCredential {
            variable: "ANTHROPIC_API_KEY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Missing service credential: ANTHROPIC_API_KEY is not set"
        );
    }
}
