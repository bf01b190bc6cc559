pub mod error;
pub mod io;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod run;
pub mod stages;

pub use error::RunError;
pub use io::{format_segments, load_run_config, load_transcripts, write_run_output, write_segments};
pub use llm::{build_backend, GenerativeBackend, Provider, ServiceConfig};
pub use models::{AnalysisMode, AnalysisRunConfig, ProgressLog, QuotePolicy, RunOutput, RunResult};
pub use retrieval::{
    Embedder, HashingEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, EMBEDDING_KEY_VARIABLE,
};
pub use run::{rejected_run, AnalysisRun};
pub use stages::{segment_transcripts, PipelineConfig, SegmenterConfig};
