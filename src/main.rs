use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gtcoder::{
    build_backend, format_segments, load_run_config, load_transcripts, rejected_run,
    segment_transcripts, write_run_output, write_segments, AnalysisMode, AnalysisRun,
    AnalysisRunConfig, Embedder, HashingEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig,
    ProgressLog, Provider, QuotePolicy, RunError, SegmenterConfig, ServiceConfig,
    EMBEDDING_KEY_VARIABLE,
};

#[derive(Parser)]
#[command(name = "gtcoder")]
#[command(author, version, about = "Constant-comparative coding of interview transcripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full coding pipeline over plain-text transcripts
    Process {
        /// Transcript files (.txt), coded in the order given
        #[arg(short, long = "input", required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for artifacts, result.json and progress.log
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Run configuration (JSON); flags below override its fields
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of independent coders (1 or 2)
        #[arg(long)]
        coders: Option<usize>,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Upper bound on categories per coder (0 = auto)
        #[arg(long)]
        max_categories: Option<usize>,

        /// Approximate segment length in tokens
        #[arg(long)]
        segment_length: Option<usize>,

        /// Weave condition-action-consequence relationships into the synthesis
        #[arg(long)]
        cac: bool,

        #[arg(long, value_enum)]
        quote_policy: Option<QuotePolicyArg>,

        /// Study background passed to every stage
        #[arg(long)]
        background: Option<String>,

        /// Theoretical framework (ignored in classic mode)
        #[arg(long)]
        framework: Option<String>,

        #[arg(long, value_enum, default_value = "anthropic")]
        provider: ProviderArg,

        /// Model name (defaults to the provider's default)
        #[arg(long)]
        model: Option<String>,

        #[arg(long, value_enum, default_value = "hashing")]
        embedder: EmbedderArg,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Preview segmentation without calling any service
    Segment {
        /// Transcript files (.txt)
        #[arg(short, long = "input", required = true)]
        inputs: Vec<PathBuf>,

        /// Approximate segment length in tokens
        #[arg(long, default_value = "500")]
        segment_length: usize,

        /// Also write segments_{name}.json files here
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Classic,
    Interpretive,
    Constructionist,
}

impl From<ModeArg> for AnalysisMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Classic => AnalysisMode::Classic,
            ModeArg::Interpretive => AnalysisMode::Interpretive,
            ModeArg::Constructionist => AnalysisMode::Constructionist,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum QuotePolicyArg {
    CategoryBatch,
    IncidentSpans,
}

impl From<QuotePolicyArg> for QuotePolicy {
    fn from(arg: QuotePolicyArg) -> Self {
        match arg {
            QuotePolicyArg::CategoryBatch => QuotePolicy::CategoryBatch,
            QuotePolicyArg::IncidentSpans => QuotePolicy::IncidentSpans,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderArg {
    Anthropic,
    Openai,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Anthropic => Provider::Anthropic,
            ProviderArg::Openai => Provider::OpenAi,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderArg {
    /// Local feature hashing, no network
    Hashing,
    /// OpenAI embeddings (needs OPENAI_API_KEY)
    Openai,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            inputs,
            output_dir,
            config,
            coders,
            mode,
            max_categories,
            segment_length,
            cac,
            quote_policy,
            background,
            framework,
            provider,
            model,
            embedder,
            verbose,
        } => {
            setup_logging(verbose);

            let mut run_config = match config {
                Some(path) => load_run_config(&path).context("Failed to load run configuration")?,
                None => AnalysisRunConfig::default(),
            };
            if let Some(coders) = coders {
                run_config.coder_count = coders;
            }
            if let Some(mode) = mode {
                run_config.analysis_mode = mode.into();
            }
            if let Some(max) = max_categories {
                run_config.max_categories = max;
            }
            if let Some(length) = segment_length {
                run_config.segment_length = length;
            }
            if cac {
                run_config.cac_enabled = true;
            }
            if let Some(policy) = quote_policy {
                run_config.quote_policy = policy.into();
            }
            if let Some(background) = background {
                run_config.study_background = background;
            }
            if let Some(framework) = framework {
                run_config.theoretical_framework = framework;
            }

            process_transcripts(inputs, output_dir, run_config, provider.into(), model, embedder).await
        }
        Commands::Segment {
            inputs,
            segment_length,
            output_dir,
            verbose,
        } => {
            setup_logging(verbose);
            preview_segments(&inputs, segment_length, output_dir.as_deref())
        }
    }
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn process_transcripts(
    inputs: Vec<PathBuf>,
    output_dir: PathBuf,
    run_config: AnalysisRunConfig,
    provider: Provider,
    model: Option<String>,
    embedder: EmbedderArg,
) -> Result<()> {
    info!("Loading {} transcripts", inputs.len());
    let transcripts = load_transcripts(&inputs).context("Failed to load transcripts")?;

    // Credentials are checked before any stage; a rejection still leaves a result record
    let resolved = ServiceConfig::from_env(provider, model).and_then(|service_config| {
        let embedder = resolve_embedder(embedder, std::env::var(EMBEDDING_KEY_VARIABLE).ok())?;
        Ok((service_config, embedder))
    });
    let (service_config, embedder) = match resolved {
        Ok(resolved) => resolved,
        Err(e) => {
            record_rejection(&output_dir, &e)?;
            return Err(e.into());
        }
    };
    info!("Using {} model {}", service_config.provider, service_config.model);

    let run = AnalysisRun::new(run_config, build_backend(service_config), embedder);
    let output = run.execute(transcripts).await;

    let written = write_run_output(&output_dir, &output)?;
    info!("Wrote {} files to {:?}", written.len(), output_dir);
    if !output.result.summary.is_empty() {
        println!("{}", output.result.summary);
    }

    if let Some(error) = &output.result.error {
        warn!("Run {} finished with an error", output.result.run_id);
        bail!("{}", error);
    }
    Ok(())
}

fn resolve_embedder(arg: EmbedderArg, api_key: Option<String>) -> Result<Arc<dyn Embedder>, RunError> {
    Ok(match arg {
        EmbedderArg::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderArg::Openai => Arc::new(OpenAiEmbedder::new(OpenAiEmbedderConfig::from_key(api_key)?)),
    })
}

fn record_rejection(output_dir: &Path, error: &RunError) -> Result<()> {
    let output = rejected_run(uuid::Uuid::new_v4().to_string(), error, ProgressLog::new());
    write_run_output(output_dir, &output)?;
    Ok(())
}

fn preview_segments(inputs: &[PathBuf], segment_length: usize, output_dir: Option<&Path>) -> Result<()> {
    if segment_length == 0 {
        bail!("segment length must be greater than zero");
    }

    let transcripts = load_transcripts(inputs).context("Failed to load transcripts")?;
    let segmented = segment_transcripts(&transcripts, &SegmenterConfig::with_length(segment_length));

    for transcript in &segmented {
        print!("{}", format_segments(transcript));
    }

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
        let written = write_segments(dir, &segmented)?;
        info!("Wrote {} segment files to {:?}", written.len(), dir);
    }
    Ok(())
}
