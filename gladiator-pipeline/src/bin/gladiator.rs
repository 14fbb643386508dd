//! glaDIAtor one-shot runner
//!
//! **Usage:**
//! ```bash
//! gladiator run --project-name PD92 --sample-data *.mzML --databases uniprot.fasta
//! gladiator annotate --project-name PD92 --annotation-files go.tsv --id-column Entry
//! ```
//!
//! `run` creates the job folder and its `config.txt` on first use and
//! resumes from the persisted configuration afterwards, so an interrupted
//! analysis continues from its last checkpoint. Ctrl-C cancels the job.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gladiator_common::config::{ResultRootInitializer, ResultRootResolver, TomlConfig};
use gladiator_common::events::{EventBus, NotificationQueue};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gladiator_pipeline::models::{InputFiles, JobConfig, JobOption, ProgressTree, CONFIG_FILE};
use gladiator_pipeline::services::annotation::{self, AnnotationSettings};
use gladiator_pipeline::services::{PipelineJob, PipelineOrchestrator, ProcessExecutor};

#[derive(Parser, Debug)]
#[command(name = "gladiator")]
#[command(about = "Run a glaDIAtor DIA analysis in the foreground")]
#[command(version)]
struct Cli {
    /// Folder holding one directory per analysis
    #[arg(long, global = true)]
    result_root: Option<PathBuf>,

    /// Service configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run (or resume) the pipeline of a project
    Run(RunArgs),
    /// Annotate the peptide matrix of a finished project
    Annotate(AnnotateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Project name; a result folder with this name is created
    #[arg(long)]
    project_name: String,

    /// DIA sample files in raw, mzML or mzXML format
    #[arg(long, num_args = 1.., required = true)]
    sample_data: Vec<PathBuf>,

    /// DDA files for the spectral library; pseudo-spectra are used without them
    #[arg(long, num_args = 1..)]
    library_data: Vec<PathBuf>,

    /// FASTA files of the peptide search space
    #[arg(long, num_args = 1.., required = true)]
    databases: Vec<PathBuf>,

    /// FDR used in the spectral library build
    #[arg(long = "library-fdr", default_value = "0.01")]
    library_fdr: f64,

    /// Target and max FDR of the TRIC alignment
    #[arg(
        long = "feature-alignment-fdr",
        num_args = 2,
        value_names = ["TARGET", "MAX"],
        default_values_t = [0.01, 0.05]
    )]
    feature_alignment_fdr: Vec<f64>,

    /// Thread count handed to external tools [default: all cores]
    #[arg(long)]
    threads: Option<usize>,

    /// Sequence search engines
    #[arg(long, num_args = 1.., value_enum, default_values_t = [Engine::Comet, Engine::Xtandem])]
    search_engines: Vec<Engine>,

    /// Design file for the differential expression summary
    #[arg(long)]
    design_file: Option<PathBuf>,

    /// Keep X!Tandem input files
    #[arg(long)]
    retain_tmp_files: bool,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// Project whose DIA-peptide-matrix.tsv is annotated
    #[arg(long)]
    project_name: String,

    /// Annotation tables (TSV), relative to the result root unless found
    #[arg(long, num_args = 1.., required = true)]
    annotation_files: Vec<PathBuf>,

    /// Identifier column matching the FASTA protein identifiers
    #[arg(long)]
    id_column: Option<String>,

    /// Distinct labels at which a peptide becomes ambiguous
    #[arg(long, default_value = "2")]
    threshold: usize,

    /// Collapse peptides differing only by UniMod modifications
    #[arg(long)]
    merge_unimods: bool,

    /// Drop peptides whose protein names contain any of these words
    #[arg(long, num_args = 1..)]
    contaminants: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Engine {
    Comet,
    Xtandem,
}

impl Engine {
    fn option(self) -> JobOption {
        match self {
            Engine::Comet => JobOption::UseComet,
            Engine::Xtandem => JobOption::UseXTandem,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = TomlConfig::load_or_default(cli.config.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.logging.level)),
        )
        .init();

    let result = match cli.command {
        Command::Run(args) => run(args, cli.result_root, settings).await,
        Command::Annotate(args) => annotate(args, cli.result_root, settings).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn prepare_result_root(cli_arg: Option<PathBuf>, settings: &TomlConfig) -> Result<PathBuf> {
    let root = ResultRootResolver::new()
        .with_cli_arg(cli_arg)
        .with_toml(settings)
        .resolve();
    ResultRootInitializer::new(root.clone())
        .ensure_directory_exists()
        .context("Failed to prepare result root")?;
    Ok(root)
}

/// Absolute form of a user-supplied input path
///
/// Existing files are canonicalized against the current directory; other
/// paths are kept as given and resolved later against the job folder.
fn input_path(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn input_paths(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| input_path(p)).collect()
}

fn new_config(args: &RunArgs) -> JobConfig {
    let files = InputFiles {
        samples: input_paths(&args.sample_data),
        library: input_paths(&args.library_data),
        database: input_paths(&args.databases),
    };
    let mut config = JobConfig::new(args.project_name.clone(), files);
    config.pvalue = args.library_fdr;
    if let [target, max] = args.feature_alignment_fdr[..] {
        config.trig_target_pvalue = target;
        config.trig_max_pvalue = max;
    }
    for engine in &args.search_engines {
        config.enable(engine.option());
    }
    if args.library_data.is_empty() {
        config.enable(JobOption::UsePseudospectra);
    } else {
        config.enable(JobOption::DdaLibrary);
    }
    if let Some(threads) = args.threads {
        config.threads = Some(threads);
        config.enable(JobOption::ForceThreads);
    }
    config.design_file = args.design_file.as_deref().map(input_path);
    config.retain_tmp_files = args.retain_tmp_files;
    config
}

async fn run(args: RunArgs, result_root: Option<PathBuf>, settings: TomlConfig) -> Result<bool> {
    gladiator_pipeline::services::job_registry::validate_name(&args.project_name)?;
    let result_root = prepare_result_root(result_root, &settings)?;
    let job_dir = result_root.join(&args.project_name);
    std::fs::create_dir_all(&job_dir)
        .with_context(|| format!("Failed to create {}", job_dir.display()))?;

    let resume = job_dir.join(CONFIG_FILE).is_file();
    let config = if resume {
        info!(job = %args.project_name, "Resuming from persisted configuration");
        JobConfig::load(&job_dir).context("Failed to read job configuration")?
    } else {
        let config = new_config(&args);
        config.save(&job_dir).context("Failed to write job configuration")?;
        config
    };

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(ProcessExecutor::new(settings.pipeline.poll_interval())),
        settings.tools.clone(),
        result_root,
        NotificationQueue::new(),
        EventBus::new(settings.pipeline.event_capacity),
    );
    let job = PipelineJob::new(args.project_name.clone(), job_dir, config, resume);

    let token = job.token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling analysis");
            token.cancel();
        }
    });

    let outcome = orchestrator.run(&job).await;
    for report in &outcome.stages {
        info!(stage = report.stage.as_str(), outcome = report.outcome.as_str(), "Stage");
    }
    for notification in orchestrator.notifications().drain() {
        info!("{}: {}", notification.title, notification.text);
    }
    match &outcome.error {
        Some(e) => error!(job = %job.name, status = outcome.status.as_str(), "Analysis did not complete: {}", e),
        None if !outcome.is_success() => {
            warn!(job = %job.name, status = outcome.status.as_str(), "Analysis did not complete")
        }
        None => info!(job = %job.name, "Analysis completed"),
    }
    Ok(outcome.is_success())
}

async fn annotate(args: AnnotateArgs, result_root: Option<PathBuf>, settings: TomlConfig) -> Result<bool> {
    gladiator_pipeline::services::job_registry::validate_name(&args.project_name)?;
    let result_root = prepare_result_root(result_root, &settings)?;
    let job_dir = result_root.join(&args.project_name);
    if !job_dir.is_dir() {
        bail!("No such project: {}", job_dir.display());
    }

    let files: Vec<PathBuf> = args
        .annotation_files
        .iter()
        .map(|f| if f.is_file() { f.clone() } else { result_root.join(f) })
        .collect();
    let settings = AnnotationSettings {
        id_column: args.id_column,
        ambiguous_threshold: Some(args.threshold),
        merge_unimods: args.merge_unimods,
        contaminants: args.contaminants,
    };

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let sink = ProgressTree::new().create_phase("annotation");
    let summary = tokio::task::spawn_blocking(move || {
        annotation::annotate_matrix(&job_dir, &files, &settings, &token, &sink)
    })
    .await
    .context("Annotation task panicked")?
    .context("Annotation failed")?;

    info!(
        peptides = summary.peptides,
        written = summary.written,
        contaminants = summary.contaminants_dropped,
        "Annotation completed"
    );
    Ok(true)
}
