//! DIA analysis pipeline orchestrator
//!
//! Runs the stages of one job in their fixed order:
//!
//! CONVERT SAMPLES → CONVERT LIBRARY → PSEUDOSPECTRA → DATABASE →
//! SEARCH (Comet/X!Tandem × library/pseudo) → LIBRARY → MATRICES →
//! ANNOTATION → FIGURES
//!
//! Each stage is handled by a `phase_*` method. Before a stage runs, the
//! checkpoint scan taken at job start decides whether its final artifacts
//! already exist; satisfied stages are marked ready without any side effect.
//! Unsatisfied stages first remove their stale partial outputs.
//!
//! The first cancelled or failed stage stops the job. Completion
//! notifications are only sent after every planned stage succeeded.

use crate::error::PipelineError;
use crate::models::job_config::extension;
use crate::models::{JobConfig, ProgressSink, ProgressTree};
use crate::services::checkpoint_scanner::{self, PhaseScan, SearchEngine};
use crate::services::stage_runner::{CommandExecutor, Invocation, JobLog, StageRunner};
use crate::services::swath_windows::{self, SwathWindows};
use chrono::Utc;
use gladiator_common::config::ToolPaths;
use gladiator_common::events::{EventBus, Notification, NotificationQueue, PipelineEvent};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Phase modules (internal implementation)
mod phase_annotation;
mod phase_conversion;
mod phase_database;
mod phase_library;
mod phase_matrices;
mod phase_pseudospectra;
mod phase_search;

pub use phase_conversion::RawConverter;
pub use phase_database::merge_fasta;
pub use phase_library::read_mayu_cutoff;

/// Log file of a first run
pub const LOG_FILE: &str = "log.txt";
/// Log file of a rerun
pub const RERUN_LOG_FILE: &str = "rerun-log.txt";

const ALLOWED_EXTENSIONS: [&str; 3] = [".mzml", ".mzxml", ".raw"];

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ConvertSamples,
    ConvertLibrary,
    Pseudospectra,
    Database,
    CometLibrary,
    CometPseudo,
    #[serde(rename = "xtandem_library")]
    XTandemLibrary,
    #[serde(rename = "xtandem_pseudo")]
    XTandemPseudo,
    Library,
    Matrices,
    Annotation,
    Figures,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ConvertSamples => "convert_samples",
            Stage::ConvertLibrary => "convert_library",
            Stage::Pseudospectra => "pseudospectra",
            Stage::Database => "database",
            Stage::CometLibrary => "comet_library",
            Stage::CometPseudo => "comet_pseudo",
            Stage::XTandemLibrary => "xtandem_library",
            Stage::XTandemPseudo => "xtandem_pseudo",
            Stage::Library => "library",
            Stage::Matrices => "matrices",
            Stage::Annotation => "annotation",
            Stage::Figures => "figures",
        }
    }

    /// Progress entry name shown to users
    pub fn phase_name(&self) -> &'static str {
        match self {
            Stage::ConvertSamples => "Converting RAW DIA files",
            Stage::ConvertLibrary => "Converting RAW DDA files (+picking peaks)",
            Stage::Pseudospectra => "Building pseudospectra",
            Stage::Database => "Building database",
            Stage::CometLibrary => "Speclib - Matching sequences [Comet]",
            Stage::CometPseudo => "Pseudospeclib - Matching sequences [Comet]",
            Stage::XTandemLibrary => "Speclib - Matching sequences [X!Tandem]",
            Stage::XTandemPseudo => "Pseudospeclib - Matching sequences [X!Tandem]",
            Stage::Library => "Building Library",
            Stage::Matrices => "Searching peptides from DIA spectrum",
            Stage::Annotation => "Annotating peptides",
            Stage::Figures => "Drawing figures",
        }
    }

    /// Search engine and input kind (`true` for pseudo-spectra) of a search stage
    pub fn search(&self) -> Option<(SearchEngine, bool)> {
        match self {
            Stage::CometLibrary => Some((SearchEngine::Comet, false)),
            Stage::CometPseudo => Some((SearchEngine::Comet, true)),
            Stage::XTandemLibrary => Some((SearchEngine::XTandem, false)),
            Stage::XTandemPseudo => Some((SearchEngine::XTandem, true)),
            _ => None,
        }
    }

    /// Final artifacts of this stage exist
    pub fn is_satisfied(&self, scan: &PhaseScan) -> bool {
        match self {
            Stage::ConvertSamples => scan.conv_dia,
            Stage::ConvertLibrary => scan.conv_dda,
            Stage::Pseudospectra => scan.pseudospectra,
            Stage::Database => scan.database,
            Stage::Library => scan.speclib,
            Stage::Matrices => scan.matrices,
            Stage::Annotation => scan.annotations,
            Stage::Figures => scan.figures,
            search => search
                .search()
                .and_then(|(engine, pseudo)| scan.search(engine, pseudo))
                .is_some_and(|s| s.merged),
        }
    }
}

/// Stages the configuration asks for, in execution order
pub fn plan(config: &JobConfig) -> Vec<Stage> {
    let mut stages = Vec::new();

    if config.files.samples.iter().any(|f| is_raw(f)) {
        stages.push(Stage::ConvertSamples);
    }
    if config.uses_dda_library() && config.files.library.iter().any(|f| is_raw(f)) {
        stages.push(Stage::ConvertLibrary);
    }
    if config.uses_pseudospectra() {
        stages.push(Stage::Pseudospectra);
    }
    stages.push(Stage::Database);

    for (engine, library, pseudo) in [
        (SearchEngine::Comet, Stage::CometLibrary, Stage::CometPseudo),
        (SearchEngine::XTandem, Stage::XTandemLibrary, Stage::XTandemPseudo),
    ] {
        if !config.has(engine.option()) {
            continue;
        }
        if config.uses_dda_library() {
            stages.push(library);
        }
        if config.uses_pseudospectra() {
            stages.push(pseudo);
        }
    }

    stages.push(Stage::Library);
    stages.push(Stage::Matrices);

    if config.annotation_configured() {
        stages.push(Stage::Annotation);
        stages.push(Stage::Figures);
    }
    stages
}

/// Reject input lists the pipeline cannot process
///
/// Runs before any external command: samples must be present, and every
/// input list must use one extension out of `.mzML`, `.mzXML` and `.raw`.
pub fn preflight(config: &JobConfig) -> Result<(), PipelineError> {
    if config.files.samples.is_empty() {
        return Err(PipelineError::UnsupportedInputFormat(
            "no sample files given".to_string(),
        ));
    }

    let mut lists = vec![("sample", config.sample_extensions())];
    if config.uses_dda_library() {
        lists.push(("library", config.library_extensions()));
    }

    for (kind, extensions) in lists {
        if extensions.len() > 1 {
            return Err(PipelineError::UnsupportedInputFormat(format!(
                "a single {} file type allowed, found {}",
                kind,
                extensions.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        if let Some(ext) = extensions.iter().next() {
            if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
                return Err(PipelineError::UnsupportedInputFormat(format!(
                    "unknown {} extension {:?}",
                    kind, ext
                )));
            }
        }
    }
    Ok(())
}

/// One execution of a job
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub name: String,
    pub job_dir: PathBuf,
    pub config: JobConfig,
    pub rerun: bool,
    pub token: CancellationToken,
    pub progress: ProgressTree,
}

impl PipelineJob {
    pub fn new(name: impl Into<String>, job_dir: impl Into<PathBuf>, config: JobConfig, rerun: bool) -> Self {
        Self {
            name: name.into(),
            job_dir: job_dir.into(),
            config,
            rerun,
            token: CancellationToken::new(),
            progress: ProgressTree::new(),
        }
    }

    pub fn log_name(&self) -> &'static str {
        if self.rerun {
            RERUN_LOG_FILE
        } else {
            LOG_FILE
        }
    }
}

/// Terminal outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    Skipped,
    Completed,
    Cancelled,
    Failed(String),
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Skipped => "skipped",
            StageOutcome::Completed => "completed",
            StageOutcome::Cancelled => "cancelled",
            StageOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Cancelled,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Completed => "completed",
            PipelineStatus::Cancelled => "cancelled",
            PipelineStatus::Failed => "failed",
        }
    }
}

/// Result of [`PipelineOrchestrator::run`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// Stages that actually executed (not skipped)
    pub fn executed(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages
            .iter()
            .filter(|r| r.outcome != StageOutcome::Skipped)
            .map(|r| r.stage)
    }
}

/// Mutable state threaded through the stages of one execution
pub(super) struct RunContext<'a> {
    pub(super) job: &'a PipelineJob,
    pub(super) runner: StageRunner,
    pub(super) scan: PhaseScan,
    /// Current sample inputs, DIA mzML once converted
    pub(super) samples: Vec<String>,
    /// Current library inputs, peak-picked DDA files once converted
    pub(super) library: Vec<String>,
    /// Pseudo-spectra files relative to the job directory
    pub(super) pseudospectra_files: Vec<String>,
    /// Merged search results of the DDA library method
    pub(super) lib_peps: Vec<String>,
    /// Merged search results of the pseudo-spectra method
    pub(super) libfree_peps: Vec<String>,
    pub(super) swaths: Option<SwathWindows>,
    pub(super) converter: Option<RawConverter>,
    pub(super) installer_tried: bool,
    pub(super) threads: usize,
}

impl<'a> RunContext<'a> {
    pub(super) fn job_dir(&self) -> &Path {
        &self.job.job_dir
    }

    pub(super) fn config(&self) -> &JobConfig {
        &self.job.config
    }

    /// Invocation with the job directory as working directory
    pub(super) fn command(&self, program: impl AsRef<Path>) -> Invocation {
        Invocation::new(program, self.job_dir())
    }

    /// Input path made absolute against the job directory
    pub(super) fn resolve(&self, path: &str) -> PathBuf {
        self.job_dir().join(path)
    }
}

/// Drives the stages of pipeline jobs
pub struct PipelineOrchestrator {
    executor: Arc<dyn CommandExecutor>,
    tools: ToolPaths,
    result_root: PathBuf,
    notifications: NotificationQueue,
    event_bus: EventBus,
}

impl PipelineOrchestrator {
    /// Create new orchestrator
    ///
    /// # Arguments
    /// * `executor` - Launches the external tools
    /// * `tools` - Installation paths of the external tools
    /// * `result_root` - Folder holding all job directories; relative
    ///   annotation files are resolved against it
    /// * `notifications` - Receives the completion notifications
    /// * `event_bus` - Receives job and stage lifecycle events
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        tools: ToolPaths,
        result_root: impl Into<PathBuf>,
        notifications: NotificationQueue,
        event_bus: EventBus,
    ) -> Self {
        Self {
            executor,
            tools,
            result_root: result_root.into(),
            notifications,
            event_bus,
        }
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub fn result_root(&self) -> &Path {
        &self.result_root
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Execute the pipeline for `job`
    ///
    /// Never returns an error: failures are reported in the outcome, in the
    /// job's progress tree and in its log.
    pub async fn run(&self, job: &PipelineJob) -> PipelineOutcome {
        tracing::info!(job = %job.name, rerun = job.rerun, dir = %job.job_dir.display(), "Starting pipeline");
        self.event_bus.emit_lossy(PipelineEvent::JobStarted {
            job: job.name.clone(),
            rerun: job.rerun,
            timestamp: Utc::now(),
        });

        let outcome = match self.prepare(job) {
            Ok(ctx) => self.run_stages(ctx).await,
            Err(e) => {
                tracing::error!(job = %job.name, "Pipeline rejected: {}", e);
                PipelineOutcome {
                    status: PipelineStatus::Failed,
                    stages: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        if outcome.is_success() {
            job.progress.mark_complete();
            self.notifications.push(Notification::new(
                "Analysis completed",
                format!("Analysis of project {} was completed successfully.", job.name),
            ));
            if job.config.annotation_configured() {
                self.notifications.push(Notification::new(
                    "Annotation completed",
                    format!("Annotation of project {} was completed successfully.", job.name),
                ));
            }
        }

        tracing::info!(job = %job.name, status = outcome.status.as_str(), "Pipeline finished");
        self.event_bus.emit_lossy(PipelineEvent::JobFinished {
            job: job.name.clone(),
            outcome: outcome.status.as_str().to_string(),
            error: outcome.error.clone(),
            timestamp: Utc::now(),
        });
        outcome
    }

    fn prepare<'a>(&self, job: &'a PipelineJob) -> Result<RunContext<'a>, PipelineError> {
        let log = JobLog::open(job.job_dir.join(job.log_name()))?;
        if let Err(e) = preflight(&job.config) {
            log.line(&format!("Error: {}", e));
            return Err(e);
        }

        let scan = checkpoint_scanner::scan(&job.job_dir, &job.config);
        tracing::debug!(job = %job.name, scan = ?scan, "Checkpoint scan");

        let runner = StageRunner::new(self.executor.clone(), log, job.token.clone(), job.name.clone());
        Ok(RunContext {
            job,
            runner,
            samples: job.config.files.samples.clone(),
            library: job.config.files.library.clone(),
            pseudospectra_files: Vec::new(),
            lib_peps: Vec::new(),
            libfree_peps: Vec::new(),
            swaths: None,
            converter: None,
            installer_tried: false,
            threads: job.config.effective_threads(),
            scan,
        })
    }

    async fn run_stages(&self, mut ctx: RunContext<'_>) -> PipelineOutcome {
        let job = ctx.job;
        let stages = plan(&job.config);
        let sinks: Vec<ProgressSink> = stages
            .iter()
            .map(|s| job.progress.create_phase(s.phase_name()))
            .collect();

        let mut reports = Vec::with_capacity(stages.len());
        for (stage, sink) in stages.into_iter().zip(sinks) {
            if stage.is_satisfied(&ctx.scan) {
                tracing::info!(job = %job.name, stage = stage.as_str(), "Stage already satisfied, skipping");
                sink.ready();
                self.after_stage(stage, &mut ctx, true);
                self.emit_stage_finished(job, stage, &StageOutcome::Skipped);
                reports.push(StageReport {
                    stage,
                    outcome: StageOutcome::Skipped,
                });
                continue;
            }

            let result = if ctx.runner.is_cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                self.event_bus.emit_lossy(PipelineEvent::StageStarted {
                    job: job.name.clone(),
                    stage: stage.as_str().to_string(),
                    name: stage.phase_name().to_string(),
                    timestamp: Utc::now(),
                });
                tracing::info!(job = %job.name, stage = stage.as_str(), "Stage starting");
                self.cleanup(stage, &ctx);
                sink.start();
                self.execute_stage(stage, &mut ctx, &sink).await
            };

            let outcome = match result {
                Ok(()) => {
                    sink.ready();
                    self.after_stage(stage, &mut ctx, false);
                    StageOutcome::Completed
                }
                Err(PipelineError::Cancelled) => {
                    if !sink.is_failed() {
                        sink.fail("Killed", -1);
                    }
                    ctx.runner.log().line(&format!("{} cancelled", stage.phase_name()));
                    tracing::info!(job = %job.name, stage = stage.as_str(), "Stage cancelled");
                    StageOutcome::Cancelled
                }
                Err(e) => {
                    if !sink.is_failed() {
                        let (cmd, code) = e.command_and_code();
                        sink.fail(cmd, code);
                    }
                    ctx.runner.log().line(&format!("Error: {}", e));
                    tracing::error!(job = %job.name, stage = stage.as_str(), error = %e, "Stage failed");
                    StageOutcome::Failed(e.to_string())
                }
            };

            self.emit_stage_finished(job, stage, &outcome);
            let halt = match &outcome {
                StageOutcome::Cancelled => Some((PipelineStatus::Cancelled, None)),
                StageOutcome::Failed(msg) => Some((PipelineStatus::Failed, Some(msg.clone()))),
                _ => None,
            };
            reports.push(StageReport { stage, outcome });

            if let Some((status, error)) = halt {
                return PipelineOutcome {
                    status,
                    stages: reports,
                    error,
                };
            }
        }

        // A cancel that arrived while the remaining stages were skipped
        if ctx.runner.check_cancelled().is_err() {
            ctx.runner.log().line("Analysis cancelled");
            tracing::info!(job = %job.name, "Pipeline cancelled after its last stage");
            return PipelineOutcome {
                status: PipelineStatus::Cancelled,
                stages: reports,
                error: None,
            };
        }

        PipelineOutcome {
            status: PipelineStatus::Completed,
            stages: reports,
            error: None,
        }
    }

    async fn execute_stage(
        &self,
        stage: Stage,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        match stage {
            Stage::ConvertSamples => self.phase_convert_samples(ctx, sink).await,
            Stage::ConvertLibrary => self.phase_convert_library(ctx, sink).await,
            Stage::Pseudospectra => self.phase_pseudospectra(ctx, sink).await,
            Stage::Database => self.phase_database(ctx, sink).await,
            Stage::Library => {
                self.ensure_swath_windows(ctx).await?;
                self.phase_library(ctx, sink).await
            }
            Stage::Matrices => {
                self.ensure_swath_windows(ctx).await?;
                self.phase_matrices(ctx, sink).await
            }
            Stage::Annotation => self.phase_annotation(ctx, sink).await,
            Stage::Figures => self.phase_figures(ctx, sink).await,
            search => match search.search() {
                Some((engine, pseudo)) => self.phase_search(engine, pseudo, ctx, sink).await,
                None => Ok(()),
            },
        }
    }

    /// Update the inputs of later stages from a finished or skipped stage
    fn after_stage(&self, stage: Stage, ctx: &mut RunContext<'_>, skipped: bool) {
        match stage {
            Stage::ConvertSamples => {
                ctx.samples = ctx
                    .config()
                    .sample_stems()
                    .iter()
                    .map(|stem| path_string(&ctx.job_dir().join("DIA").join(format!("{}.mzML", stem))))
                    .collect();
            }
            Stage::ConvertLibrary => {
                ctx.library = ctx
                    .config()
                    .library_stems()
                    .iter()
                    .map(|stem| {
                        let dda = ctx.job_dir().join("DDA");
                        let mzxml = dda.join(format!("{}.mzXML", stem));
                        let mzml = dda.join(format!("{}.mzML", stem));
                        if !mzxml.is_file() && mzml.is_file() {
                            path_string(&mzml)
                        } else {
                            path_string(&mzxml)
                        }
                    })
                    .collect();
            }
            Stage::Pseudospectra => {
                ctx.pseudospectra_files = if skipped {
                    ctx.scan.pseudospectra_files.clone()
                } else {
                    phase_pseudospectra::present_pseudospectra(ctx.job_dir(), &ctx.config().sample_stems())
                };
            }
            search => {
                if let Some((engine, pseudo)) = search.search() {
                    let merged = engine.interact_file(pseudo);
                    if pseudo {
                        ctx.libfree_peps.push(merged);
                    } else {
                        ctx.lib_peps.push(merged);
                    }
                }
            }
        }
    }

    /// Compute the swath window files once per execution
    async fn ensure_swath_windows(&self, ctx: &mut RunContext<'_>) -> Result<(), PipelineError> {
        if ctx.swaths.is_some() {
            return Ok(());
        }
        let first = ctx.samples.first().ok_or_else(|| {
            PipelineError::UnsupportedInputFormat("no sample files given".to_string())
        })?;
        let mzml = ctx.resolve(first);
        let job_dir = ctx.job_dir().to_path_buf();
        let swaths = tokio::task::spawn_blocking(move || {
            swath_windows::create_swath_window_files(&job_dir, &mzml)
        })
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::other(e)))??;
        ctx.swaths = Some(swaths);
        Ok(())
    }

    /// Remove stale partial outputs of `stage`
    fn cleanup(&self, stage: Stage, ctx: &RunContext<'_>) {
        for target in cleanup_targets(stage, ctx) {
            let path = ctx.job_dir().join(&target);
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else if path.exists() {
                std::fs::remove_file(&path)
            } else {
                continue;
            };
            match result {
                Ok(()) => tracing::debug!(job = %ctx.job.name, file = %target, "Removed stale output"),
                Err(e) => tracing::warn!(job = %ctx.job.name, file = %target, "Failed to remove stale output: {}", e),
            }
        }
    }

    fn emit_stage_finished(&self, job: &PipelineJob, stage: Stage, outcome: &StageOutcome) {
        self.event_bus.emit_lossy(PipelineEvent::StageFinished {
            job: job.name.clone(),
            stage: stage.as_str().to_string(),
            outcome: outcome.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }
}

const INTERACT_COMPANIONS: [&str; 5] = [
    "-MODELS.html",
    ".xml",
    ".xml.index",
    ".xml.RTcoeff",
    ".xml.RTstats",
];

const SPECTRAST_EXTENSIONS: [&str; 4] = [".pepidx", ".spidx", ".splib", ".sptxt"];

const MATRIX_POSTFIXES: [&str; 17] = [
    "-DIA_cutoffs.txt",
    "-DIA_dscores_top_decoy_peaks.txt",
    "-DIA_dscores_top_target_peaks.txt",
    "-DIA_full_stat.csv",
    "-DIA_mayu.csv",
    "-DIA_mayu.cutoff",
    "-DIA_mayu.fasta",
    "-DIA_qvalues.txt",
    "-DIA_report.pdf",
    "-DIA_scorer.bin",
    "-DIA_summary_stat.csv",
    "-DIA_svalues.txt",
    "-DIA.tsv",
    "-DIA_weights.txt",
    "-DIA_with_dscore-0_0-None.tr",
    "-DIA_with_dscore.csv",
    "-DIA_with_dscore_filtered.csv",
];

/// Files and folders removed before `stage` executes, relative to the job directory
pub(super) fn cleanup_targets(stage: Stage, ctx: &RunContext<'_>) -> Vec<String> {
    match stage {
        Stage::Library => {
            let mut targets: Vec<String> = ["SpecLib_cons", "SpecLib_libfree", "SpecLib_lib", "SpecLib_merged"]
                .iter()
                .flat_map(|lib| SPECTRAST_EXTENSIONS.iter().map(move |ext| format!("{}{}", lib, ext)))
                .collect();
            targets.extend(
                [
                    checkpoint_scanner::SPECTRAL_LIBRARY_FILE,
                    "SpecLib_cons_openswath.tsv",
                    "SpecLib_cons.TraML",
                    "spectrast.log",
                    "lib_mayu",
                    "libfree_mayu",
                ]
                .map(str::to_string),
            );
            targets
        }
        Stage::Matrices => {
            let mut targets: Vec<String> = ctx
                .samples
                .iter()
                .map(|s| file_name(s))
                .flat_map(|base| MATRIX_POSTFIXES.iter().map(move |p| format!("{}{}", base, p)))
                .collect();
            targets.extend(
                [
                    checkpoint_scanner::ANALYSIS_RESULT_FILE,
                    checkpoint_scanner::PEPTIDE_MATRIX_FILE,
                    checkpoint_scanner::PROTEIN_MATRIX_FILE,
                ]
                .map(str::to_string),
            );
            targets
        }
        Stage::Annotation => vec![
            checkpoint_scanner::ANNOTATED_MATRIX_FILE.to_string(),
            checkpoint_scanner::ANNOTATIONS_FILE.to_string(),
        ],
        Stage::Figures => vec![format!(
            "{}/{}",
            checkpoint_scanner::FIGURES_DIR,
            checkpoint_scanner::FIGURE_CONFIG_FILE
        )],
        search => match search.search() {
            Some((engine, pseudo)) => {
                let merged = engine.interact_file(pseudo);
                let base = merged.trim_end_matches(".xml");
                INTERACT_COMPANIONS
                    .iter()
                    .map(|suffix| format!("{}{}", base, suffix))
                    .collect()
            }
            None => Vec::new(),
        },
    }
}

fn is_raw(path: &str) -> bool {
    extension(path) == ".raw"
}

/// Final path component of an input path
pub(super) fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

pub(super) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
