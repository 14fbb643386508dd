//! Registry of pipeline jobs
//!
//! Owns one tokio task per running job together with its cancellation
//! token and progress tree. Entries of finished tasks are pruned lazily, on
//! the next status query or housekeeping tick. The housekeeping tick also
//! drops the progress trees of finished jobs; the last outcome of each job
//! stays available until the job is removed.

use crate::error::RegistryError;
use crate::models::{JobConfig, ProgressSnapshot, ProgressTree, CONFIG_FILE};
use crate::services::checkpoint_scanner::{
    self, JobScan, ANNOTATED_MATRIX_FILE, ANNOTATIONS_FILE, FIGURES_DIR, FIGURE_CONFIG_FILE,
    PEPTIDE_MATRIX_FILE, PROTEIN_MATRIX_FILE,
};
use crate::services::pipeline_orchestrator::{PipelineJob, PipelineOrchestrator, PipelineOutcome};
use chrono::Local;
use gladiator_common::events::{EventBus, Notification, NotificationQueue};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Running state of one job as reported by [`JobRegistry::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub running: bool,
    pub folder: String,
}

/// One job folder under the result root
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub fullname: String,
    pub folder: String,
    /// Peptide and protein matrices exist and the configuration is present
    pub complete: bool,
    /// Annotated matrix and annotations exist
    pub annotated: bool,
    pub figures: Option<serde_json::Value>,
    pub config: Option<JobConfig>,
    pub running: bool,
}

struct JobEntry {
    token: CancellationToken,
    folder: PathBuf,
    rerun: bool,
    /// Cancelled when the job task ends
    done: CancellationToken,
    outcome: Arc<Mutex<Option<PipelineOutcome>>>,
}

impl JobEntry {
    fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    fn take_outcome(&self) -> Option<PipelineOutcome> {
        lock(&self.outcome).take()
    }
}

struct RegistryInner {
    result_root: PathBuf,
    orchestrator: Arc<PipelineOrchestrator>,
    jobs: Mutex<HashMap<String, JobEntry>>,
    progress: Mutex<BTreeMap<String, ProgressTree>>,
    outcomes: Mutex<HashMap<String, PipelineOutcome>>,
}

/// Process-wide job registry, cheap to clone
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl JobRegistry {
    pub fn new(result_root: impl Into<PathBuf>, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                result_root: result_root.into(),
                orchestrator,
                jobs: Mutex::new(HashMap::new()),
                progress: Mutex::new(BTreeMap::new()),
                outcomes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn result_root(&self) -> &Path {
        &self.inner.result_root
    }

    pub fn notifications(&self) -> &NotificationQueue {
        self.inner.orchestrator.notifications()
    }

    pub fn event_bus(&self) -> &EventBus {
        self.inner.orchestrator.event_bus()
    }

    /// Create a job folder, persist `config` into it and start the pipeline
    ///
    /// An existing folder gets a `-YYYYmmdd-HHMMSS` suffix; without a name
    /// the job is called `analysis-<timestamp>`. Returns the final name.
    pub fn start(&self, name: Option<&str>, mut config: JobConfig) -> Result<String, RegistryError> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let requested = name.map(str::trim).filter(|n| !n.is_empty());
        if let Some(name) = requested {
            validate_name(name)?;
        }
        std::fs::create_dir_all(&self.inner.result_root)?;

        let name = match requested {
            Some(name) if self.inner.result_root.join(name).exists() => {
                format!("{}-{}", name, timestamp)
            }
            Some(name) => name.to_string(),
            None => format!("analysis-{}", timestamp),
        };
        let job_dir = self.inner.result_root.join(&name);

        // Claims the name: fails on an existing folder
        std::fs::create_dir(&job_dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => RegistryError::Conflict(format!(
                "Analysis folder already exists: {}",
                job_dir.display()
            )),
            _ => RegistryError::Io(e),
        })?;
        config.analysis_name = name.clone();
        config.save(&job_dir)?;

        let mut jobs = lock(&self.inner.jobs);
        if jobs.get(&name).is_some_and(|e| !e.is_finished()) {
            return Err(RegistryError::Conflict(format!("Analysis {} is already running", name)));
        }
        info!(job = %name, dir = %job_dir.display(), "Starting new analysis");
        let entry = self.spawn(&name, job_dir, config, false);
        jobs.insert(name.clone(), entry);
        Ok(name)
    }

    /// Run an existing job again from its persisted configuration
    pub fn rerun(&self, name: &str) -> Result<(), RegistryError> {
        validate_name(name)?;
        let mut jobs = lock(&self.inner.jobs);
        if jobs.get(name).is_some_and(|e| !e.is_finished()) {
            return Err(RegistryError::Conflict(format!("Analysis {} is already running", name)));
        }

        let job_dir = self.inner.result_root.join(name);
        if !job_dir.is_dir() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        let config = JobConfig::load(&job_dir)?;

        info!(job = %name, "Rerunning analysis");
        if let Some(previous) = jobs.remove(name) {
            self.record_outcome(name, &previous);
        }
        let entry = self.spawn(name, job_dir, config, true);
        jobs.insert(name.to_string(), entry);
        Ok(())
    }

    fn spawn(&self, name: &str, job_dir: PathBuf, config: JobConfig, rerun: bool) -> JobEntry {
        let job = PipelineJob::new(name, job_dir.clone(), config, rerun);
        lock(&self.inner.progress).insert(name.to_string(), job.progress.clone());

        let done = CancellationToken::new();
        let outcome = Arc::new(Mutex::new(None));
        let entry = JobEntry {
            token: job.token.clone(),
            folder: job_dir,
            rerun,
            done: done.clone(),
            outcome: outcome.clone(),
        };

        let orchestrator = self.inner.orchestrator.clone();
        tokio::spawn(async move {
            let _finished = done.drop_guard();
            let result = orchestrator.run(&job).await;
            *lock(&outcome) = Some(result);
        });
        entry
    }

    /// Request cancellation of a running job
    pub fn cancel(&self, name: &str) -> Result<(), RegistryError> {
        let jobs = lock(&self.inner.jobs);
        match jobs.get(name) {
            Some(entry) if !entry.is_finished() => {
                info!(job = %name, "Cancelling analysis");
                entry.token.cancel();
                Ok(())
            }
            _ => Err(RegistryError::NotFound(format!("No running analysis {}", name))),
        }
    }

    /// Running jobs; prunes finished entries first
    pub fn status(&self) -> BTreeMap<String, JobStatus> {
        self.prune_finished();
        lock(&self.inner.jobs)
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    JobStatus {
                        running: !entry.is_finished(),
                        folder: entry.folder.to_string_lossy().into_owned(),
                    },
                )
            })
            .collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.inner.jobs)
            .get(name)
            .is_some_and(|e| !e.is_finished())
    }

    /// Progress of every job started by this process
    pub fn progress(&self) -> BTreeMap<String, ProgressSnapshot> {
        lock(&self.inner.progress)
            .iter()
            .map(|(name, tree)| (name.clone(), tree.snapshot()))
            .collect()
    }

    /// Destructive read of the pending notifications
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notifications().drain()
    }

    /// Drop entries whose task has ended; returns how many were removed
    pub fn prune_finished(&self) -> usize {
        let mut jobs = lock(&self.inner.jobs);
        let finished: Vec<String> = jobs
            .iter()
            .filter(|(_, e)| e.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &finished {
            if let Some(entry) = jobs.remove(name) {
                debug!(job = %name, rerun = entry.rerun, "Pruning finished analysis");
                self.record_outcome(name, &entry);
            }
        }
        finished.len()
    }

    /// Drop the progress trees of jobs that are no longer running
    ///
    /// Outcomes stay available through [`JobRegistry::wait`].
    pub fn prune_progress(&self) -> usize {
        let jobs = lock(&self.inner.jobs);
        let mut progress = lock(&self.inner.progress);
        let before = progress.len();
        progress.retain(|name, _| jobs.get(name).is_some_and(|e| !e.is_finished()));
        before - progress.len()
    }

    fn record_outcome(&self, name: &str, entry: &JobEntry) {
        if let Some(outcome) = entry.take_outcome() {
            lock(&self.inner.outcomes).insert(name.to_string(), outcome);
        }
    }

    /// Prune finished entries every `interval` until `shutdown` is set
    pub fn spawn_housekeeping(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = registry.prune_finished();
                        let dropped = registry.prune_progress();
                        if pruned > 0 || dropped > 0 {
                            debug!(pruned, dropped, "Housekeeping pruned finished analyses");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    /// Wait for the current execution of `name` and return its outcome
    ///
    /// Returns the last recorded outcome when the job is not running, or
    /// `None` when it never ran in this process.
    pub async fn wait(&self, name: &str) -> Option<PipelineOutcome> {
        let running = {
            let jobs = lock(&self.inner.jobs);
            jobs.get(name).map(|e| (e.done.clone(), e.outcome.clone()))
        };
        if let Some((done, outcome)) = running {
            done.cancelled().await;
            if let Some(result) = lock(&outcome).clone() {
                return Some(result);
            }
        }
        lock(&self.inner.outcomes).get(name).cloned()
    }

    /// Persisted configuration of a job
    pub fn load_config(&self, name: &str) -> Result<JobConfig, RegistryError> {
        validate_name(name)?;
        let job_dir = self.inner.result_root.join(name);
        if !job_dir.is_dir() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(JobConfig::load(&job_dir)?)
    }

    /// Describe every job folder under the result root, sorted by name
    pub fn list_jobs(&self) -> Result<Vec<ProjectSummary>, RegistryError> {
        let root = &self.inner.result_root;
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut folders: Vec<PathBuf> = std::fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        Ok(folders
            .into_iter()
            .map(|path| self.summarize(&path))
            .collect())
    }

    fn summarize(&self, path: &Path) -> ProjectSummary {
        let folder = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let config = if path.join(CONFIG_FILE).is_file() {
            JobConfig::load(path)
                .map_err(|e| warn!(folder = %folder, "Unreadable configuration: {}", e))
                .ok()
        } else {
            None
        };

        let figures = std::fs::read_to_string(path.join(FIGURES_DIR).join(FIGURE_CONFIG_FILE))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok());

        ProjectSummary {
            fullname: path.to_string_lossy().into_owned(),
            complete: config.is_some()
                && path.join(PEPTIDE_MATRIX_FILE).is_file()
                && path.join(PROTEIN_MATRIX_FILE).is_file(),
            annotated: path.join(ANNOTATED_MATRIX_FILE).is_file()
                && path.join(ANNOTATIONS_FILE).is_file(),
            running: self.is_running(&folder),
            figures,
            config,
            folder,
        }
    }

    /// Delete a job folder; refused while the job runs
    pub fn remove_job(&self, name: &str) -> Result<(), RegistryError> {
        validate_name(name)?;
        let jobs = lock(&self.inner.jobs);
        if jobs.get(name).is_some_and(|e| !e.is_finished()) {
            return Err(RegistryError::Conflict(format!("Analysis {} is running", name)));
        }
        let job_dir = self.inner.result_root.join(name);
        if !job_dir.is_dir() {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        std::fs::remove_dir_all(&job_dir)?;
        lock(&self.inner.progress).remove(name);
        lock(&self.inner.outcomes).remove(name);
        info!(job = %name, "Removed analysis folder");
        Ok(())
    }

    /// Checkpoint scan of a job folder
    pub fn scan(&self, name: &str) -> Result<JobScan, RegistryError> {
        validate_name(name)?;
        Ok(checkpoint_scanner::scan_job(&self.inner.result_root, name))
    }
}

/// Job names are a single, non-empty path component
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
