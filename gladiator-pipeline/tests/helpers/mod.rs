//! Shared fixtures for gladiator-pipeline integration tests
//!
//! [`ScriptedExecutor`] stands in for the external analysis tools: every
//! invocation is recorded, and the behaviour of each program (by file name)
//! can be scripted to create output files, fail, or block until cancelled.

#![allow(dead_code)]

use async_trait::async_trait;
use gladiator_common::config::ToolPaths;
use gladiator_common::events::{EventBus, NotificationQueue};
use gladiator_pipeline::error::PipelineError;
use gladiator_pipeline::models::{InputFiles, JobConfig, JobOption};
use gladiator_pipeline::services::stage_runner::{ExecOutcome, Invocation, JobLog};
use gladiator_pipeline::services::{CommandExecutor, PipelineOrchestrator};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Scripted reaction of one external program
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Exit 0 after creating these files, relative to the invocation cwd
    Succeed(Vec<String>),
    /// Exit with this non-zero code
    Fail(i32),
    /// Run until the job token is cancelled
    Block,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    behaviours: Mutex<HashMap<String, Behaviour>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, program: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(program.to_string(), behaviour);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Program file names in launch order
    pub fn programs(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|i| i.program_name().to_string())
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        invocation: &Invocation,
        log: &JobLog,
        token: &CancellationToken,
    ) -> Result<ExecOutcome, PipelineError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        log.line(&format!("[scripted] {}", invocation.program_name()));

        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(invocation.program_name())
            .cloned()
            .unwrap_or(Behaviour::Succeed(Vec::new()));

        match behaviour {
            Behaviour::Succeed(files) => {
                for file in files {
                    touch(&invocation.cwd, &file);
                }
                Ok(ExecOutcome::Completed)
            }
            Behaviour::Fail(exit_code) => Ok(ExecOutcome::Failed { exit_code }),
            Behaviour::Block => {
                token.cancelled().await;
                Ok(ExecOutcome::Cancelled)
            }
        }
    }
}

/// Create `rel` (and its parent folders) under `dir`
pub fn touch(dir: &Path, rel: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"x").unwrap();
}

/// Tool paths whose share folder holds the DIA-Umpire parameter template
pub fn tool_paths(share_dir: &Path) -> ToolPaths {
    std::fs::create_dir_all(share_dir).unwrap();
    std::fs::write(
        share_dir.join("diaumpire-params-template.txt"),
        "Thread = THREADS\n",
    )
    .unwrap();
    ToolPaths {
        share_dir: share_dir.to_path_buf(),
        ..ToolPaths::default()
    }
}

pub fn orchestrator(
    executor: Arc<ScriptedExecutor>,
    result_root: &Path,
    share_dir: &Path,
) -> PipelineOrchestrator {
    orchestrator_with_tools(executor, result_root, tool_paths(share_dir))
}

pub fn orchestrator_with_tools(
    executor: Arc<ScriptedExecutor>,
    result_root: &Path,
    tools: ToolPaths,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        executor,
        tools,
        result_root,
        NotificationQueue::new(),
        EventBus::new(64),
    )
}

/// Library-free mzML analysis searched with Comet
///
/// Plans PSEUDOSPECTRA → DATABASE → COMET (pseudo) → LIBRARY → MATRICES.
pub fn libfree_config(name: &str) -> JobConfig {
    let mut config = JobConfig::new(
        name,
        InputFiles {
            samples: vec!["s1.mzML".into(), "s2.mzML".into()],
            library: Vec::new(),
            database: vec!["db.fasta".into()],
        },
    );
    config.enable(JobOption::UseComet);
    config.enable(JobOption::UsePseudospectra);
    config
}

/// Final artifacts of every stage planned by [`libfree_config`]
pub const LIBFREE_ARTIFACTS: [&str; 11] = [
    "libfree-pseudospectra/s1_Q1.mzXML",
    "libfree-pseudospectra/s1_Q2.mzXML",
    "libfree-pseudospectra/s1_Q3.mzXML",
    "libfree-pseudospectra/s2_Q1.mzXML",
    "libfree-pseudospectra/s2_Q2.mzXML",
    "libfree-pseudospectra/s2_Q3.mzXML",
    "DB_with_decoys.fasta",
    "interact_comet_pseudo_pep.xml",
    "SpecLib_cons_decoy.TraML",
    "DIA-analysis-result.csv",
    "DIA-peptide-matrix.tsv",
];

/// Job folder with config.txt, a FASTA input and every final artifact
pub fn completed_job(job_dir: &Path, config: &JobConfig) {
    std::fs::create_dir_all(job_dir).unwrap();
    config.save(job_dir).unwrap();
    std::fs::write(job_dir.join("db.fasta"), ">P1\nMKV\n>P2\nAAA\n").unwrap();
    for artifact in LIBFREE_ARTIFACTS {
        touch(job_dir, artifact);
    }
    touch(job_dir, "DIA-protein-matrix.tsv");
}
