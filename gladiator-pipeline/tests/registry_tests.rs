//! Integration tests for the job registry

mod helpers;

use gladiator_pipeline::error::RegistryError;
use gladiator_pipeline::models::JobConfig;
use gladiator_pipeline::services::{JobRegistry, PipelineStatus};
use helpers::{completed_job, libfree_config, orchestrator, Behaviour, ScriptedExecutor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    executor: Arc<ScriptedExecutor>,
    registry: JobRegistry,
}

/// Registry whose external tools never finish on their own
fn blocking_registry() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("run-files");
    std::fs::create_dir_all(&root).unwrap();
    let executor = ScriptedExecutor::new();
    executor.script("msconvert", Behaviour::Block);
    executor.script("DecoyDatabase", Behaviour::Block);
    let orchestrator = orchestrator(executor.clone(), &root, &tmp.path().join("share"));
    let registry = JobRegistry::new(root.clone(), Arc::new(orchestrator));
    Fixture {
        _tmp: tmp,
        root,
        executor,
        registry,
    }
}

async fn wait_for_launch(executor: &ScriptedExecutor) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while executor.invocations().is_empty() {
        assert!(Instant::now() < deadline, "no external command launched");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_start_persists_config_and_reports_running() {
    let fx = blocking_registry();

    let name = fx.registry.start(Some("PD92"), libfree_config("")).unwrap();
    assert_eq!(name, "PD92");

    let saved = JobConfig::load(&fx.root.join("PD92")).unwrap();
    assert_eq!(saved.analysis_name, "PD92");

    wait_for_launch(&fx.executor).await;
    let status = fx.registry.status();
    assert!(status["PD92"].running);
    assert_eq!(status["PD92"].folder, fx.root.join("PD92").to_string_lossy());
    assert!(fx.registry.progress().contains_key("PD92"));

    fx.registry.cancel("PD92").unwrap();
    let outcome = fx.registry.wait("PD92").await.unwrap();
    assert_eq!(outcome.status, PipelineStatus::Cancelled);

    assert!(fx.registry.status().is_empty());
    assert!(fx.registry.drain_notifications().is_empty());
}

#[tokio::test]
async fn test_start_suffixes_taken_names() {
    let fx = blocking_registry();
    std::fs::create_dir_all(fx.root.join("PD92")).unwrap();

    let name = fx.registry.start(Some("PD92"), libfree_config("")).unwrap();
    assert!(name.starts_with("PD92-"), "{}", name);
    assert_eq!(name.len(), "PD92-YYYYmmdd-HHMMSS".len());
    assert!(fx.root.join(&name).join("config.txt").is_file());

    let unnamed = fx.registry.start(None, libfree_config("")).unwrap();
    assert!(unnamed.starts_with("analysis-"), "{}", unnamed);

    for job in [&name, &unnamed] {
        fx.registry.cancel(job).unwrap();
        fx.registry.wait(job).await;
    }
}

#[tokio::test]
async fn test_start_rejects_path_names() {
    let fx = blocking_registry();
    let result = fx.registry.start(Some("../escape"), libfree_config(""));
    assert!(matches!(result, Err(RegistryError::InvalidName(_))));
}

#[tokio::test]
async fn test_rerun_rejected_while_running() {
    let fx = blocking_registry();
    fx.registry.start(Some("busy"), libfree_config("")).unwrap();
    wait_for_launch(&fx.executor).await;

    assert!(matches!(
        fx.registry.rerun("busy"),
        Err(RegistryError::Conflict(_))
    ));
    assert!(matches!(
        fx.registry.remove_job("busy"),
        Err(RegistryError::Conflict(_))
    ));

    fx.registry.cancel("busy").unwrap();
    fx.registry.wait("busy").await;
    assert!(!fx.registry.is_running("busy"));
}

#[tokio::test]
async fn test_rerun_resumes_from_persisted_config() {
    let fx = blocking_registry();
    let job_dir = fx.root.join("resumed");
    completed_job(&job_dir, &libfree_config("resumed"));

    fx.registry.rerun("resumed").unwrap();
    let outcome = fx.registry.wait("resumed").await.unwrap();

    assert!(outcome.is_success(), "{:?}", outcome);
    assert!(fx.executor.invocations().is_empty());
    assert!(job_dir.join("rerun-log.txt").is_file());
    assert!(!job_dir.join("log.txt").exists());
    assert!(fx.registry.progress()["resumed"].complete);

    let notifications = fx.registry.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].text.contains("resumed"));
    assert!(fx.registry.drain_notifications().is_empty());
}

#[tokio::test]
async fn test_rerun_and_cancel_of_unknown_jobs() {
    let fx = blocking_registry();
    assert!(matches!(fx.registry.rerun("ghost"), Err(RegistryError::NotFound(_))));
    assert!(matches!(fx.registry.cancel("ghost"), Err(RegistryError::NotFound(_))));

    std::fs::create_dir_all(fx.root.join("empty")).unwrap();
    assert!(matches!(
        fx.registry.rerun("empty"),
        Err(RegistryError::Pipeline(_))
    ));
}

#[tokio::test]
async fn test_list_and_remove_jobs() {
    let fx = blocking_registry();
    completed_job(&fx.root.join("b-done"), &libfree_config("b-done"));
    std::fs::create_dir_all(fx.root.join("a-empty")).unwrap();

    let jobs = fx.registry.list_jobs().unwrap();
    let folders: Vec<&str> = jobs.iter().map(|j| j.folder.as_str()).collect();
    assert_eq!(folders, vec!["a-empty", "b-done"]);

    assert!(!jobs[0].complete);
    assert!(jobs[0].config.is_none());
    assert!(jobs[1].complete);
    assert!(!jobs[1].annotated);
    assert!(!jobs[1].running);
    assert_eq!(jobs[1].config.as_ref().unwrap().analysis_name, "b-done");

    fx.registry.remove_job("b-done").unwrap();
    assert!(!fx.root.join("b-done").exists());
    assert!(matches!(
        fx.registry.remove_job("b-done"),
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_housekeeping_prunes_finished_jobs() {
    let fx = blocking_registry();
    fx.registry.start(Some("pruned"), libfree_config("")).unwrap();
    fx.registry.start(Some("kept"), libfree_config("")).unwrap();
    wait_for_launch(&fx.executor).await;

    let shutdown = CancellationToken::new();
    let housekeeping = fx
        .registry
        .spawn_housekeeping(Duration::from_millis(20), shutdown.clone());

    fx.registry.cancel("pruned").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while fx.registry.progress().contains_key("pruned") {
        assert!(Instant::now() < deadline, "finished progress never pruned");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!fx.registry.is_running("pruned"));
    assert_eq!(fx.registry.prune_finished(), 0);
    assert!(fx.registry.progress().contains_key("kept"));

    let outcome = fx.registry.wait("pruned").await.unwrap();
    assert_eq!(outcome.status, PipelineStatus::Cancelled);

    shutdown.cancel();
    housekeeping.await.unwrap();
    fx.registry.cancel("kept").unwrap();
    fx.registry.wait("kept").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_starts_claim_distinct_folders() {
    let fx = blocking_registry();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = fx.registry.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            registry.start(Some("race"), libfree_config(""))
        }));
    }

    let mut started = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(name) => started.push(name),
            Err(RegistryError::Conflict(_)) => {}
            Err(e) => panic!("unexpected: {:?}", e),
        }
    }

    assert!(started.iter().any(|n| n == "race"), "{:?}", started);
    let unique: std::collections::BTreeSet<_> = started.iter().collect();
    assert_eq!(unique.len(), started.len());
    for name in &started {
        let saved = JobConfig::load(&fx.root.join(name)).unwrap();
        assert_eq!(&saved.analysis_name, name);
        assert!(fx.registry.progress().contains_key(name));
    }

    for name in &started {
        fx.registry.cancel(name).unwrap();
        fx.registry.wait(name).await;
    }
}
