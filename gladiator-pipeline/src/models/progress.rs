//! Per-job progress tree
//!
//! One [`ProgressTree`] per execution holds an ordered list of phase
//! entries. Each running stage owns a [`ProgressSink`] pointing at its
//! entry; pollers read consistent snapshots through [`ProgressTree::snapshot`].
//! The lock is held only for a single read or mutation.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle of one phase entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Ready,
    Failed,
}

/// Command and exit code of a failed phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub cmd: String,
    pub returncode: i32,
}

/// Progress record of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub name: String,
    #[serde(rename = "type")]
    pub indicator: String,
    pub status: PhaseStatus,
    pub percentage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PhaseError>,
}

impl PhaseProgress {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            indicator: "percentage-indicator".to_string(),
            status: PhaseStatus::Pending,
            percentage: 0,
            error: None,
        }
    }
}

#[derive(Debug, Default)]
struct TreeState {
    phases: Vec<PhaseProgress>,
    complete: bool,
}

/// Point-in-time copy of a progress tree
///
/// Serializes as `{"phases": {"0": {...}, "1": {...}}, "complete": bool}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    #[serde(serialize_with = "phases_by_id")]
    pub phases: Vec<PhaseProgress>,
    pub complete: bool,
}

impl ProgressSnapshot {
    pub fn phase(&self, name: &str) -> Option<&PhaseProgress> {
        self.phases.iter().find(|p| p.name == name)
    }
}

fn phases_by_id<S>(phases: &[PhaseProgress], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(phases.len()))?;
    for (id, phase) in phases.iter().enumerate() {
        map.serialize_entry(&id.to_string(), phase)?;
    }
    map.end()
}

/// Shared, lock-protected progress of one execution
#[derive(Debug, Clone, Default)]
pub struct ProgressTree {
    inner: Arc<Mutex<TreeState>>,
}

impl ProgressTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending phase and return the handle that updates it
    pub fn create_phase(&self, name: &str) -> ProgressSink {
        let mut state = self.lock();
        state.phases.push(PhaseProgress::pending(name));
        ProgressSink {
            tree: self.clone(),
            id: state.phases.len() - 1,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            phases: state.phases.clone(),
            complete: state.complete,
        }
    }

    pub fn mark_complete(&self) {
        self.lock().complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    fn update(&self, id: usize, f: impl FnOnce(&mut PhaseProgress)) {
        if let Some(phase) = self.lock().phases.get_mut(id) {
            f(phase);
        }
    }

    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write handle for one phase entry
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tree: ProgressTree,
    id: usize,
}

impl ProgressSink {
    /// Move to `in-progress` at 0%
    pub fn start(&self) {
        self.tree.update(self.id, |p| {
            p.status = PhaseStatus::InProgress;
            p.percentage = 0;
            p.error = None;
        });
    }

    /// Record `n` of `m` sub-units done
    ///
    /// Truncates toward zero; `n > m` counts as 100%.
    pub fn update_n_of_m(&self, n: usize, m: usize) {
        let total = m.max(n);
        let percentage = if total == 0 {
            100
        } else {
            ((100 * n) / total) as u32
        };
        self.tree.update(self.id, |p| p.percentage = percentage);
    }

    /// Done; percentage forced to 100
    pub fn ready(&self) {
        self.tree.update(self.id, |p| {
            p.status = PhaseStatus::Ready;
            p.percentage = 100;
        });
    }

    pub fn fail(&self, cmd: impl Into<String>, returncode: i32) {
        let cmd = cmd.into();
        self.tree.update(self.id, |p| {
            p.status = PhaseStatus::Failed;
            p.error = Some(PhaseError { cmd, returncode });
        });
    }

    pub fn current(&self) -> Option<PhaseProgress> {
        self.tree.lock().phases.get(self.id).cloned()
    }

    pub fn is_failed(&self) -> bool {
        self.current()
            .is_some_and(|p| p.status == PhaseStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_n_of_m_truncates() {
        let tree = ProgressTree::new();
        let sink = tree.create_phase("Building database");
        sink.start();

        sink.update_n_of_m(1, 3);
        assert_eq!(sink.current().unwrap().percentage, 33);

        sink.update_n_of_m(2, 3);
        assert_eq!(sink.current().unwrap().percentage, 66);

        sink.update_n_of_m(5, 3);
        assert_eq!(sink.current().unwrap().percentage, 100);

        sink.update_n_of_m(0, 0);
        assert_eq!(sink.current().unwrap().percentage, 100);
    }

    #[test]
    fn test_fail_records_command() {
        let tree = ProgressTree::new();
        let sink = tree.create_phase("Building Library");
        sink.start();
        sink.fail("/opt/tpp/bin/spectrast -cNSpecLib_lib", 3);

        let phase = sink.current().unwrap();
        assert_eq!(phase.status, PhaseStatus::Failed);
        assert_eq!(
            phase.error,
            Some(PhaseError {
                cmd: "/opt/tpp/bin/spectrast -cNSpecLib_lib".to_string(),
                returncode: 3
            })
        );
        assert!(sink.is_failed());
    }

    #[test]
    fn test_snapshot_serializes_phases_keyed_by_id() {
        let tree = ProgressTree::new();
        for i in 0..12 {
            tree.create_phase(&format!("phase {}", i));
        }
        tree.create_phase("last").ready();
        tree.mark_complete();

        let json = serde_json::to_value(tree.snapshot()).unwrap();
        assert_eq!(json["complete"], true);
        assert_eq!(json["phases"]["0"]["status"], "pending");
        assert_eq!(json["phases"]["0"]["type"], "percentage-indicator");
        assert_eq!(json["phases"]["12"]["name"], "last");
        assert_eq!(json["phases"]["12"]["status"], "ready");
        assert_eq!(json["phases"]["12"]["percentage"], 100);
        assert!(json["phases"]["12"].get("error").is_none());
    }
}
