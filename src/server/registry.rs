use crate::orchestrator::blueprint::Phase;
use crate::orchestrator::context::RunSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skyforge_common::RunStatus;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

struct RunEntry {
    snapshots: watch::Receiver<RunSnapshot>,
    /// Set when the run's task panicked; the last snapshot is then stale.
    crashed: Option<String>,
}

/// One line of `GET /api/runs`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub blueprint: String,
    pub target_name: String,
    pub status: RunStatus,
    pub phase: Phase,
    pub step: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Live view of every run started by this process.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<BTreeMap<String, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RunEntry>> {
        self.runs.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, run_id: &str, snapshots: watch::Receiver<RunSnapshot>) {
        self.lock().insert(
            run_id.to_string(),
            RunEntry {
                snapshots,
                crashed: None,
            },
        );
    }

    pub fn mark_crashed(&self, run_id: &str, message: impl Into<String>) {
        if let Some(entry) = self.lock().get_mut(run_id) {
            entry.crashed = Some(message.into());
        }
    }

    pub fn get(&self, run_id: &str) -> Option<RunSnapshot> {
        self.lock().get(run_id).map(current)
    }

    pub fn list(&self) -> Vec<RunSummary> {
        self.lock()
            .values()
            .map(current)
            .map(|s| RunSummary {
                run_id: s.run_id,
                blueprint: s.blueprint,
                target_name: s.target_name,
                status: s.status,
                phase: s.phase,
                step: s.step,
                started_at: s.started_at,
                finished_at: s.finished_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn current(entry: &RunEntry) -> RunSnapshot {
    let mut snapshot = entry.snapshots.borrow().clone();
    if let Some(message) = &entry.crashed
        && !snapshot.status.is_terminal()
    {
        snapshot.status = RunStatus::Failed;
        snapshot.phase = Phase::Failed;
        snapshot.step = "internal_error".to_string();
        snapshot.error = Some(message.clone());
        snapshot.finished_at = Some(Utc::now());
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::context::ProvisioningContext;
    use crate::orchestrator::context::fixtures::app_vm_request;

    #[test]
    fn snapshots_follow_the_run() {
        let registry = RunRegistry::new();
        let mut ctx = ProvisioningContext::new("run-1", app_vm_request(""));
        registry.insert("run-1", ctx.subscribe());

        ctx.begin();
        ctx.enter(Phase::Auth);
        let snap = registry.get("run-1").unwrap();
        assert_eq!(snap.status, RunStatus::Provisioning);
        assert_eq!(snap.phase, Phase::Auth);

        assert_eq!(registry.list()[0].target_name, "web01");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn crashed_run_reads_as_failed() {
        let registry = RunRegistry::new();
        let mut ctx = ProvisioningContext::new("run-2", app_vm_request(""));
        registry.insert("run-2", ctx.subscribe());
        ctx.begin();
        drop(ctx);

        registry.mark_crashed("run-2", "task panicked: boom");
        let snap = registry.get("run-2").unwrap();
        assert_eq!(snap.status, RunStatus::Failed);
        assert_eq!(snap.step, "internal_error");
        assert_eq!(snap.error.as_deref(), Some("task panicked: boom"));
    }
}
