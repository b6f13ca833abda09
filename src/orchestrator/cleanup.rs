//! Compensating cleanup: best-effort teardown of what a failed run created.

use super::context::ProvisioningContext;
use crate::lifecycle::{DeleteOutcome, ResourceLifecycle};
use serde::Serialize;
use skyforge_common::ResourceHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupEntry {
    pub handle: ResourceHandle,
    pub outcome: DeleteOutcome,
}

/// Every delete attempted by one pass, in the order they were issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub entries: Vec<CleanupEntry>,
}

impl CleanupReport {
    pub fn attempted(&self) -> usize {
        self.entries.len()
    }

    pub fn failures(&self) -> Vec<&CleanupEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome.is_failure())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }

    /// Fields attached to the final `failed` event.
    pub fn to_json(&self) -> serde_json::Value {
        let failed: Vec<String> = self
            .failures()
            .iter()
            .map(|e| format!("{} {}", e.handle.kind, e.handle.name))
            .collect();
        serde_json::json!({
            "attempted": self.attempted(),
            "failed": failed,
        })
    }
}

#[derive(Clone)]
pub struct CompensatingCleanup {
    lifecycle: ResourceLifecycle,
}

impl CompensatingCleanup {
    pub fn new(lifecycle: ResourceLifecycle) -> Self {
        Self { lifecycle }
    }

    /// Delete `handles` newest first. Every handle is attempted; individual
    /// failures are logged and collected, never returned.
    pub async fn run(&self, handles: &[ResourceHandle]) -> CleanupReport {
        let mut report = CleanupReport::default();
        for handle in handles.iter().rev() {
            let outcome = self.lifecycle.delete(handle).await;
            report.entries.push(CleanupEntry {
                handle: handle.clone(),
                outcome,
            });
        }

        if report.is_clean() {
            info!(attempted = report.attempted(), "Compensating cleanup finished");
        } else {
            warn!(
                attempted = report.attempted(),
                failed = report.failures().len(),
                "Compensating cleanup left resources behind"
            );
        }
        report
    }

    /// Clean up everything `ctx` created. Adopted resources are left alone.
    pub async fn cleanup(&self, ctx: &ProvisioningContext) -> CleanupReport {
        info!(
            run_id = %ctx.run_id(),
            handles = ctx.created_handles().len(),
            "Starting compensating cleanup"
        );
        self.run(ctx.created_handles()).await
    }
}
