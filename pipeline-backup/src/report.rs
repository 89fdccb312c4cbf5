//! Per-item outcomes collected over one run.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Namespace,
    Application,
    Draft,
    Connection,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemKind::Namespace => "namespace",
            ItemKind::Application => "application",
            ItemKind::Draft => "draft",
            ItemKind::Connection => "connection",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub kind: ItemKind,
    pub namespace: String,
    pub name: String,
    /// Failure reason, `None` on success
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ok(&mut self, kind: ItemKind, namespace: &str, name: &str) {
        self.outcomes.push(ItemOutcome {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            error: None,
        });
    }

    pub fn record_failure(
        &mut self,
        kind: ItemKind,
        namespace: &str,
        name: &str,
        error: impl fmt::Display,
    ) {
        self.outcomes.push(ItemOutcome {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            error: Some(error.to_string()),
        });
    }

    pub fn succeeded(&self, kind: ItemKind) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.kind == kind && o.is_ok())
            .count()
    }

    pub fn failed(&self, kind: ItemKind) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.kind == kind && !o.is_ok())
            .count()
    }

    pub fn total_failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// Names of successful items of one kind in one namespace, in run order.
    pub fn names(&self, kind: ItemKind, namespace: &str) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.kind == kind && o.namespace == namespace && o.is_ok())
            .map(|o| o.name.as_str())
            .collect()
    }

    pub fn log_summary(&self, operation: &str) {
        for kind in [
            ItemKind::Namespace,
            ItemKind::Application,
            ItemKind::Draft,
            ItemKind::Connection,
        ] {
            let ok = self.succeeded(kind);
            let failed = self.failed(kind);
            if ok + failed > 0 {
                info!("{} {}s: {} of {} succeeded", operation, kind, ok, ok + failed);
            }
        }
        for failure in self.failures() {
            warn!(
                "{} failed for {} '{}' in namespace '{}': {}",
                operation,
                failure.kind,
                failure.name,
                failure.namespace,
                failure.error.as_deref().unwrap_or_default()
            );
        }
    }
}
