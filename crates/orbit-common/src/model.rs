use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Server,
    Worker,
}

/// Cluster membership status of one host, as reported by the watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub ready: bool,
    pub unschedulable: bool,
    pub memory_pressure: bool,
    pub disk_pressure: bool,
    pub pid_pressure: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub role: NodeRole,
}

/// One physical GPU row. Derived on every query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gpu {
    pub node: String,
    pub model: String,
    pub memory_mb: u64,
    pub ready: bool,
    pub available_count: u32,
    pub total_count: u32,
}

/// Pool-wide capacity: cpu millicores, memory bytes and accelerator
/// counts keyed by resource name (`cpu`, `memory`, `nvidia.com/gpu`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSummary {
    #[serde(default)]
    pub total: HashMap<String, f64>,
    #[serde(default)]
    pub available: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Pending,
    Working,
    Error,
    Completed,
}

impl JobStatus {
    /// Derive the job status from pod phase counts for one deployment.
    ///
    /// Precedence follows the documented table: all `Ready` wins, then any
    /// `Failed`, then any `Pending` (or no pods at all), then all
    /// `Succeeded`/`Completed`, everything else is `working`.
    pub fn from_pod_phases(counts: &HashMap<String, u32>) -> Self {
        let live: Vec<(&str, u32)> = counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(k, n)| (k.as_str(), *n))
            .collect();

        if live.is_empty() {
            return JobStatus::Pending;
        }
        if live.iter().all(|(phase, _)| *phase == "Ready") {
            return JobStatus::Running;
        }
        if live.iter().any(|(phase, _)| *phase == "Failed") {
            return JobStatus::Error;
        }
        if live.iter().any(|(phase, _)| *phase == "Pending") {
            return JobStatus::Pending;
        }
        if live
            .iter()
            .all(|(phase, _)| matches!(*phase, "Succeeded" | "Completed"))
        {
            return JobStatus::Completed;
        }
        JobStatus::Working
    }
}

/// Operator applied to a target-label selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelsOp {
    /// All labels must match.
    #[default]
    #[serde(rename = "AND")]
    And,
    /// Any label match suffices.
    #[serde(rename = "OR")]
    Or,
}

/// One deployed workload, status recomputed on each fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Namespace, which is also the owning user-space.
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub target_labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub target_labels_ops: LabelsOp,
    #[serde(default)]
    pub status: Option<JobStatus>,
    /// Per-phase worker summary, e.g. "Ready: 2\nPending: 1".
    #[serde(default)]
    pub workers: Option<String>,
    #[serde(default)]
    pub endpoint_urls: Vec<String>,
    #[serde(default)]
    pub host_nodes: Vec<String>,
}

/// Outcome of a deploy/delete call against the watcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployResult {
    #[serde(default)]
    pub successful: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
}

/// Hard limits and current usage of a user-space quota.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceQuota {
    #[serde(default)]
    pub hard: HashMap<String, String>,
    #[serde(default)]
    pub used: HashMap<String, String>,
}

/// A per-user namespace with an optional resource quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpace {
    pub namespace: String,
    #[serde(default)]
    pub quota: Option<ResourceQuota>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, n)| (k.to_string(), *n)).collect()
    }

    #[test]
    fn status_covers_the_whole_table() {
        // all Ready -> running
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Ready", 3)])),
            JobStatus::Running
        );
        // any Failed -> error
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Ready", 2), ("Failed", 1)])),
            JobStatus::Error
        );
        // any Pending -> pending
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Ready", 2), ("Pending", 1)])),
            JobStatus::Pending
        );
        // no pods yet -> pending
        assert_eq!(JobStatus::from_pod_phases(&counts(&[])), JobStatus::Pending);
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Ready", 0)])),
            JobStatus::Pending
        );
        // all terminated successfully -> completed
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Succeeded", 2), ("Completed", 1)])),
            JobStatus::Completed
        );
        // mixed ready/succeeded -> working
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Ready", 1), ("Succeeded", 1)])),
            JobStatus::Working
        );
        // unknown phase alone -> working
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Terminating", 1)])),
            JobStatus::Working
        );
    }

    #[test]
    fn failed_beats_pending() {
        assert_eq!(
            JobStatus::from_pod_phases(&counts(&[("Pending", 1), ("Failed", 1)])),
            JobStatus::Error
        );
    }

    #[test]
    fn labels_op_wire_names() {
        assert_eq!(serde_json::to_string(&LabelsOp::And).unwrap(), "\"AND\"");
        assert_eq!(serde_json::to_string(&LabelsOp::Or).unwrap(), "\"OR\"");
        let parsed: LabelsOp = serde_json::from_str("\"OR\"").unwrap();
        assert_eq!(parsed, LabelsOp::Or);
    }
}
