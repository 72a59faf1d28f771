use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use orbit_common::LabelsOp;
use orbit_core::PoolOutcome;

fn default_gpus() -> i32 {
    -1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePoolRequest {
    pub cluster_name: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default = "default_gpus")]
    pub num_gpus: i32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub vpn_token: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinPoolRequest {
    pub token: String,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default = "default_gpus")]
    pub num_gpus: i32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub storage_compatible: Option<bool>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachRequest {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopPoolRequest {
    #[serde(default)]
    pub skip_node_deletion: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodesRequest {
    pub nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddNodeLabelsRequest {
    pub node: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployJobRequest {
    pub template_name: String,
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub force_namespace: Option<String>,
    #[serde(default)]
    pub target_labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub target_labels_ops: LabelsOp,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteJobRequest {
    pub name: String,
    #[serde(default)]
    pub force_namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchJobDetailsRequest {
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcesQuery {
    /// Comma-separated node names; empty means the whole pool.
    #[serde(default)]
    pub nodes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpusQuery {
    #[serde(default)]
    pub available_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogsQuery {
    pub name: String,
    #[serde(default)]
    pub pod: Option<String>,
    #[serde(default)]
    pub tail: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeLabelsQuery {
    /// Comma-separated node names.
    pub nodes: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenQuery {
    /// 0 admin, 1 user, 2 worker.
    pub mode: u8,
}

#[derive(Debug, Serialize)]
pub struct PoolResponse {
    pub cluster_name: String,
    pub node_name: String,
    pub server_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<PoolOutcome> for PoolResponse {
    fn from(outcome: PoolOutcome) -> Self {
        Self {
            cluster_name: outcome.cluster_name,
            node_name: outcome.node_name,
            server_ip: outcome.server_ip,
            warning: outcome.warning,
        }
    }
}

pub fn split_nodes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"{"cluster_name": "demo", "surprise": 1}"#;
        assert!(serde_json::from_str::<CreatePoolRequest>(raw).is_err());
    }

    #[test]
    fn gpu_count_defaults_to_probe() {
        let req: CreatePoolRequest =
            serde_json::from_str(r#"{"cluster_name": "demo"}"#).unwrap();
        assert_eq!(req.num_gpus, -1);
    }

    #[test]
    fn node_list_splitting() {
        assert_eq!(split_nodes("a, b,,c"), vec!["a", "b", "c"]);
        assert!(split_nodes("").is_empty());
    }
}
