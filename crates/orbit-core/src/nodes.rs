use std::collections::HashMap;

use serde_json::json;
use tracing::info;

use orbit_common::{Error, Gpu, Node, ResourceSummary, Result, UserSpace};

use crate::template::slugify;
use crate::watcher::WatcherClient;

/// Node and capacity operations, all delegated to the watcher.
#[derive(Debug, Clone)]
pub struct NodeService {
    watcher: WatcherClient,
}

impl NodeService {
    pub fn new(watcher: WatcherClient) -> Self {
        Self { watcher }
    }

    /// All member nodes with their live conditions.
    pub async fn fetch_devices(&self) -> Result<Vec<Node>> {
        let value = self.watcher.get("/v1/get_nodes").await?;
        serde_json::from_value(value)
            .map_err(|e| Error::WatcherUnreachable(format!("malformed node list: {e}")))
    }

    /// Pool capacity, optionally restricted to the named nodes.
    pub async fn fetch_resources(&self, nodes: Option<&[String]>) -> Result<ResourceSummary> {
        let body = json!({ "node_names": nodes });
        let total = self
            .watcher
            .post("/v1/get_cluster_total_resources", &body)
            .await?;
        let available = self
            .watcher
            .post("/v1/get_cluster_available_resources", &body)
            .await?;
        Ok(ResourceSummary {
            total: parse_resource_map(total)?,
            available: parse_resource_map(available)?,
        })
    }

    /// GPU inventory across the pool, derived fresh from node state.
    pub async fn fetch_gpus(&self, available_only: bool) -> Result<Vec<Gpu>> {
        let value = self.watcher.post("/v1/get_node_gpus", &json!({})).await?;
        let mut gpus: Vec<Gpu> = serde_json::from_value(value)
            .map_err(|e| Error::WatcherUnreachable(format!("malformed gpu list: {e}")))?;
        if available_only {
            gpus.retain(|gpu| gpu.ready && gpu.available_count > 0);
        }
        Ok(gpus)
    }

    /// Mark nodes unschedulable. Already-cordoned nodes stay cordoned.
    pub async fn cordon(&self, nodes: &[String]) -> Result<()> {
        self.set_schedulable(nodes, false).await
    }

    /// Mark nodes schedulable again. Idempotent like `cordon`.
    pub async fn uncordon(&self, nodes: &[String]) -> Result<()> {
        self.set_schedulable(nodes, true).await
    }

    async fn set_schedulable(&self, nodes: &[String], schedulable: bool) -> Result<()> {
        let body = json!({ "node_names": nodes, "schedulable": schedulable });
        self.watcher.post("/v1/set_node_schedulable", &body).await?;
        Ok(())
    }

    /// Remove nodes from the pool. Unknown names are a no-op, not an
    /// error; returns the names the watcher actually deleted.
    pub async fn delete_nodes(&self, nodes: &[String]) -> Result<Vec<String>> {
        let body = json!({ "node_names": nodes });
        match self.watcher.post("/v1/delete_nodes", &body).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| Error::WatcherUnreachable(format!("malformed delete reply: {e}"))),
            Err(Error::WatcherDomain { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn add_node_labels(
        &self,
        node: &str,
        labels: &HashMap<String, String>,
    ) -> Result<()> {
        let body = json!({ "node_name": node, "labels": labels });
        self.watcher.post("/v1/add_labels_to_node", &body).await?;
        Ok(())
    }

    pub async fn get_node_labels(
        &self,
        nodes: &[String],
    ) -> Result<HashMap<String, HashMap<String, String>>> {
        let body = json!({ "node_names": nodes });
        let value = self.watcher.post("/v1/get_node_labels", &body).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::WatcherUnreachable(format!("malformed label map: {e}")))
    }

    /// Create (or reuse) the namespace and default quota for a user.
    ///
    /// The namespace is the slugified user id; `ORBIT_USER_ID` then the
    /// node name stand in when no id is given.
    pub async fn init_user_workspace(
        &self,
        user_id: Option<&str>,
        node_name: Option<&str>,
        force_namespace: Option<&str>,
    ) -> Result<UserSpace> {
        let user_id = match user_id {
            Some(id) => id.to_string(),
            None => std::env::var("ORBIT_USER_ID")
                .ok()
                .or_else(|| node_name.map(str::to_string))
                .ok_or_else(|| Error::State("no user id available for workspace".to_string()))?,
        };
        let namespace = force_namespace
            .map(str::to_string)
            .unwrap_or_else(|| slugify(&user_id));
        let body = json!({ "user_id": user_id, "namespace": namespace });
        let value = self.watcher.post("/v1/create_user_space", &body).await?;
        info!(%namespace, "user workspace ready");
        serde_json::from_value(value)
            .map_err(|e| Error::WatcherUnreachable(format!("malformed user space: {e}")))
    }
}

fn parse_resource_map(value: serde_json::Value) -> Result<HashMap<String, f64>> {
    serde_json::from_value(value)
        .map_err(|e| Error::WatcherUnreachable(format!("malformed resource map: {e}")))
}
