use std::sync::Arc;

use orbit_common::{ConfigStore, PoolConfig, Result};
use orbit_core::{JobService, NodeService, PoolManager, TemplateEngine, WatcherClient};

#[derive(Clone)]
pub struct AppState {
    pub store: ConfigStore,
    pub manager: Arc<PoolManager>,
    /// Gate for mutating endpoints. `None` means every gated route
    /// answers 401 until a pool with a user key exists.
    pub access_key: Option<String>,
}

impl AppState {
    pub fn config(&self) -> Result<PoolConfig> {
        self.store.load()
    }

    /// Services are rebuilt per request: the watcher address and keys
    /// change whenever the host joins a different pool.
    pub fn node_service(&self) -> Result<NodeService> {
        let config = self.config()?;
        Ok(NodeService::new(WatcherClient::new(
            &config.watcher_service,
            &config.admin_key,
        )))
    }

    pub fn job_service(&self) -> Result<JobService> {
        let config = self.config()?;
        let watcher = WatcherClient::new(&config.watcher_service, &config.admin_key);
        let engine = TemplateEngine::new(self.store.templates_dir());
        Ok(JobService::new(watcher, engine, &config.server_ip))
    }
}
