use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use orbit_common::{ConfigStore, Error, JoinToken, PoolConfig, Result, TokenMode};

use crate::directory::DirectoryClient;
use crate::gpu::detect_gpu_count;
use crate::net::get_ip_addresses;
use crate::nodes::NodeService;
use crate::runtime::{render_compose, ComposeParams, ContainerRuntime, RuntimeRole};
use crate::vpn::VpnAdapter;
use crate::watcher::WatcherClient;
use crate::{ROLE_LABEL, STORAGE_LABEL};

const CONTROL_PLANE_TIMEOUT: Duration = Duration::from_secs(120);
const NODE_REGISTER_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_POLL: Duration = Duration::from_secs(10);
const PAUSE_RETRIES: u32 = 3;
const PAUSE_BACKOFF: Duration = Duration::from_secs(5);

/// NodePort the dependency manifest pins the watcher Service to.
const WATCHER_NODE_PORT: u16 = 31000;
const KUBECONFIG_IN_CONTAINER: &str = "/etc/rancher/k3s/k3s.yaml";
const MANIFESTS_DIR_IN_CONTAINER: &str = "/var/lib/rancher/k3s/server/manifests";

/// Options for creating a new pool on this host.
#[derive(Debug, Clone)]
pub struct CreateOpts {
    pub cluster_name: String,
    /// Advertised address; picked from the host interfaces when unset.
    pub ip_address: Option<String>,
    /// Negative means "probe the host and use what it has".
    pub num_gpus: i32,
    pub labels: HashMap<String, String>,
    /// Overlay enrolment key; enables a public pool at that location.
    pub vpn_token: Option<String>,
    pub location: Option<String>,
    pub platform: Option<String>,
    pub user_id: Option<String>,
    /// Minted key for the external directory, when publishing there.
    pub user_api_key: Option<String>,
}

/// Options for joining an existing pool.
#[derive(Debug, Clone)]
pub struct JoinOpts {
    pub token: String,
    pub node_name: Option<String>,
    pub ip_address: Option<String>,
    pub num_gpus: i32,
    pub labels: HashMap<String, String>,
    pub storage_compatible: bool,
    pub platform: Option<String>,
    pub user_id: Option<String>,
}

/// Result of a successful create/join, plus any non-fatal warning from
/// the late provisioning steps.
#[derive(Debug, Clone)]
pub struct PoolOutcome {
    pub cluster_name: String,
    pub node_name: String,
    pub server_ip: String,
    pub warning: Option<String>,
}

/// Orchestrates the pool state machine on this host.
///
/// Create, join, attach and stop are serialised behind one exclusive
/// lock; they are heavyweight and must never interleave. Long waits
/// poll with back-off and honour the cancellation token within one
/// poll interval.
pub struct PoolManager {
    store: ConfigStore,
    runtime: Arc<dyn ContainerRuntime>,
    lock: Mutex<()>,
    cancel: CancellationToken,
}

impl PoolManager {
    pub fn new(store: ConfigStore, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            store,
            runtime,
            lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by in-flight waits; cancel it to abort within the
    /// next poll interval. Issued runtime commands are not rolled back.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── create ──────────────────────────────────────────────────────

    pub async fn create(&self, opts: CreateOpts) -> Result<PoolOutcome> {
        let _guard = self.lock.lock().await;
        if self.store.exists() {
            return Err(Error::State(
                "this host is already a pool member; stop the pool first".to_string(),
            ));
        }
        // A public location ends up in every issued token; without an
        // overlay behind it those tokens would advertise a network that
        // does not exist.
        if opts.location.is_some() && opts.vpn_token.is_none() {
            return Err(Error::State(
                "a public location requires a vpn enrolment token".to_string(),
            ));
        }

        self.runtime.preflight().await?;
        let num_gpus = resolve_gpu_count(opts.num_gpus).await;
        let node_name = resolve_node_name(None)?;
        let node_ip = match &opts.ip_address {
            Some(ip) => ip.clone(),
            None => first_host_ip().await?,
        };

        let params = ComposeParams {
            role: RuntimeRole::Seed,
            node_name: node_name.clone(),
            node_ip: node_ip.clone(),
            server_ip: None,
            cluster_token: None,
            num_gpus,
            labels: sorted_labels(&opts.labels),
            vpn_token: opts.vpn_token.clone(),
            platform: opts.platform.clone(),
            mtu: None,
        };
        let spec = render_compose(&params);

        match self.create_inner(&opts, &node_name, &node_ip, spec).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "pool create failed, tearing down");
                self.teardown(&node_name).await;
                Err(e)
            }
        }
    }

    async fn create_inner(
        &self,
        opts: &CreateOpts,
        node_name: &str,
        node_ip: &str,
        spec: String,
    ) -> Result<PoolOutcome> {
        self.runtime.start(&spec).await?;

        // The sidecar enrols itself from its TOKEN env; a named location
        // additionally pins the overlay network explicitly.
        if let (Some(location), Some(vpn_token)) = (&opts.location, &opts.vpn_token) {
            VpnAdapter::new(node_name).join(location, vpn_token).await?;
        }

        self.wait_until("control plane", CONTROL_PLANE_TIMEOUT, || async {
            self.runtime.get_cluster_token().await.is_ok()
        })
        .await?;

        // With an overlay attached, the advertised address is the one the
        // VPN assigned, not the local interface.
        let server_ip = if opts.vpn_token.is_some() {
            let mut assigned = None;
            self.wait_until("overlay address", CONTROL_PLANE_TIMEOUT, || async {
                self.runtime.get_vpn_ip().await.ok().flatten().is_some()
            })
            .await?;
            if let Ok(Some(ip)) = self.runtime.get_vpn_ip().await {
                assigned = Some(ip);
            }
            assigned.unwrap_or_else(|| node_ip.to_string())
        } else {
            node_ip.to_string()
        };

        let admin_key = random_key();
        let write_key = random_key();
        let readonly_key = random_key();
        let watcher_service = format!("{server_ip}:{WATCHER_NODE_PORT}");

        let config = PoolConfig {
            server_ip: server_ip.clone(),
            admin_key: admin_key.clone(),
            write_key: Some(write_key.clone()),
            readonly_key: Some(readonly_key.clone()),
            watcher_service: watcher_service.clone(),
            node_name: node_name.to_string(),
            cluster_name: opts.cluster_name.clone(),
            public_location: opts.location.clone(),
            user_api_key: opts.user_api_key.clone(),
        };
        self.store.store(&config)?;

        self.runtime
            .copy_out(KUBECONFIG_IN_CONTAINER, &self.store.kubeconfig_file())
            .await?;

        let manifest = render_dependencies(&admin_key, &write_key, &readonly_key, &opts.cluster_name);
        let deps_file = self.store.root().join("dependencies.yaml");
        tokio::fs::write(&deps_file, &manifest).await?;
        self.runtime
            .copy_in(
                &deps_file,
                &format!("{MANIFESTS_DIR_IN_CONTAINER}/orbit-dependencies.yaml"),
            )
            .await?;

        info!(cluster = %opts.cluster_name, %server_ip, "pool created, waiting for watcher");

        // From here failures degrade to warnings; the pool itself is up.
        let mut warning = None;
        let watcher = WatcherClient::new(&watcher_service, &admin_key);
        let healthy = self
            .wait_until("watcher health", CONTROL_PLANE_TIMEOUT, || async {
                watcher.is_alive(HEALTH_POLL).await
            })
            .await;
        match healthy {
            Ok(()) => {
                let nodes = NodeService::new(watcher.clone());
                if let Err(e) = nodes
                    .init_user_workspace(opts.user_id.as_deref(), Some(node_name), None)
                    .await
                {
                    warning = Some(format!("default user-space not provisioned: {e}"));
                }
            }
            Err(e) => warning = Some(format!("watcher did not become healthy: {e}")),
        }

        if let (Some(directory), Some(key)) = (DirectoryClient::from_env(), &opts.user_api_key) {
            match self.issue_token(&config, TokenMode::User).await {
                Ok(token) => {
                    if let Err(e) = directory
                        .register_pool(key, &opts.cluster_name, &token)
                        .await
                    {
                        warning = Some(format!("directory registration failed: {e}"));
                    }
                }
                Err(e) => warning = Some(format!("directory registration failed: {e}")),
            }
        }

        Ok(PoolOutcome {
            cluster_name: opts.cluster_name.clone(),
            node_name: node_name.to_string(),
            server_ip,
            warning,
        })
    }

    // ── join / attach ───────────────────────────────────────────────

    pub async fn join(&self, opts: JoinOpts) -> Result<PoolOutcome> {
        let _guard = self.lock.lock().await;
        if self.store.exists() {
            return Err(Error::State(
                "this host is already a pool member; stop the pool first".to_string(),
            ));
        }

        let token = JoinToken::validate(&opts.token, false)?;
        self.runtime.preflight().await?;
        let num_gpus = resolve_gpu_count(opts.num_gpus).await;
        let node_name = resolve_node_name(opts.node_name.as_deref())?;
        let node_ip = match &opts.ip_address {
            Some(ip) => ip.clone(),
            None => first_host_ip().await?,
        };

        let mut labels = sorted_labels(&opts.labels);
        labels.insert(
            STORAGE_LABEL.to_string(),
            opts.storage_compatible.to_string(),
        );
        labels.insert(ROLE_LABEL.to_string(), "worker".to_string());

        let params = ComposeParams {
            role: RuntimeRole::Agent,
            node_name: node_name.clone(),
            node_ip,
            server_ip: Some(token.cluster_ip.clone()),
            cluster_token: Some(token.cluster_token.clone()),
            num_gpus,
            labels,
            vpn_token: token.public_location.clone(),
            platform: opts.platform.clone(),
            mtu: None,
        };
        let spec = render_compose(&params);

        match self.join_inner(&opts, &token, &node_name, spec).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "pool join failed, tearing down");
                self.teardown(&node_name).await;
                Err(e)
            }
        }
    }

    async fn join_inner(
        &self,
        opts: &JoinOpts,
        token: &JoinToken,
        node_name: &str,
        spec: String,
    ) -> Result<PoolOutcome> {
        self.runtime.start(&spec).await?;
        self.wait_until("agent start", CONTROL_PLANE_TIMEOUT, || async {
            self.runtime.is_running().await.unwrap_or(false)
        })
        .await?;

        let config = PoolConfig {
            server_ip: token.cluster_ip.clone(),
            admin_key: token.auth_key.clone(),
            write_key: None,
            readonly_key: None,
            watcher_service: token.watcher_service.clone(),
            node_name: node_name.to_string(),
            cluster_name: token.cluster_name.clone(),
            public_location: token.public_location.clone(),
            user_api_key: None,
        };
        self.store.store(&config)?;

        let watcher = WatcherClient::new(&token.watcher_service, &token.auth_key);
        let nodes = NodeService::new(watcher.clone());
        let wanted = node_name.to_string();
        self.wait_until("node registration", NODE_REGISTER_TIMEOUT, || {
            let nodes = nodes.clone();
            let wanted = wanted.clone();
            async move {
                match nodes.fetch_devices().await {
                    Ok(devices) => devices.iter().any(|n| n.name == wanted),
                    Err(_) => false,
                }
            }
        })
        .await?;

        let mut warning = None;
        if let Err(e) = nodes
            .init_user_workspace(opts.user_id.as_deref(), Some(node_name), None)
            .await
        {
            warning = Some(format!("user-space not provisioned: {e}"));
        }

        info!(cluster = %token.cluster_name, node = %node_name, "joined pool");
        Ok(PoolOutcome {
            cluster_name: token.cluster_name.clone(),
            node_name: node_name.to_string(),
            server_ip: token.cluster_ip.clone(),
            warning,
        })
    }

    /// Become a management-only client: persist the config derived from
    /// the token without starting any runtime container.
    pub async fn attach(&self, token: &str) -> Result<PoolOutcome> {
        let _guard = self.lock.lock().await;
        if self.store.exists() {
            return Err(Error::State(
                "this host is already a pool member; stop the pool first".to_string(),
            ));
        }

        let token = JoinToken::validate(token, false)?;
        let node_name = resolve_node_name(None)?;
        let config = PoolConfig {
            server_ip: token.cluster_ip.clone(),
            admin_key: token.auth_key.clone(),
            write_key: None,
            readonly_key: None,
            watcher_service: token.watcher_service.clone(),
            node_name: node_name.clone(),
            cluster_name: token.cluster_name.clone(),
            public_location: token.public_location.clone(),
            user_api_key: None,
        };
        self.store.store(&config)?;
        Ok(PoolOutcome {
            cluster_name: token.cluster_name,
            node_name,
            server_ip: token.cluster_ip,
            warning: None,
        })
    }

    // ── stop / pause / resume ───────────────────────────────────────

    /// Leave the pool and clean up local state. Every step is
    /// best-effort so a half-created pool can always be torn down.
    pub async fn stop(&self, skip_node_deletion: bool) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Ok(config) = self.store.load() {
            if !skip_node_deletion {
                let watcher = WatcherClient::new(&config.watcher_service, &config.admin_key);
                let nodes = NodeService::new(watcher);
                if let Err(e) = nodes.delete_nodes(&[config.node_name.clone()]).await {
                    warn!(error = %e, "node deregistration skipped");
                }
            }

            let is_seed = self.runtime.is_seed().await.unwrap_or(false);
            if is_seed {
                if let (Some(directory), Some(key)) =
                    (DirectoryClient::from_env(), &config.user_api_key)
                {
                    if let Err(e) = directory.unregister_pool(key, &config.cluster_name).await {
                        warn!(error = %e, "directory unregistration skipped");
                    }
                }
            }

            self.teardown(&config.node_name).await;
        }

        self.store.delete_all()?;
        info!("left pool");
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.retry_runtime("pause", || self.runtime.pause()).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.retry_runtime("resume", || self.runtime.resume()).await
    }

    // ── introspection ───────────────────────────────────────────────

    /// Issue a join token for the pool. Seed only: the bootstrap secret
    /// lives with the control plane.
    pub async fn get_pool_token(&self, mode: TokenMode) -> Result<String> {
        let config = self.store.load()?;
        if !self.runtime.is_seed().await? {
            return Err(Error::State(
                "join tokens can only be issued on the seed node".to_string(),
            ));
        }
        self.issue_token(&config, mode).await
    }

    async fn issue_token(&self, config: &PoolConfig, mode: TokenMode) -> Result<String> {
        let auth_key = match mode {
            TokenMode::Admin => config.admin_key.clone(),
            TokenMode::User => config.write_key.clone().ok_or_else(|| {
                Error::State("this node has no user tier key".to_string())
            })?,
            TokenMode::Worker => config.readonly_key.clone().ok_or_else(|| {
                Error::State("this node has no worker tier key".to_string())
            })?,
        };
        let cluster_token = self.runtime.get_cluster_token().await?;
        let token = JoinToken {
            cluster_ip: config.server_ip.clone(),
            cluster_name: config.cluster_name.clone(),
            cluster_token,
            auth_key,
            watcher_service: config.watcher_service.clone(),
            public_location: config.public_location.clone(),
        };
        Ok(token.encode())
    }

    /// Config present and the watcher answers its health endpoint.
    pub async fn is_connected(&self) -> bool {
        let Ok(config) = self.store.load() else {
            return false;
        };
        WatcherClient::new(&config.watcher_service, &config.admin_key)
            .is_alive(HEALTH_POLL)
            .await
    }

    /// Config present and the local runtime container is up.
    pub async fn is_agent_running(&self) -> bool {
        self.store.exists() && self.runtime.is_running().await.unwrap_or(false)
    }

    /// Whether this host carries the control plane.
    pub async fn is_server(&self) -> bool {
        self.runtime.is_seed().await.unwrap_or(false)
    }

    // ── internals ───────────────────────────────────────────────────

    async fn teardown(&self, node_name: &str) {
        if let Err(e) = self.runtime.stop().await {
            warn!(error = %e, "runtime stop skipped");
        }
        if let Err(e) = self.runtime.remove().await {
            warn!(error = %e, "runtime remove skipped");
        }
        VpnAdapter::new(node_name).leave().await;
    }

    async fn retry_runtime<'a, F, Fut>(&'a self, what: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>> + 'a,
    {
        let mut last = None;
        for attempt in 1..=PAUSE_RETRIES {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "runtime {what} failed");
                    last = Some(e);
                    if attempt < PAUSE_RETRIES {
                        tokio::time::sleep(PAUSE_BACKOFF).await;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Runtime(format!("{what} failed"))))
    }

    async fn wait_until<F, Fut>(&self, what: &str, timeout: Duration, mut probe: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut delay = Duration::from_secs(1);
        loop {
            if probe().await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::State(format!("timed out waiting for {what}")));
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Error::State(format!("cancelled while waiting for {what}")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(HEALTH_POLL);
        }
    }
}

fn random_key() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn resolve_node_name(explicit: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    let name = hostname::get()?;
    Ok(name.to_string_lossy().into_owned())
}

async fn resolve_gpu_count(requested: i32) -> u32 {
    if requested < 0 {
        detect_gpu_count().await
    } else {
        requested as u32
    }
}

async fn first_host_ip() -> Result<String> {
    get_ip_addresses()
        .await
        .into_iter()
        .next()
        .ok_or_else(|| Error::State("no usable IPv4 address on this host".to_string()))
}

fn sorted_labels(labels: &HashMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Manifest for the in-cluster services every pool needs: the watcher
/// with its three tier keys, and the namespace controller that enforces
/// user-space quotas. Applied through the auto-deploy directory.
fn render_dependencies(
    admin_key: &str,
    write_key: &str,
    readonly_key: &str,
    cluster_name: &str,
) -> String {
    format!(
        concat!(
            "apiVersion: v1\n",
            "kind: Namespace\n",
            "metadata:\n",
            "  name: orbit-system\n",
            "---\n",
            "apiVersion: v1\n",
            "kind: Secret\n",
            "metadata:\n",
            "  name: orbit-watcher-keys\n",
            "  namespace: orbit-system\n",
            "stringData:\n",
            "  admin-key: {admin_key}\n",
            "  write-key: {write_key}\n",
            "  readonly-key: {readonly_key}\n",
            "---\n",
            "apiVersion: apps/v1\n",
            "kind: Deployment\n",
            "metadata:\n",
            "  name: orbit-watcher\n",
            "  namespace: orbit-system\n",
            "  labels:\n",
            "    app: orbit-watcher\n",
            "spec:\n",
            "  replicas: 1\n",
            "  selector:\n",
            "    matchLabels:\n",
            "      app: orbit-watcher\n",
            "  template:\n",
            "    metadata:\n",
            "      labels:\n",
            "        app: orbit-watcher\n",
            "    spec:\n",
            "      containers:\n",
            "        - name: watcher\n",
            "          image: docker.io/orbitpool/watcher:latest\n",
            "          env:\n",
            "            - name: CLUSTER_NAME\n",
            "              value: {cluster_name}\n",
            "          envFrom:\n",
            "            - secretRef:\n",
            "                name: orbit-watcher-keys\n",
            "          ports:\n",
            "            - containerPort: 8080\n",
            "---\n",
            "apiVersion: v1\n",
            "kind: Service\n",
            "metadata:\n",
            "  name: orbit-watcher\n",
            "  namespace: orbit-system\n",
            "spec:\n",
            "  type: NodePort\n",
            "  selector:\n",
            "    app: orbit-watcher\n",
            "  ports:\n",
            "    - port: 8080\n",
            "      nodePort: {node_port}\n",
            "---\n",
            "apiVersion: apps/v1\n",
            "kind: Deployment\n",
            "metadata:\n",
            "  name: orbit-namespace-controller\n",
            "  namespace: orbit-system\n",
            "  labels:\n",
            "    app: orbit-namespace-controller\n",
            "spec:\n",
            "  replicas: 1\n",
            "  selector:\n",
            "    matchLabels:\n",
            "      app: orbit-namespace-controller\n",
            "  template:\n",
            "    metadata:\n",
            "      labels:\n",
            "        app: orbit-namespace-controller\n",
            "    spec:\n",
            "      containers:\n",
            "        - name: controller\n",
            "          image: docker.io/orbitpool/namespace-controller:latest\n",
        ),
        admin_key = admin_key,
        write_key = write_key,
        readonly_key = readonly_key,
        cluster_name = cluster_name,
        node_port = WATCHER_NODE_PORT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    /// Scriptable runtime for lifecycle tests.
    #[derive(Default)]
    struct FakeRuntime {
        seed: bool,
        fail_pauses: u32,
        pause_calls: AtomicU32,
        start_calls: AtomicU32,
        stop_calls: AtomicU32,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn preflight(&self) -> Result<()> {
            Ok(())
        }
        async fn start(&self, _spec: &str) -> Result<()> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn remove(&self) -> Result<()> {
            Ok(())
        }
        async fn pause(&self) -> Result<()> {
            let n = self.pause_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_pauses {
                return Err(Error::Runtime("pause failed".to_string()));
            }
            Ok(())
        }
        async fn resume(&self) -> Result<()> {
            Ok(())
        }
        async fn is_running(&self) -> Result<bool> {
            Ok(true)
        }
        async fn is_seed(&self) -> Result<bool> {
            Ok(self.seed)
        }
        async fn copy_out(&self, _container_path: &str, _host_path: &Path) -> Result<()> {
            Ok(())
        }
        async fn copy_in(&self, _host_path: &Path, _container_path: &str) -> Result<()> {
            Ok(())
        }
        async fn get_vpn_ip(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn get_cluster_token(&self) -> Result<String> {
            Ok("K10bootstrap".to_string())
        }
    }

    fn manager_with(runtime: FakeRuntime) -> (tempfile::TempDir, PoolManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("pool"));
        (dir, PoolManager::new(store, Arc::new(runtime)))
    }

    fn seed_config() -> PoolConfig {
        PoolConfig {
            server_ip: "10.0.0.1".into(),
            admin_key: "admin".into(),
            write_key: Some("write".into()),
            readonly_key: Some("readonly".into()),
            watcher_service: "10.0.0.1:31000".into(),
            node_name: "seed-host".into(),
            cluster_name: "demo".into(),
            public_location: None,
            user_api_key: None,
        }
    }

    fn sample_token() -> String {
        JoinToken {
            cluster_ip: "10.0.0.1".into(),
            cluster_name: "demo".into(),
            cluster_token: "K10bootstrap".into(),
            auth_key: "write".into(),
            watcher_service: "10.0.0.1:31000".into(),
            public_location: None,
        }
        .encode()
    }

    #[tokio::test]
    async fn create_refuses_when_already_a_member() {
        let (_dir, manager) = manager_with(FakeRuntime::default());
        manager.store.store(&seed_config()).unwrap();

        let opts = CreateOpts {
            cluster_name: "other".into(),
            ip_address: Some("10.0.0.2".into()),
            num_gpus: 0,
            labels: HashMap::new(),
            vpn_token: None,
            location: None,
            platform: None,
            user_id: None,
            user_api_key: None,
        };
        assert!(matches!(manager.create(opts).await, Err(Error::State(_))));
    }

    #[tokio::test]
    async fn create_rejects_location_without_vpn_token() {
        let (_dir, manager) = manager_with(FakeRuntime::default());

        let opts = CreateOpts {
            cluster_name: "public".into(),
            ip_address: Some("10.0.0.2".into()),
            num_gpus: 0,
            labels: HashMap::new(),
            vpn_token: None,
            location: Some("eu-west".into()),
            platform: None,
            user_id: None,
            user_api_key: None,
        };
        assert!(matches!(manager.create(opts).await, Err(Error::State(_))));
        assert!(!manager.store.exists());
    }

    #[tokio::test]
    async fn attach_persists_config_without_starting_anything() {
        let runtime = FakeRuntime::default();
        let (_dir, manager) = manager_with(runtime);

        let outcome = manager.attach(&sample_token()).await.unwrap();
        assert_eq!(outcome.cluster_name, "demo");
        assert!(manager.store.exists());

        let config = manager.store.load().unwrap();
        assert_eq!(config.admin_key, "write");
        assert_eq!(config.write_key, None);
    }

    #[tokio::test]
    async fn attach_rejects_invalid_tokens() {
        let (_dir, manager) = manager_with(FakeRuntime::default());
        assert!(matches!(
            manager.attach("not-a-token").await,
            Err(Error::TokenInvalid(_))
        ));
        assert!(!manager.store.exists());
    }

    #[tokio::test]
    async fn stop_is_idempotent_without_a_pool() {
        let (_dir, manager) = manager_with(FakeRuntime::default());
        manager.stop(true).await.unwrap();
        manager.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn token_issuance_is_seed_only() {
        let (_dir, manager) = manager_with(FakeRuntime::default());
        manager.store.store(&seed_config()).unwrap();
        assert!(matches!(
            manager.get_pool_token(TokenMode::Admin).await,
            Err(Error::State(_))
        ));
    }

    #[tokio::test]
    async fn token_mode_selects_the_tier_key() {
        let runtime = FakeRuntime {
            seed: true,
            ..Default::default()
        };
        let (_dir, manager) = manager_with(runtime);
        manager.store.store(&seed_config()).unwrap();

        for (mode, key) in [
            (TokenMode::Admin, "admin"),
            (TokenMode::User, "write"),
            (TokenMode::Worker, "readonly"),
        ] {
            let encoded = manager.get_pool_token(mode).await.unwrap();
            let token = JoinToken::decode(&encoded).unwrap();
            assert_eq!(token.auth_key, key);
            assert_eq!(token.cluster_token, "K10bootstrap");
        }
    }

    #[tokio::test]
    async fn worker_config_cannot_issue_user_tokens() {
        let runtime = FakeRuntime {
            seed: true,
            ..Default::default()
        };
        let (_dir, manager) = manager_with(runtime);
        let mut config = seed_config();
        config.write_key = None;
        config.readonly_key = None;
        manager.store.store(&config).unwrap();

        assert!(manager.get_pool_token(TokenMode::Admin).await.is_ok());
        assert!(matches!(
            manager.get_pool_token(TokenMode::User).await,
            Err(Error::State(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_retries_with_backoff() {
        let runtime = FakeRuntime {
            fail_pauses: 2,
            ..Default::default()
        };
        let (_dir, manager) = manager_with(runtime);
        manager.pause().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_gives_up_after_three_attempts() {
        let runtime = FakeRuntime {
            fail_pauses: 10,
            ..Default::default()
        };
        let (_dir, manager) = manager_with(runtime);
        assert!(matches!(manager.pause().await, Err(Error::Runtime(_))));
    }

    #[test]
    fn dependency_manifest_is_deterministic_and_carries_keys() {
        let a = render_dependencies("ak", "wk", "rk", "demo");
        let b = render_dependencies("ak", "wk", "rk", "demo");
        assert_eq!(a, b);
        assert!(a.contains("admin-key: ak"));
        assert!(a.contains("write-key: wk"));
        assert!(a.contains("readonly-key: rk"));
        assert!(a.contains("nodePort: 31000"));
    }

    #[test]
    fn random_keys_are_128_bit_hex_and_independent() {
        let a = random_key();
        let b = random_key();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
