use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use orbit_common::{Error, Result};

mod docker;
mod host;

pub use docker::DockerRuntime;
pub use host::HostRuntime;

const DEFAULT_KUBE_VERSION: &str = "v1.31.1-k3s1";
const DEFAULT_FLANNEL_IFACE: &str = "netmaker";

/// Role the embedded cluster container plays on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeRole {
    /// First control-plane node; initialises the cluster.
    Seed,
    /// Additional control-plane node joining an existing cluster.
    Server,
    /// Worker node.
    Agent,
}

impl RuntimeRole {
    fn command(&self) -> &'static str {
        match self {
            RuntimeRole::Seed | RuntimeRole::Server => "server",
            RuntimeRole::Agent => "agent",
        }
    }
}

/// Everything needed to render one host's compose file.
#[derive(Debug, Clone)]
pub struct ComposeParams {
    pub role: RuntimeRole,
    pub node_name: String,
    pub node_ip: String,
    /// Control-plane address; required for every role but `Seed`.
    pub server_ip: Option<String>,
    /// Cluster join token; required for every role but `Seed`.
    pub cluster_token: Option<String>,
    pub num_gpus: u32,
    pub labels: BTreeMap<String, String>,
    /// Overlay enrolment key. Presence adds the VPN sidecar and pins the
    /// flannel interface to the overlay.
    pub vpn_token: Option<String>,
    /// Image platform override, e.g. `linux/arm64`.
    pub platform: Option<String>,
    /// Overlay interface MTU; only meaningful with a VPN token.
    pub mtu: Option<u32>,
}

/// Render the docker compose file for one host.
///
/// Deterministic: identical params yield identical text. Labels are
/// emitted in sorted order, one `--node-label` per entry.
pub fn render_compose(params: &ComposeParams) -> String {
    let kube_version =
        std::env::var("KUBE_VERSION").unwrap_or_else(|_| DEFAULT_KUBE_VERSION.to_string());
    let flannel_iface = std::env::var("DEFAULT_FLANNEL_IFACE")
        .unwrap_or_else(|_| DEFAULT_FLANNEL_IFACE.to_string());

    let mut command = format!("{} --node-name {}", params.role.command(), params.node_name);
    if params.role == RuntimeRole::Seed {
        command.push_str(" --cluster-init");
    }
    if let (Some(server_ip), Some(token)) = (&params.server_ip, &params.cluster_token) {
        command.push_str(&format!(" --server https://{server_ip}:6443 --token {token}"));
    }
    command.push_str(&format!(" --node-ip {}", params.node_ip));
    if params.vpn_token.is_some() {
        command.push_str(&format!(" --flannel-iface {flannel_iface}"));
    }
    for (key, value) in &params.labels {
        command.push_str(&format!(" --node-label {key}={value}"));
    }

    let mut out = String::new();
    out.push_str("services:\n");

    if let Some(vpn_token) = &params.vpn_token {
        out.push_str(&format!(
            concat!(
                "  vpn:\n",
                "    image: docker.io/gravitl/netclient:v0.90.0\n",
                "    container_name: {name}-vpn\n",
                "    cap_add:\n",
                "      - NET_ADMIN\n",
                "      - SYS_MODULE\n",
                "    network_mode: host\n",
                "    environment:\n",
                "      - TOKEN={token}\n",
            ),
            name = params.node_name,
            token = vpn_token,
        ));
        if let Some(mtu) = params.mtu {
            out.push_str(&format!("      - MTU={mtu}\n"));
        }
        out.push_str("    restart: unless-stopped\n");
    }

    out.push_str(&format!(
        concat!(
            "  cluster:\n",
            "    image: docker.io/rancher/k3s:{version}\n",
            "    container_name: {name}\n",
        ),
        version = kube_version,
        name = params.node_name,
    ));
    if let Some(platform) = &params.platform {
        out.push_str(&format!("    platform: {platform}\n"));
    }
    out.push_str(&format!(
        concat!(
            "    command: {command}\n",
            "    privileged: true\n",
            "    network_mode: host\n",
            "    volumes:\n",
            "      - {name}-data:/var/lib/rancher/k3s\n",
            "    restart: unless-stopped\n",
        ),
        name = params.node_name,
        command = command,
    ));

    if params.num_gpus > 0 {
        out.push_str(&format!(
            concat!(
                "    deploy:\n",
                "      resources:\n",
                "        reservations:\n",
                "          devices:\n",
                "            - driver: nvidia\n",
                "              count: {count}\n",
                "              capabilities: [gpu]\n",
            ),
            count = params.num_gpus,
        ));
    }

    out.push_str(&format!(
        concat!("volumes:\n", "  {name}-data:\n"),
        name = params.node_name,
    ));
    out
}

/// Backend-neutral handle on the embedded cluster process of this host.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify the backend tooling is present and responsive.
    async fn preflight(&self) -> Result<()>;

    /// Bring the cluster process up from a rendered spec.
    async fn start(&self, spec: &str) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Remove the process and its persistent state.
    async fn remove(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn is_running(&self) -> Result<bool>;

    /// Whether this host carries the cluster's control plane state.
    async fn is_seed(&self) -> Result<bool>;

    /// Copy a file out of the cluster environment onto the host.
    async fn copy_out(&self, container_path: &str, host_path: &Path) -> Result<()>;

    /// Copy a file from the host into the cluster environment. Used to
    /// drop dependency manifests into the auto-deploy directory.
    async fn copy_in(&self, host_path: &Path, container_path: &str) -> Result<()>;

    /// Overlay address of this host, if an overlay is attached.
    async fn get_vpn_ip(&self) -> Result<Option<String>>;

    /// Join token for new members; only valid on the seed.
    async fn get_cluster_token(&self) -> Result<String>;
}

/// Run a command, mapping non-zero exit to `Error::Runtime` with stderr.
pub(crate) async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Runtime(format!("{program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Runtime(format!(
            "{program} {}: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_params() -> ComposeParams {
        ComposeParams {
            role: RuntimeRole::Seed,
            node_name: "orbit-seed".to_string(),
            node_ip: "10.0.0.5".to_string(),
            server_ip: None,
            cluster_token: None,
            num_gpus: 0,
            labels: BTreeMap::new(),
            vpn_token: None,
            platform: None,
            mtu: None,
        }
    }

    #[test]
    fn render_is_deterministic() {
        let params = seed_params();
        assert_eq!(render_compose(&params), render_compose(&params));
    }

    #[test]
    fn seed_runs_server_with_cluster_init() {
        let rendered = render_compose(&seed_params());
        assert!(rendered.contains("command: server --node-name orbit-seed --cluster-init"));
        assert!(!rendered.contains("--server https://"));
    }

    #[test]
    fn agent_joins_the_given_server() {
        let mut params = seed_params();
        params.role = RuntimeRole::Agent;
        params.server_ip = Some("100.64.0.1".to_string());
        params.cluster_token = Some("tok123".to_string());
        let rendered = render_compose(&params);
        assert!(rendered.contains("command: agent --node-name orbit-seed"));
        assert!(rendered.contains("--server https://100.64.0.1:6443 --token tok123"));
        assert!(!rendered.contains("--cluster-init"));
    }

    #[test]
    fn gpu_section_appears_only_above_zero() {
        let mut params = seed_params();
        assert!(!render_compose(&params).contains("driver: nvidia"));
        params.num_gpus = 2;
        let rendered = render_compose(&params);
        assert!(rendered.contains("driver: nvidia"));
        assert!(rendered.contains("count: 2"));
    }

    #[test]
    fn labels_are_sorted_one_flag_each() {
        let mut params = seed_params();
        params.labels.insert("zeta".to_string(), "1".to_string());
        params.labels.insert("alpha".to_string(), "2".to_string());
        let rendered = render_compose(&params);
        let alpha = rendered.find("--node-label alpha=2").unwrap();
        let zeta = rendered.find("--node-label zeta=1").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn vpn_token_adds_sidecar_and_flannel_iface() {
        let mut params = seed_params();
        let rendered = render_compose(&params);
        assert!(!rendered.contains("netclient"));
        assert!(!rendered.contains("--flannel-iface"));

        params.vpn_token = Some("enrol-key".to_string());
        let rendered = render_compose(&params);
        assert!(rendered.contains("gravitl/netclient"));
        assert!(rendered.contains("TOKEN=enrol-key"));
        assert!(rendered.contains("--flannel-iface"));
    }
}
