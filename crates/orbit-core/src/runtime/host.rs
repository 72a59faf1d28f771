use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use orbit_common::{Error, Result};

use super::{run, ContainerRuntime};

const SERVER_UNIT: &str = "k3s";
const AGENT_UNIT: &str = "k3s-agent";
const NODE_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";

/// Embedded cluster run as a native agent under systemd.
///
/// Installation of the units themselves is outside this adapter; it
/// drives whichever of the server/agent units exists on the host.
#[derive(Debug, Clone)]
pub struct HostRuntime {
    node_token: PathBuf,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self {
            node_token: PathBuf::from(NODE_TOKEN_PATH),
        }
    }

    fn unit(&self) -> &'static str {
        if self.node_token.exists() {
            SERVER_UNIT
        } else {
            AGENT_UNIT
        }
    }

    async fn unit_active(&self, unit: &str) -> Result<bool> {
        let output = Command::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("systemctl: {e}")))?;
        Ok(output.status.success())
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for HostRuntime {
    async fn preflight(&self) -> Result<()> {
        run("systemctl", &["--version"]).await?;
        Ok(())
    }

    async fn start(&self, _spec: &str) -> Result<()> {
        run("systemctl", &["start", self.unit()]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        run("systemctl", &["stop", self.unit()]).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let unit = self.unit();
        run("systemctl", &["stop", unit]).await?;
        run("systemctl", &["disable", unit]).await?;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.stop().await
    }

    async fn resume(&self) -> Result<()> {
        run("systemctl", &["start", self.unit()]).await?;
        Ok(())
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.unit_active(SERVER_UNIT).await? || self.unit_active(AGENT_UNIT).await?)
    }

    async fn is_seed(&self) -> Result<bool> {
        Ok(self.node_token.exists())
    }

    async fn copy_out(&self, container_path: &str, host_path: &Path) -> Result<()> {
        // Host agent: "inside" and "outside" are the same filesystem.
        tokio::fs::copy(container_path, host_path).await?;
        Ok(())
    }

    async fn copy_in(&self, host_path: &Path, container_path: &str) -> Result<()> {
        tokio::fs::copy(host_path, container_path).await?;
        Ok(())
    }

    async fn get_vpn_ip(&self) -> Result<Option<String>> {
        // Host networking; the pool manager enumerates interfaces itself.
        Ok(None)
    }

    async fn get_cluster_token(&self) -> Result<String> {
        let token = tokio::fs::read_to_string(&self.node_token).await?;
        Ok(token.trim().to_string())
    }
}
