use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use orbit_common::{Error, Result};

use super::{run, ContainerRuntime};

const NODE_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";

/// Embedded cluster run as a single privileged container through
/// `docker compose`.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    compose_file: PathBuf,
    container_name: String,
}

impl DockerRuntime {
    pub fn new(compose_file: impl Into<PathBuf>, container_name: impl Into<String>) -> Self {
        Self {
            compose_file: compose_file.into(),
            container_name: container_name.into(),
        }
    }

    fn compose_path(&self) -> Result<&str> {
        self.compose_file
            .to_str()
            .ok_or_else(|| Error::Runtime("compose file path is not valid UTF-8".to_string()))
    }

    async fn compose(&self, args: &[&str]) -> Result<String> {
        let path = self.compose_path()?;
        let mut full = vec!["compose", "-f", path];
        full.extend_from_slice(args);
        run("docker", &full).await
    }

    async fn exec(&self, container: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["exec", container];
        full.extend_from_slice(args);
        run("docker", &full).await
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn preflight(&self) -> Result<()> {
        let version = run("docker", &["version", "--format", "{{.Server.Version}}"]).await?;
        debug!(version = %version.trim(), "docker daemon reachable");
        Ok(())
    }

    async fn start(&self, spec: &str) -> Result<()> {
        if let Some(parent) = self.compose_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.compose_file, spec).await?;
        self.compose(&["up", "-d"]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.compose(&["stop"]).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.compose(&["down", "-v"]).await?;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        run("docker", &["stop", &self.container_name]).await?;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        run("docker", &["start", &self.container_name]).await?;
        Ok(())
    }

    async fn is_running(&self) -> Result<bool> {
        let output = Command::new("docker")
            .args(["inspect", "--format", "{{.State.Running}}", &self.container_name])
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("docker: {e}")))?;
        if !output.status.success() {
            // No such container.
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn is_seed(&self) -> Result<bool> {
        let output = Command::new("docker")
            .args(["exec", &self.container_name, "test", "-f", NODE_TOKEN_PATH])
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("docker: {e}")))?;
        Ok(output.status.success())
    }

    async fn copy_out(&self, container_path: &str, host_path: &Path) -> Result<()> {
        let host = host_path
            .to_str()
            .ok_or_else(|| Error::Runtime("host path is not valid UTF-8".to_string()))?;
        let source = format!("{}:{container_path}", self.container_name);
        run("docker", &["cp", &source, host]).await?;
        Ok(())
    }

    async fn copy_in(&self, host_path: &Path, container_path: &str) -> Result<()> {
        let host = host_path
            .to_str()
            .ok_or_else(|| Error::Runtime("host path is not valid UTF-8".to_string()))?;
        let target = format!("{}:{container_path}", self.container_name);
        run("docker", &["cp", host, &target]).await?;
        Ok(())
    }

    async fn get_vpn_ip(&self) -> Result<Option<String>> {
        crate::vpn::VpnAdapter::new(&self.container_name)
            .resolve_ip()
            .await
    }

    async fn get_cluster_token(&self) -> Result<String> {
        let token = self
            .exec(&self.container_name, &["cat", NODE_TOKEN_PATH])
            .await?;
        Ok(token.trim().to_string())
    }
}
