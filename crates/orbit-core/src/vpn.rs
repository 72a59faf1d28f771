use tokio::process::Command;
use tracing::warn;

use orbit_common::{Error, Result};

/// Overlay network control through the netclient sidecar container.
///
/// The sidecar enrols itself from its TOKEN environment at start; this
/// adapter covers explicit joins, teardown and address resolution.
#[derive(Debug, Clone)]
pub struct VpnAdapter {
    container_name: String,
}

impl VpnAdapter {
    /// `node_name` is the cluster container; the sidecar is `<node>-vpn`.
    pub fn new(node_name: &str) -> Self {
        Self {
            container_name: format!("{node_name}-vpn"),
        }
    }

    async fn exec(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["exec", self.container_name.as_str()];
        full.extend_from_slice(args);
        let output = Command::new("docker")
            .args(&full)
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("docker: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Runtime(format!(
                "netclient in {}: {}",
                self.container_name,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Enrol this host into the overlay network at `location`.
    pub async fn join(&self, location: &str, token: &str) -> Result<()> {
        self.exec(&["netclient", "join", "-t", token, "-n", location])
            .await?;
        Ok(())
    }

    /// Leave the overlay. Best-effort and idempotent; a sidecar that is
    /// already gone or never joined is not an error.
    pub async fn leave(&self) {
        if let Err(e) = self.exec(&["netclient", "leave", "-a"]).await {
            warn!(error = %e, "vpn leave skipped");
        }
    }

    /// Current overlay address of this host, if enrolled.
    pub async fn resolve_ip(&self) -> Result<Option<String>> {
        let output = Command::new("docker")
            .args([
                "exec",
                self.container_name.as_str(),
                "ip",
                "-o",
                "-4",
                "addr",
                "show",
            ])
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("docker: {e}")))?;
        if !output.status.success() {
            return Ok(None);
        }
        let addrs = crate::net::parse_addr_show(&String::from_utf8_lossy(&output.stdout));
        Ok(addrs.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_name_follows_the_node() {
        assert_eq!(VpnAdapter::new("host-a").container_name, "host-a-vpn");
    }
}
