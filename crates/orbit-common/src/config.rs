use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the pool config file inside the cache directory.
const SERVER_FILE: &str = ".server";

/// Local record of the pool this host belongs to.
///
/// Created on create/join/attach, never updated in place (rotate by
/// re-joining), deleted on stop. Worker nodes only carry the tier key
/// they joined with in `admin_key`; the other two stay unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub server_ip: String,
    pub admin_key: String,
    #[serde(default)]
    pub write_key: Option<String>,
    #[serde(default)]
    pub readonly_key: Option<String>,
    /// `host:port` of the in-cluster watcher.
    pub watcher_service: String,
    pub node_name: String,
    pub cluster_name: String,
    #[serde(default)]
    pub public_location: Option<String>,
    #[serde(default)]
    pub user_api_key: Option<String>,
}

/// On-disk store for pool config and derived local files.
///
/// The pool lifecycle manager is the sole writer; everything else reads.
/// Injected explicitly so tests can point it at a temp directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default cache location: `$ORBIT_HOME`, else `<user cache>/orbit`.
    pub fn default_root() -> PathBuf {
        if let Ok(home) = std::env::var("ORBIT_HOME") {
            return PathBuf::from(home);
        }
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orbit")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_file(&self) -> PathBuf {
        self.root.join(SERVER_FILE)
    }

    pub fn compose_file(&self) -> PathBuf {
        self.root.join("compose.yaml")
    }

    pub fn kubeconfig_file(&self) -> PathBuf {
        self.root.join("kubeconfig")
    }

    pub fn templates_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("LOCAL_TEMPLATES_DIR") {
            return PathBuf::from(dir);
        }
        self.root.join("templates")
    }

    pub fn exists(&self) -> bool {
        self.server_file().is_file()
    }

    pub fn load(&self) -> Result<PoolConfig> {
        let path = self.server_file();
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigMissing(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigMissing(format!("{}: {e}", path.display())))
    }

    /// Persist the config atomically: write a temp file in the same
    /// directory, then rename over the target. Concurrent readers never
    /// observe a partial file.
    pub fn store(&self, config: &PoolConfig) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let target = self.server_file();
        let tmp = self.root.join(format!("{SERVER_FILE}.tmp.{}", std::process::id()));
        let json = serde_json::to_string(config)
            .map_err(|e| Error::ConfigMissing(format!("serialize: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Remove the whole cache directory. Idempotent.
    pub fn delete_all(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoolConfig {
        PoolConfig {
            server_ip: "10.0.0.1".into(),
            admin_key: "admin".into(),
            write_key: Some("write".into()),
            readonly_key: Some("readonly".into()),
            watcher_service: "10.0.0.1:31000".into(),
            node_name: "hostA".into(),
            cluster_name: "demo".into(),
            public_location: None,
            user_api_key: None,
        }
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.store(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn load_missing_file_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(matches!(store.load(), Err(Error::ConfigMissing(_))));
    }

    #[test]
    fn load_rejects_missing_mandatory_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            store.server_file(),
            r#"{"server_ip": "10.0.0.1", "admin_key": "k"}"#,
        )
        .unwrap();
        assert!(matches!(store.load(), Err(Error::ConfigMissing(_))));
    }

    #[test]
    fn crash_between_write_and_rename_leaves_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.store(&sample()).unwrap();

        // Simulated crash: the new content reached the temp file but the
        // rename never happened.
        let mut updated = sample();
        updated.cluster_name = "demo-2".into();
        let tmp = dir.path().join(".server.tmp.crash");
        std::fs::write(&tmp, serde_json::to_string(&updated).unwrap()).unwrap();

        // Readers still see the previous complete object.
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn delete_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("pool"));
        store.store(&sample()).unwrap();
        store.delete_all().unwrap();
        store.delete_all().unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn worker_config_omits_unused_tier_keys() {
        let raw = r#"{
            "server_ip": "10.0.0.1",
            "admin_key": "joined-with",
            "watcher_service": "10.0.0.1:31000",
            "node_name": "hostB",
            "cluster_name": "demo"
        }"#;
        let config: PoolConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.write_key, None);
        assert_eq!(config.readonly_key, None);
    }
}
