//! CredStore: Docker's `~/.docker/config.json` format, plus the
//! two legacy formats Docker still reads (JSON-legacy and plaintext-legacy).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::error::ErrorKind;

/// The well-known host legacy plaintext credentials are installed under.
/// Docker's old single-registry `.dockercfg` predates multi-registry
/// `auths` maps, so its one set of credentials is always attributed here.
pub const DOCKER_INDEX_HOST: &str = "https://index.docker.io/v1/";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CredStoreError {
    #[error("i/o error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to parse {path}: {source}")]
    Decode { path: PathBuf, #[source] source: serde_json::Error },

    #[error("invalid credential entry for {host}: {source}")]
    InvalidEntry { host: String, #[source] source: crate::auth::AuthError },
}

impl CredStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CredStoreError::Io { .. } => ErrorKind::System,
            CredStoreError::Decode { .. } => ErrorKind::InvalidParameter,
            CredStoreError::InvalidEntry { .. } => ErrorKind::InvalidParameter,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredStore {
    pub auths: HashMap<String, AuthConfig>,

    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

impl CredStore {
    pub fn get(&self, host: &str) -> Option<&AuthConfig> {
        self.auths.get(host)
    }

    pub fn set(&mut self, host: impl Into<String>, config: AuthConfig) {
        self.auths.insert(host.into(), config);
    }

    /// Loads a `config.json`-shaped file, falling back to the two legacy
    /// formats Docker still reads from the same path.
    pub async fn load(path: &Path) -> Result<CredStore, CredStoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| CredStoreError::Io { path: path.to_path_buf(), source })?;

        if let Ok(store) = serde_json::from_slice::<CredStore>(&bytes) {
            if !store.auths.is_empty() || bytes_look_like_modern(&bytes) {
                return Ok(store);
            }
        }

        if let Ok(legacy) = serde_json::from_slice::<HashMap<String, LegacyJsonEntry>>(&bytes) {
            let mut store = CredStore::default();
            for (host, entry) in legacy {
                let (username, password) =
                    AuthConfig::decode_auth(&entry.auth).map_err(|source| CredStoreError::InvalidEntry { host: host.clone(), source })?;
                store.set(host, AuthConfig { username, password, identity_token: None, registry_token: None });
            }
            return Ok(store);
        }

        let text = String::from_utf8_lossy(&bytes);
        let mut lines = text.lines();
        let auth_line = lines
            .find(|l| l.trim_start().starts_with("username"))
            .and_then(|l| l.split('=').nth(1))
            .map(str::trim);

        if let Some(encoded) = auth_line {
            let (username, password) = AuthConfig::decode_auth(encoded)
                .map_err(|source| CredStoreError::InvalidEntry { host: DOCKER_INDEX_HOST.to_string(), source })?;
            let mut store = CredStore::default();
            store.set(DOCKER_INDEX_HOST, AuthConfig { username, password, identity_token: None, registry_token: None });
            return Ok(store);
        }

        Err(CredStoreError::Decode {
            path: path.to_path_buf(),
            source: serde_json::from_slice::<CredStore>(&bytes).unwrap_err(),
        })
    }

    /// Writes to a temp file alongside `path`, copies `path`'s existing
    /// permissions onto it (best-effort), then renames over it.
    pub async fn save(&self, path: &Path) -> Result<(), CredStoreError> {
        for config in self.auths.values() {
            config
                .validate()
                .map_err(|source| CredStoreError::InvalidEntry { host: "<validate>".to_string(), source })?;
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("config.json")
        ));

        let json = serde_json::to_vec_pretty(self).expect("CredStore always serializes");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|source| CredStoreError::Io { path: tmp_path.clone(), source })?;

        copy_permissions(&tmp_path, path).await;

        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|source| CredStoreError::Io { path: path.to_path_buf(), source })
    }
}

/// Copies `dest`'s existing file mode onto `tmp_path`, falling back to
/// `0600` when `dest` doesn't exist yet. `config.json` holds base64
/// `user:pass`; renaming a default-mode temp file over it would otherwise
/// leave credentials world-readable.
#[cfg(unix)]
async fn copy_permissions(tmp_path: &Path, dest: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let mode = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta.permissions().mode(),
        Err(_) => 0o600,
    };

    let _ = tokio::fs::set_permissions(tmp_path, std::fs::Permissions::from_mode(mode)).await;
}

#[cfg(windows)]
async fn copy_permissions(_tmp_path: &Path, _dest: &Path) {}

fn bytes_look_like_modern(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("auths").cloned())
        .is_some()
}

#[derive(Debug, Deserialize)]
struct LegacyJsonEntry {
    auth: String,
    #[serde(default)]
    #[allow(dead_code)]
    email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    #[tokio::test]
    async fn loads_modern_config_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let encoded = STANDARD.encode("alice:hunter2");
        tokio::fs::write(&path, format!(r#"{{"auths":{{"registry.example.com":{{"auth":"{encoded}"}}}}}}"#))
            .await
            .unwrap();

        let store = CredStore::load(&path).await.unwrap();
        let cfg = store.get("registry.example.com").unwrap();
        assert_eq!(cfg.username, "alice");
        assert_eq!(cfg.password, "hunter2");
    }

    #[tokio::test]
    async fn loads_legacy_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let encoded = STANDARD.encode("bob:swordfish");
        tokio::fs::write(&path, format!(r#"{{"registry.example.com":{{"auth":"{encoded}","email":"bob@example.com"}}}}"#))
            .await
            .unwrap();

        let store = CredStore::load(&path).await.unwrap();
        let cfg = store.get("registry.example.com").unwrap();
        assert_eq!(cfg.username, "bob");
        assert_eq!(cfg.password, "swordfish");
    }

    #[tokio::test]
    async fn loads_legacy_plaintext_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dockercfg");
        let encoded = STANDARD.encode("carol:letmein");
        tokio::fs::write(&path, format!("username = {encoded}\nemail = carol@example.com\n")).await.unwrap();

        let store = CredStore::load(&path).await.unwrap();
        let cfg = store.get(DOCKER_INDEX_HOST).unwrap();
        assert_eq!(cfg.username, "carol");
        assert_eq!(cfg.password, "letmein");
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut store = CredStore::default();
        store.set("registry.example.com", AuthConfig { username: "alice".to_string(), password: "hunter2".to_string(), identity_token: None, registry_token: None });
        store.save(&path).await.unwrap();

        let loaded = CredStore::load(&path).await.unwrap();
        let cfg = loaded.get("registry.example.com").unwrap();
        assert_eq!(cfg.username, "alice");
        assert_eq!(cfg.password, "hunter2");
    }

    #[tokio::test]
    async fn save_rejects_username_containing_colon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut store = CredStore::default();
        store.set("registry.example.com", AuthConfig { username: "al:ice".to_string(), password: "x".to_string(), identity_token: None, registry_token: None });
        let err = store.save(&path).await.unwrap_err();
        assert!(matches!(err, CredStoreError::InvalidEntry { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_preserves_existing_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{}").await.unwrap();
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await.unwrap();

        let mut store = CredStore::default();
        store.set("registry.example.com", AuthConfig { username: "alice".to_string(), password: "hunter2".to_string(), identity_token: None, registry_token: None });
        store.save(&path).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_defaults_to_0600_for_a_new_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut store = CredStore::default();
        store.set("registry.example.com", AuthConfig { username: "alice".to_string(), password: "hunter2".to_string(), identity_token: None, registry_token: None });
        store.save(&path).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
