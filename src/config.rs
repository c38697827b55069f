//! Configuration for fetch operations and registry credentials

use crate::error::{FetchError, IoResultExt, Result};
use crate::mirror::default_mirrors;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_ISO_PATH: &str = "/var/lib/vz/template/iso";
pub const DEFAULT_CACHE_PATH: &str = "/var/lib/vz/template/cache";
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 8 * 1024 * 1024;

/// Registry credentials; both fields unset means anonymous pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Explicit `GHCR_USERNAME`/`GHCR_PASSWORD`, else `GITHUB_ACTOR`/`GITHUB_TOKEN`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            username: get("GHCR_USERNAME").or_else(|| get("GITHUB_ACTOR")),
            password: get("GHCR_PASSWORD").or_else(|| get("GITHUB_TOKEN")),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Preferred registry mirror hosts, in order
    pub mirrors: Vec<String>,
    /// Directory for finished images and their `.syn` partials
    pub iso_path: PathBuf,
    /// Directory for checkpoint files
    pub cache_path: PathBuf,
    pub status_path: Option<PathBuf>,
    pub resume: bool,
    /// Talk to registries over http:// instead of https://
    pub plain_http: bool,
    pub skip_tls: bool,
    pub connect_timeout_secs: u64,
    /// Overall deadline for one fetch, enforced by cancellation
    pub deadline_secs: Option<u64>,
    pub checkpoint_interval_bytes: u64,
    pub verify_digest: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mirrors: default_mirrors(),
            iso_path: PathBuf::from(DEFAULT_ISO_PATH),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            status_path: None,
            resume: true,
            plain_http: false,
            skip_tls: false,
            connect_timeout_secs: 30,
            deadline_secs: None,
            checkpoint_interval_bytes: DEFAULT_CHECKPOINT_INTERVAL,
            verify_digest: false,
        }
    }
}

impl FetchConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).fs_context("read config", path)?;
        serde_json::from_slice(&data).map_err(|e| {
            FetchError::Configuration(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    /// Override fields from `VMFETCH_*` environment variables
    pub fn from_env(self) -> Self {
        self.apply_lookup(|key| env::var(key).ok())
    }

    pub fn apply_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(mirrors) = lookup("VMFETCH_MIRRORS") {
            self.mirrors = mirrors
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(path) = lookup("VMFETCH_ISO_PATH").filter(|p| !p.trim().is_empty()) {
            self.iso_path = PathBuf::from(path.trim());
        }
        if let Some(path) = lookup("VMFETCH_CACHE_PATH").filter(|p| !p.trim().is_empty()) {
            self.cache_path = PathBuf::from(path.trim());
        }
        if let Some(flag) = lookup("VMFETCH_PLAIN_HTTP") {
            self.plain_http = matches!(flag.trim(), "1" | "true" | "yes");
        }
        self
    }

    pub fn status_path_or(&self, default_name: &str) -> PathBuf {
        self.status_path
            .clone()
            .unwrap_or_else(|| self.cache_path.join(default_name))
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval_bytes == 0 {
            return Err(FetchError::Configuration(
                "checkpoint_interval_bytes must be greater than 0".to_string(),
            ));
        }
        if self.deadline_secs == Some(0) {
            return Err(FetchError::Configuration(
                "deadline must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_credentials_prefer_explicit_pair() {
        let auth = AuthConfig::from_lookup(lookup(&[
            ("GHCR_USERNAME", "alice"),
            ("GHCR_PASSWORD", "secret"),
            ("GITHUB_ACTOR", "ci-bot"),
            ("GITHUB_TOKEN", "ghs_token"),
        ]));
        assert_eq!(auth, AuthConfig::new(Some("alice".into()), Some("secret".into())));
    }

    #[test]
    fn test_credentials_fall_back_to_ci_pair() {
        let auth = AuthConfig::from_lookup(lookup(&[
            ("GHCR_USERNAME", "   "),
            ("GITHUB_ACTOR", "ci-bot"),
            ("GITHUB_TOKEN", "ghs_token"),
        ]));
        assert_eq!(auth, AuthConfig::new(Some("ci-bot".into()), Some("ghs_token".into())));
        assert!(auth.has_credentials());
    }

    #[test]
    fn test_credentials_absent_means_anonymous() {
        let auth = AuthConfig::from_lookup(lookup(&[]));
        assert_eq!(auth, AuthConfig::anonymous());
        assert!(!auth.has_credentials());
    }

    #[test]
    fn test_env_overrides() {
        let config = FetchConfig::default().apply_lookup(lookup(&[
            ("VMFETCH_MIRRORS", "a.example, ,b.example"),
            ("VMFETCH_ISO_PATH", "/data/iso"),
            ("VMFETCH_PLAIN_HTTP", "true"),
        ]));
        assert_eq!(config.mirrors, vec!["a.example".to_string(), "b.example".to_string()]);
        assert_eq!(config.iso_path, PathBuf::from("/data/iso"));
        assert!(config.plain_http);
        assert_eq!(
            config.status_path_or("download.ops"),
            PathBuf::from(DEFAULT_CACHE_PATH).join("download.ops")
        );
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch.json");
        std::fs::write(&path, r#"{"mirrors": [], "resume": false}"#).unwrap();

        let config = FetchConfig::from_file(&path).unwrap();
        assert!(config.mirrors.is_empty());
        assert!(!config.resume);
        assert_eq!(config.checkpoint_interval_bytes, DEFAULT_CHECKPOINT_INTERVAL);

        std::fs::write(&path, "nope").unwrap();
        assert!(matches!(
            FetchConfig::from_file(&path),
            Err(FetchError::Configuration(_))
        ));
    }
}
