// ABOUTME: Client configuration for the ghcert CLI
// ABOUTME: ~/.config/ghcert/config.toml, every field optional; command-line flags win

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ghcert client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Issuance server; overrides the policy's server_base_url
    pub server_url: Option<String>,

    /// Trust policy (defaults to ~/.config/ghcert/policy.toml)
    pub policy_path: Option<PathBuf>,

    /// Keys trusted to sign the policy (defaults to ~/.config/ghcert/trusted_signers)
    pub trusted_signers_path: Option<PathBuf>,

    /// Key to certify (defaults to ~/.config/ghcert/id_ed25519)
    pub key_path: Option<PathBuf>,

    /// Accept a policy with no signature
    pub allow_unsigned_policy: bool,

    /// Run ssh-add after a certificate is installed
    pub add_to_agent: bool,

    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            policy_path: None,
            trusted_signers_path: None,
            key_path: None,
            allow_unsigned_policy: false,
            add_to_agent: true,
            poll_interval_secs: 2,
            poll_timeout_secs: 300,
        }
    }
}

impl ClientConfig {
    /// Returns the config directory path (~/.config/ghcert)
    pub fn config_dir() -> Result<PathBuf> {
        ghcert_ssh::xdg_config_dir().context("Could not determine home directory")
    }

    /// Returns the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Loads the config file, or defaults when there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Saves the configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn policy_path(&self) -> Result<PathBuf> {
        match &self.policy_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("policy.toml")),
        }
    }

    pub fn trusted_signers_path(&self) -> Result<PathBuf> {
        match &self.trusted_signers_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("trusted_signers")),
        }
    }

    pub fn key_path(&self) -> Result<PathBuf> {
        match &self.key_path {
            Some(path) => Ok(path.clone()),
            None => ghcert_ssh::default_key_path().context("Could not determine home directory"),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.poll_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "server_url = \"https://ghcert.example.com\"\nadd_to_agent = false\n",
        )
        .unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(
            config.server_url.as_deref(),
            Some("https://ghcert.example.com")
        );
        assert!(!config.add_to_agent);
        assert_eq!(config.poll_timeout_secs, 300);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ClientConfig {
            key_path: Some(PathBuf::from("/tmp/k")),
            allow_unsigned_policy: true,
            ..ClientConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(ClientConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = ClientConfig {
            policy_path: Some(PathBuf::from("/etc/ghcert/policy.toml")),
            key_path: Some(PathBuf::from("/keys/id")),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.policy_path().unwrap(),
            PathBuf::from("/etc/ghcert/policy.toml")
        );
        assert_eq!(config.key_path().unwrap(), PathBuf::from("/keys/id"));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = ClientConfig {
            poll_interval_secs: 0,
            ..ClientConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_timeout_secs = \"soon\"").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());
    }
}
