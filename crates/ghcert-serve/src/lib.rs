// ABOUTME: Certificate issuance server: OIDC login in front of the SSH certificate authority
// ABOUTME: Exposes /auth/start, /auth/callback, /auth/dev, /cert/issue and /health

pub mod coordinator;
pub mod error;
pub mod http;
pub mod oidc;
pub mod pages;
pub mod server;
pub mod session;

pub use coordinator::{CallbackParams, Coordinator};
pub use error::{AuthSessionError, ServeError};
pub use http::{routes, ApiResponse, AppState};
pub use oidc::{EntraIdProvider, IdentityProvider, TokenSet};
pub use session::{AuthSession, SessionStore, DEFAULT_SESSION_TTL};

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the issuance server
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// HTTP listen address (default: 127.0.0.1:8080)
    pub listen_addr: String,
    /// Trust policy file. `None` means environment overrides only.
    pub policy_path: Option<PathBuf>,
    /// CA private key in OpenSSH format (default: ~/.config/ghcert/ca_key)
    pub ca_key_path: PathBuf,
    pub ca_passphrase: Option<String>,
    /// Keys allowed to sign the policy, one per line.
    pub trusted_signers_path: Option<PathBuf>,
    /// Accept an unsigned policy. Implied by `dev_mode`.
    pub allow_unsigned_policy: bool,
    /// Enables the mock /auth/dev login. Never set in production.
    pub dev_mode: bool,
    pub session_ttl: Duration,
}

impl Default for ServeConfig {
    fn default() -> Self {
        let ca_key_path = ghcert_ssh::xdg_config_dir()
            .map(|p| p.join("ca_key"))
            .unwrap_or_else(|| PathBuf::from("ca_key"));

        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            policy_path: None,
            ca_key_path,
            ca_passphrase: None,
            trusted_signers_path: None,
            allow_unsigned_policy: false,
            dev_mode: false,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

/// Run the issuance server until Ctrl+C or SIGTERM
pub async fn run(config: ServeConfig) -> Result<()> {
    server::run(config).await
}
