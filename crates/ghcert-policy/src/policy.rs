// ABOUTME: Trust policy shared by the issuance server and the CLI.
// ABOUTME: Loaded from TOML with ${VAR} expansion, then GHCERT_* environment overrides.

use crate::error::{PolicyError, Result};
use crate::integrity::{verify_policy_integrity, IntegrityMode, PolicySignature};
use crate::principal::PrincipalSource;
use serde::{Deserialize, Serialize};
use ssh_key::PublicKey;
use std::path::Path;

/// Host used for the login extension when no enterprise URL is configured.
pub const DEFAULT_TARGET_HOST: &str = "github.com";

/// Default certificate lifetime.
pub const DEFAULT_CERT_VALIDITY_HOURS: u32 = 8;

/// OIDC application registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcSettings {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    /// Only the server needs this; it is never part of the signed payload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
}

/// Everything both sides must agree on before a certificate is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    /// OpenSSH text of the CA public key.
    #[serde(default)]
    pub ca_public_key: String,
    #[serde(default)]
    pub server_base_url: String,
    #[serde(default = "default_validity_hours")]
    pub cert_validity_hours: u32,
    #[serde(default)]
    pub oidc: OidcSettings,
    #[serde(default)]
    pub github_enterprise_url: String,
    #[serde(default)]
    pub allowed_orgs: Vec<String>,
    #[serde(default)]
    pub principal_source: PrincipalSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<PolicySignature>,
}

fn default_validity_hours() -> u32 {
    DEFAULT_CERT_VALIDITY_HOURS
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            ca_public_key: String::new(),
            server_base_url: String::new(),
            cert_validity_hours: DEFAULT_CERT_VALIDITY_HOURS,
            oidc: OidcSettings::default(),
            github_enterprise_url: String::new(),
            allowed_orgs: Vec::new(),
            principal_source: PrincipalSource::default(),
            signature: None,
        }
    }
}

impl TrustPolicy {
    /// Load a policy file (or start empty when `path` is `None`) and apply
    /// `GHCERT_*` overrides from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |var| std::env::var(var).ok())
    }

    /// Same as [`TrustPolicy::load`] with an explicit environment lookup.
    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut policy = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| PolicyError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                Self::from_toml_with(&contents, &env)?
            }
            None => Self::default(),
        };
        policy.apply_env_overrides(&env)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse policy TOML, expanding `${VAR}` references first. References to
    /// unset variables are left as written.
    pub fn from_toml_with(contents: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let expanded = shellexpand::env_with_context_no_errors(contents, |var| env(var));
        Ok(toml::from_str(&expanded)?)
    }

    /// Override individual fields from `GHCERT_*` variables.
    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("GHCERT_CA_PUBLIC_KEY") {
            self.ca_public_key = v;
        }
        if let Some(v) = env("GHCERT_SERVER_BASE_URL") {
            self.server_base_url = v;
        }
        if let Some(v) = env("GHCERT_CERT_VALIDITY_HOURS") {
            self.cert_validity_hours = v.trim().parse().map_err(|e| PolicyError::Env {
                var: "GHCERT_CERT_VALIDITY_HOURS".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Some(v) = env("GHCERT_OIDC_TENANT_ID") {
            self.oidc.tenant_id = v;
        }
        if let Some(v) = env("GHCERT_OIDC_CLIENT_ID") {
            self.oidc.client_id = v;
        }
        if let Some(v) = env("GHCERT_OIDC_CLIENT_SECRET") {
            self.oidc.client_secret = v;
        }
        if let Some(v) = env("GHCERT_GITHUB_ENTERPRISE_URL") {
            self.github_enterprise_url = v;
        }
        if let Some(v) = env("GHCERT_ALLOWED_ORGS") {
            self.allowed_orgs = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = env("GHCERT_PRINCIPAL_SOURCE") {
            self.principal_source = PrincipalSource::from(v);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.cert_validity_hours == 0 {
            return Err(PolicyError::Invalid(
                "cert_validity_hours must be at least 1".into(),
            ));
        }
        if !self.ca_public_key.is_empty() {
            self.ca_key()?;
        }
        Ok(())
    }

    /// Parsed CA public key.
    pub fn ca_key(&self) -> Result<PublicKey> {
        ghcert_ssh::parse_public_key(self.ca_public_key.as_bytes())
            .map_err(|e| PolicyError::Invalid(format!("ca_public_key: {e}")))
    }

    /// Host named in the `login@<host>` extension: the host of
    /// `github_enterprise_url`, or github.com.
    pub fn target_host(&self) -> String {
        let raw = self.github_enterprise_url.trim();
        if raw.is_empty() {
            return DEFAULT_TARGET_HOST.to_string();
        }
        match url::Url::parse(raw) {
            Ok(url) => url
                .host_str()
                .map(str::to_string)
                .unwrap_or_else(|| DEFAULT_TARGET_HOST.to_string()),
            Err(_) => raw.trim_end_matches('/').to_string(),
        }
    }

    /// Verify this policy's own signature.
    pub fn verify(&self, trusted_signers: &[PublicKey], mode: IntegrityMode) -> Result<()> {
        verify_policy_integrity(self, self.signature.as_ref(), trusted_signers, mode)?;
        Ok(())
    }
}
