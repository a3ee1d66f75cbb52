// ABOUTME: Core login flow for the ghcert CLI
// ABOUTME: Verifies the policy, sends the user to the server, collects and installs the certificate

use anyhow::{bail, Context, Result};
use colored::Colorize;
use ghcert_policy::{load_trusted_signers, IntegrityMode, TrustPolicy};
use ghcert_ssh::{CertInfo, CertificateAuthority};
use ssh_key::{Certificate, PublicKey};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

use crate::agent;
use crate::config::ClientConfig;
use crate::loopback::{obtain_certificate, ManualEntry, PollSettings, StatusProbe};

/// Everything a login needs, resolved from config and flags.
#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub key_path: PathBuf,
    pub policy_path: PathBuf,
    pub trusted_signers_path: PathBuf,
    pub server_url: Option<String>,
    pub allow_unsigned_policy: bool,
    pub add_to_agent: bool,
    pub poll: PollSettings,
}

impl LoginOptions {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            key_path: config.key_path()?,
            policy_path: config.policy_path()?,
            trusted_signers_path: config.trusted_signers_path()?,
            server_url: config.server_url.clone(),
            allow_unsigned_policy: config.allow_unsigned_policy,
            add_to_agent: config.add_to_agent,
            poll: PollSettings {
                interval: config.poll_interval(),
                deadline: config.poll_timeout(),
                unavailable_limit: None,
            },
        })
    }

    pub fn cert_path(&self) -> PathBuf {
        ghcert_ssh::cert_path_for(&self.key_path)
    }
}

/// Outcome of a successful login.
#[derive(Debug)]
pub struct LoginReport {
    pub cert_path: PathBuf,
    pub added_to_agent: bool,
    pub info: CertInfo,
}

/// Load the trust policy and check its signature. Fail-closed unless
/// unsigned policies are allowed.
pub fn load_verified_policy(opts: &LoginOptions) -> Result<TrustPolicy> {
    let policy = TrustPolicy::load(Some(opts.policy_path.as_path())).with_context(|| {
        format!("Failed to load trust policy {}", opts.policy_path.display())
    })?;

    let trusted = if opts.trusted_signers_path.exists() {
        load_trusted_signers(&opts.trusted_signers_path)
            .context("Failed to load trusted policy signers")?
    } else {
        Vec::new()
    };
    let mode = if opts.allow_unsigned_policy {
        IntegrityMode::Permissive
    } else {
        IntegrityMode::Strict
    };
    policy
        .verify(&trusted, mode)
        .context("Trust policy failed its integrity check")?;
    Ok(policy)
}

/// `<server>/auth/start?pubkey=<key>`.
pub fn start_url(server: &str, public_key: &PublicKey) -> Result<Url> {
    let base = server.trim().trim_end_matches('/');
    if base.is_empty() {
        bail!("No server configured: set server_base_url in the policy or --server");
    }
    let mut url = Url::parse(&format!("{base}/auth/start"))
        .with_context(|| format!("Invalid server URL {server}"))?;
    let text = public_key
        .to_openssh()
        .context("Failed to encode public key")?;
    url.query_pairs_mut().append_pair("pubkey", &text);
    Ok(url)
}

/// Load `<key>.pub`, generating the key pair first if it does not exist yet.
fn load_public_key(key_path: &Path) -> Result<PublicKey> {
    if !key_path.exists() {
        eprintln!(
            "  No key at {}, generating a new ed25519 key",
            key_path.display()
        );
        ghcert_ssh::generate_key(key_path).context("Failed to generate SSH key")?;
    }
    ghcert_ssh::read_public_key(key_path).context("Failed to read public key")
}

/// Accept `cert` only if it certifies `public_key` and chains to the policy CA.
pub fn check_certificate(
    cert: &Certificate,
    public_key: &PublicKey,
    policy: &TrustPolicy,
) -> Result<()> {
    if cert.public_key() != public_key.key_data() {
        bail!("Received certificate is for a different key");
    }
    let ca = policy
        .ca_key()
        .context("Policy has no usable ca_public_key to verify the certificate")?;
    CertificateAuthority::verify_only(ca)
        .verify(cert)
        .context("Received certificate does not verify against the policy CA")?;
    Ok(())
}

/// Run the login flow.
///
/// Progress goes to stderr so `--json` output on stdout stays clean.
pub async fn run(
    opts: &LoginOptions,
    probe: &dyn StatusProbe,
    cancel: &CancellationToken,
    manual: Option<ManualEntry>,
) -> Result<LoginReport> {
    eprintln!("{}", "ghcert login".bold());
    eprintln!();

    eprintln!(
        "{} Verifying trust policy {}...",
        "[1/4]".dimmed(),
        opts.policy_path.display()
    );
    let policy = load_verified_policy(opts)?;

    eprintln!(
        "{} Loading SSH key from {}...",
        "[2/4]".dimmed(),
        opts.key_path.display()
    );
    let public_key = load_public_key(&opts.key_path)?;
    eprintln!(
        "  Fingerprint: {}",
        ghcert_ssh::compute_fingerprint(&public_key).dimmed()
    );

    let server = opts
        .server_url
        .as_deref()
        .unwrap_or(&policy.server_base_url);
    let url = start_url(server, &public_key)?;

    eprintln!();
    eprintln!("{}", "━".repeat(50).dimmed());
    eprintln!();
    eprintln!("  Open this URL in your browser to sign in:");
    eprintln!();
    eprintln!("  {}", url.as_str().cyan());
    eprintln!();
    eprintln!("{}", "━".repeat(50).dimmed());
    eprintln!();

    let cert_path = opts.cert_path();
    eprintln!("{} Waiting for the certificate...", "[3/4]".dimmed());
    if manual.is_some() {
        eprintln!(
            "  {}",
            "If it does not arrive, paste it here followed by two empty lines.".dimmed()
        );
    }
    let cert = obtain_certificate(probe, &cert_path, &opts.poll, cancel, manual)
        .await
        .context("Did not receive a certificate")?;

    eprintln!("{} Installing certificate...", "[4/4]".dimmed());
    check_certificate(&cert, &public_key, &policy)?;
    ghcert_ssh::write_certificate(&cert_path, &cert).context("Failed to save certificate")?;
    let info = ghcert_ssh::cert_info(&cert);

    let mut added_to_agent = false;
    if opts.add_to_agent && agent::agent_available() {
        match agent::add_to_agent(&opts.key_path, info.time_left.as_secs()).await {
            Ok(()) => added_to_agent = true,
            Err(e) => warn!(error = %format!("{e:#}"), "could not add key to ssh-agent"),
        }
    }

    eprintln!();
    eprintln!("{}", "Certificate installed!".green().bold());
    eprintln!();

    Ok(LoginReport {
        cert_path,
        added_to_agent,
        info,
    })
}
