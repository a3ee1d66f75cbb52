// ABOUTME: Entry point for the ghcert issuance server binary.
// ABOUTME: Reads flags and GHCERT_* environment (plus .env), then runs the server.

use anyhow::Result;
use clap::Parser;
use ghcert_serve::{ServeConfig, DEFAULT_SESSION_TTL};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ghcert-serve")]
#[command(about = "OIDC-gated SSH certificate issuance server")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "GHCERT_LISTEN", default_value = "127.0.0.1:8080")]
    listen: String,

    /// Trust policy file
    #[arg(long, env = "GHCERT_POLICY")]
    policy: Option<PathBuf>,

    /// CA private key (defaults to ~/.config/ghcert/ca_key)
    #[arg(long, env = "GHCERT_CA_KEY")]
    ca_key: Option<PathBuf>,

    /// Passphrase for an encrypted CA key
    #[arg(long, env = "GHCERT_CA_PASSPHRASE", hide_env_values = true)]
    ca_passphrase: Option<String>,

    /// File of public keys trusted to sign the policy
    #[arg(long, env = "GHCERT_TRUSTED_SIGNERS")]
    trusted_signers: Option<PathBuf>,

    /// Accept a policy without a signature
    #[arg(long, env = "GHCERT_ALLOW_UNSIGNED_POLICY")]
    allow_unsigned_policy: bool,

    /// Enable the mock /auth/dev login (never in production)
    #[arg(long, env = "GHCERT_DEV_MODE")]
    dev_mode: bool,

    /// Seconds a login may take before its session expires
    #[arg(long, env = "GHCERT_SESSION_TTL_SECS", default_value_t = DEFAULT_SESSION_TTL.as_secs())]
    session_ttl_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    ghcert_log::init();

    let defaults = ServeConfig::default();
    let config = ServeConfig {
        listen_addr: args.listen,
        policy_path: args.policy,
        ca_key_path: args.ca_key.unwrap_or(defaults.ca_key_path),
        ca_passphrase: args.ca_passphrase,
        trusted_signers_path: args.trusted_signers,
        allow_unsigned_policy: args.allow_unsigned_policy,
        dev_mode: args.dev_mode,
        session_ttl: Duration::from_secs(args.session_ttl_secs),
    };

    ghcert_serve::run(config).await
}
