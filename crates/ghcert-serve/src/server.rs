// ABOUTME: Issuance server setup and lifecycle
// ABOUTME: Loads and verifies the policy, loads the CA key, serves HTTP until shutdown

use crate::coordinator::Coordinator;
use crate::error::ServeError;
use crate::http::{routes, AppState};
use crate::oidc::{EntraIdProvider, IdentityProvider};
use crate::session::{SessionStore, SWEEP_INTERVAL};
use crate::ServeConfig;
use anyhow::{Context, Result};
use ghcert_policy::{load_trusted_signers, IntegrityMode, TrustPolicy};
use ghcert_ssh::{CaOptions, CertificateAuthority};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run the issuance server
pub async fn run(config: ServeConfig) -> Result<()> {
    info!("Starting ghcert issuance server");
    info!("  listen address: {}", config.listen_addr);
    info!("  CA key: {}", config.ca_key_path.display());
    if config.dev_mode {
        warn!("development mode is ON: /auth/dev issues certificates without login");
    }

    let state = Arc::new(build_state(&config)?);
    let shutdown = CancellationToken::new();
    let sweeper = state
        .coordinator
        .sessions()
        .spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());
    let app = routes(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("ghcert issuance server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "session sweeper ended abnormally");
    }
    info!("Server shut down gracefully");
    Ok(())
}

/// Load the policy and CA key and wire up the request state.
///
/// Development mode never talks to the identity provider, so it starts from a
/// policy that carries no OIDC settings.
pub fn build_state(config: &ServeConfig) -> Result<AppState> {
    let policy = load_policy(config).context("loading trust policy")?;
    let authority =
        Arc::new(load_authority(config, &policy).context("loading certificate authority")?);
    let sessions = Arc::new(SessionStore::new(config.session_ttl));

    let coordinator = if config.dev_mode {
        info!("identity provider disabled in development mode");
        Coordinator::without_provider(sessions, authority, &policy)
    } else {
        let provider: Arc<dyn IdentityProvider> = Arc::new(
            EntraIdProvider::new(&policy.oidc, callback_url(&policy)?)
                .context("configuring identity provider")?,
        );
        Coordinator::new(sessions, provider, authority, &policy)
    };

    Ok(AppState {
        coordinator,
        dev_mode: config.dev_mode,
    })
}

/// Policy integrity is fail-closed unless unsigned policies are explicitly allowed.
pub fn integrity_mode(config: &ServeConfig) -> IntegrityMode {
    if config.dev_mode || config.allow_unsigned_policy {
        IntegrityMode::Permissive
    } else {
        IntegrityMode::Strict
    }
}

/// Load the policy and verify its signature.
pub fn load_policy(config: &ServeConfig) -> Result<TrustPolicy, ServeError> {
    let policy = TrustPolicy::load(config.policy_path.as_deref())?;
    let trusted = match &config.trusted_signers_path {
        Some(path) => load_trusted_signers(path)?,
        None => Vec::new(),
    };
    policy.verify(&trusted, integrity_mode(config))?;
    Ok(policy)
}

/// Load the CA key and check it is the one the policy names.
pub fn load_authority(
    config: &ServeConfig,
    policy: &TrustPolicy,
) -> Result<CertificateAuthority, ServeError> {
    let options = CaOptions {
        passphrase: config.ca_passphrase.clone(),
        ..CaOptions::default()
    };
    let authority =
        CertificateAuthority::load(&config.ca_key_path, policy.cert_validity_hours, options)?;

    if policy.ca_public_key.is_empty() {
        warn!("policy does not name a CA key; clients cannot verify issued certificates");
    } else {
        let expected = policy.ca_key()?;
        if expected.key_data() != authority.public_key().key_data() {
            return Err(ServeError::CaMismatch {
                expected: ghcert_ssh::compute_fingerprint(&expected),
                actual: authority.fingerprint(),
            });
        }
    }
    Ok(authority)
}

fn callback_url(policy: &TrustPolicy) -> Result<String, ServeError> {
    let base = policy.server_base_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(ServeError::Config("server_base_url is required".into()));
    }
    Ok(format!("{base}/auth/callback"))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghcert_policy::{sign_policy, PolicyError, PolicyIntegrityError};
    use ssh_key::{Algorithm, LineEnding, PrivateKey};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        ca: PrivateKey,
        signer: PrivateKey,
    }

    impl Fixture {
        fn new() -> Self {
            let mut rng = rand::thread_rng();
            let fixture = Self {
                dir: TempDir::new().unwrap(),
                ca: PrivateKey::random(&mut rng, Algorithm::Ed25519).unwrap(),
                signer: PrivateKey::random(&mut rng, Algorithm::Ed25519).unwrap(),
            };
            std::fs::write(
                fixture.dir.path().join("ca_key"),
                fixture.ca.to_openssh(LineEnding::LF).unwrap().as_bytes(),
            )
            .unwrap();
            std::fs::write(
                fixture.dir.path().join("signers"),
                fixture.signer.public_key().to_openssh().unwrap(),
            )
            .unwrap();
            fixture
        }

        fn policy(&self) -> TrustPolicy {
            TrustPolicy {
                ca_public_key: self.ca.public_key().to_openssh().unwrap(),
                server_base_url: "https://ghcert.example.com/".into(),
                ..TrustPolicy::default()
            }
        }

        fn write_policy(&self, policy: &TrustPolicy, signed: bool) {
            let mut policy = policy.clone();
            if signed {
                policy.signature = Some(sign_policy(&policy, &self.signer).unwrap());
            }
            let text = toml::to_string(&policy).unwrap();
            std::fs::write(self.dir.path().join("policy.toml"), text).unwrap();
        }

        fn config(&self) -> ServeConfig {
            ServeConfig {
                policy_path: Some(self.dir.path().join("policy.toml")),
                ca_key_path: self.dir.path().join("ca_key"),
                trusted_signers_path: Some(self.dir.path().join("signers")),
                ..ServeConfig::default()
            }
        }
    }

    #[test]
    fn test_integrity_mode() {
        let mut config = ServeConfig::default();
        assert_eq!(integrity_mode(&config), IntegrityMode::Strict);
        config.dev_mode = true;
        assert_eq!(integrity_mode(&config), IntegrityMode::Permissive);
        config.dev_mode = false;
        config.allow_unsigned_policy = true;
        assert_eq!(integrity_mode(&config), IntegrityMode::Permissive);
    }

    #[test]
    fn test_signed_policy_loads() {
        let fx = Fixture::new();
        fx.write_policy(&fx.policy(), true);

        let policy = load_policy(&fx.config()).unwrap();
        let authority = load_authority(&fx.config(), &policy).unwrap();
        assert_eq!(
            authority.public_key().key_data(),
            fx.ca.public_key().key_data()
        );
        assert_eq!(
            callback_url(&policy).unwrap(),
            "https://ghcert.example.com/auth/callback"
        );
    }

    #[test]
    fn test_unsigned_policy_rejected_by_default() {
        let fx = Fixture::new();
        fx.write_policy(&fx.policy(), false);

        let err = load_policy(&fx.config()).unwrap_err();
        assert!(matches!(
            err,
            ServeError::Policy(PolicyError::Integrity(PolicyIntegrityError::MissingSignature))
        ));

        let mut config = fx.config();
        config.allow_unsigned_policy = true;
        load_policy(&config).expect("explicitly allowed");
    }

    #[test]
    fn test_ca_mismatch() {
        let fx = Fixture::new();
        let other = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let policy = TrustPolicy {
            ca_public_key: other.public_key().to_openssh().unwrap(),
            ..fx.policy()
        };

        let err = load_authority(&fx.config(), &policy).unwrap_err();
        assert!(matches!(err, ServeError::CaMismatch { .. }));
    }

    #[test]
    fn test_dev_mode_starts_without_oidc_settings() {
        let fx = Fixture::new();
        std::fs::write(
            fx.dir.path().join("policy.toml"),
            format!(
                "ca_public_key = \"{}\"\n",
                fx.ca.public_key().to_openssh().unwrap()
            ),
        )
        .unwrap();

        let mut config = fx.config();
        config.dev_mode = true;
        let state = build_state(&config).expect("dev mode needs only the CA");
        assert!(state.dev_mode);

        config.dev_mode = false;
        config.allow_unsigned_policy = true;
        let err = build_state(&config).err().expect("login mode needs OIDC settings");
        assert!(format!("{err:#}").contains("server_base_url"));
    }

    #[test]
    fn test_missing_base_url() {
        assert!(matches!(
            callback_url(&TrustPolicy::default()),
            Err(ServeError::Config(_))
        ));
    }
}
