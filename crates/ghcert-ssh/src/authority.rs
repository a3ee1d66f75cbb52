// ABOUTME: SSH certificate authority that signs user keys for git-host logins.
// ABOUTME: Owns the CA private key, assigns serials and stamps the login@<host> extension.

use crate::error::SigningError;
use crate::fingerprint::compute_fingerprint;
use crate::rsa_sha512::RsaSha512Signer;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::private::KeypairData;
use ssh_key::{Algorithm, Certificate, Fingerprint, HashAlg, PrivateKey, PublicKey};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Default backdating of `valid_after` to absorb clock drift between hosts.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Extension namespace git hosts read the account name from.
pub const LOGIN_EXTENSION_PREFIX: &str = "login@";

/// Tunables for a [`CertificateAuthority`].
#[derive(Debug, Clone)]
pub struct CaOptions {
    /// How far `valid_after` is backdated.
    pub clock_skew: Duration,
    /// Passphrase for an encrypted CA key.
    pub passphrase: Option<String>,
    /// Extensions added to every certificate besides the login extension.
    pub default_extensions: BTreeMap<String, String>,
}

impl Default for CaOptions {
    fn default() -> Self {
        let mut default_extensions = BTreeMap::new();
        default_extensions.insert("permit-pty".to_string(), String::new());
        Self {
            clock_skew: DEFAULT_CLOCK_SKEW,
            passphrase: None,
            default_extensions,
        }
    }
}

/// Issues short-lived user certificates.
///
/// The signing key is loaded once and never handed out, so a shared
/// `Arc<CertificateAuthority>` can sign from any number of tasks at once. The
/// only mutable piece is the serial counter, which is atomic.
pub struct CertificateAuthority {
    signing_key: Option<PrivateKey>,
    // Set for RSA CAs so certificates carry rsa-sha2-512 signatures.
    rsa_signer: Option<RsaSha512Signer>,
    public_key: PublicKey,
    fingerprint: Fingerprint,
    validity: Duration,
    options: CaOptions,
    next_serial: AtomicU64,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("fingerprint", &self.fingerprint.to_string())
            .field("can_sign", &self.signing_key.is_some())
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Build an authority from an OpenSSH-format private key.
    ///
    /// # Errors
    /// `InvalidKeyFormat` if the key text does not parse or cannot be decrypted,
    /// `UnsupportedKeyType` if the CA key is not ed25519, ECDSA or RSA, and
    /// `InvalidValidity` for a zero validity window.
    pub fn new(
        private_key_openssh: &str,
        validity_hours: u32,
        options: CaOptions,
    ) -> Result<Self, SigningError> {
        let mut key = PrivateKey::from_openssh(private_key_openssh)
            .map_err(|e| SigningError::InvalidKeyFormat(e.to_string()))?;

        if key.is_encrypted() {
            let passphrase = options.passphrase.as_deref().ok_or_else(|| {
                SigningError::InvalidKeyFormat("key is encrypted and no passphrase was given".into())
            })?;
            key = key
                .decrypt(passphrase)
                .map_err(|e| SigningError::InvalidKeyFormat(e.to_string()))?;
        }

        if !is_supported_ca_algorithm(&key.algorithm()) {
            return Err(SigningError::UnsupportedKeyType(
                key.algorithm().as_str().to_string(),
            ));
        }

        if validity_hours == 0 {
            return Err(SigningError::InvalidValidity);
        }

        let rsa_signer = match key.key_data() {
            KeypairData::Rsa(keypair) => Some(RsaSha512Signer::new(keypair)?),
            _ => None,
        };

        let public_key = key.public_key().clone();
        let mut authority = Self::build(Some(key), public_key, validity_hours, options);
        authority.rsa_signer = rsa_signer;
        info!(
            fingerprint = %authority.fingerprint,
            validity_hours,
            "certificate authority loaded"
        );
        Ok(authority)
    }

    /// Load the CA private key from a file.
    pub fn load(
        key_path: &Path,
        validity_hours: u32,
        options: CaOptions,
    ) -> Result<Self, SigningError> {
        let key_data = std::fs::read_to_string(key_path).map_err(|e| SigningError::ReadKey {
            path: key_path.to_path_buf(),
            source: e,
        })?;
        Self::new(&key_data, validity_hours, options)
    }

    /// An authority that can only verify certificates against `ca_public_key`.
    ///
    /// Clients hold the CA public key from the trust policy but never the
    /// private key; signing through this authority fails with `NoSigningKey`.
    pub fn verify_only(ca_public_key: PublicKey) -> Self {
        Self::build(None, ca_public_key, 1, CaOptions::default())
    }

    fn build(
        signing_key: Option<PrivateKey>,
        public_key: PublicKey,
        validity_hours: u32,
        options: CaOptions,
    ) -> Self {
        let fingerprint = public_key.fingerprint(HashAlg::Sha256);
        Self {
            signing_key,
            rsa_signer: None,
            public_key,
            fingerprint,
            validity: Duration::from_secs(u64::from(validity_hours) * 3600),
            options,
            next_serial: AtomicU64::new(initial_serial()),
        }
    }

    /// The CA public key, e.g. for `cert-authority` lines on the git host.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// SHA256 fingerprint of the CA public key.
    pub fn fingerprint(&self) -> String {
        self.fingerprint.to_string()
    }

    /// Validity window applied to new certificates.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Sign `public_key` as a user certificate for `principal` on `target_host`.
    ///
    /// The certificate carries exactly one principal and the extension
    /// `login@<target_host> = <principal>`, which is how GitHub and GitLab map a
    /// certificate to an account instead of looking up a registered key.
    ///
    /// # Errors
    /// `EmptyPrincipal`, `EmptyHost`, `DisallowedKeyType` for keys outside the
    /// allow-list, `NoSigningKey` on a verify-only authority, `Sign` if the
    /// underlying signature fails.
    pub fn sign_public_key_for_github(
        &self,
        public_key: &PublicKey,
        key_id: &str,
        principal: &str,
        target_host: &str,
    ) -> Result<Certificate, SigningError> {
        if principal.is_empty() {
            return Err(SigningError::EmptyPrincipal);
        }
        if target_host.is_empty() {
            return Err(SigningError::EmptyHost);
        }
        if !is_allowed_user_algorithm(&public_key.algorithm()) {
            return Err(SigningError::DisallowedKeyType(
                public_key.algorithm().as_str().to_string(),
            ));
        }
        let signing_key = self.signing_key.as_ref().ok_or(SigningError::NoSigningKey)?;

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let now = unix_now();
        let valid_after = now.saturating_sub(self.options.clock_skew.as_secs());
        let valid_before = now + self.validity.as_secs();

        let mut builder = Builder::new_with_random_nonce(
            &mut rand::thread_rng(),
            public_key.key_data().clone(),
            valid_after,
            valid_before,
        )
        .map_err(SigningError::Sign)?;
        builder.serial(serial).map_err(SigningError::Sign)?;
        builder.cert_type(CertType::User).map_err(SigningError::Sign)?;
        builder.key_id(key_id).map_err(SigningError::Sign)?;
        builder.valid_principal(principal).map_err(SigningError::Sign)?;
        for (name, value) in &self.options.default_extensions {
            builder
                .extension(name.as_str(), value.as_str())
                .map_err(SigningError::Sign)?;
        }
        builder
            .extension(format!("{LOGIN_EXTENSION_PREFIX}{target_host}"), principal)
            .map_err(SigningError::Sign)?;
        builder
            .comment(public_key.comment())
            .map_err(SigningError::Sign)?;

        let cert = match &self.rsa_signer {
            Some(rsa) => builder.sign(rsa),
            None => builder.sign(signing_key),
        }
        .map_err(SigningError::Sign)?;

        debug!(
            serial,
            principal,
            target_host,
            key = %compute_fingerprint(public_key),
            "issued certificate"
        );
        Ok(cert)
    }

    /// Check that `cert` was signed by this CA and is currently valid.
    pub fn verify(&self, cert: &Certificate) -> Result<(), SigningError> {
        cert.validate_at(unix_now(), [&self.fingerprint])
            .map_err(SigningError::Verify)
    }
}

/// Key types the CA may hold.
fn is_supported_ca_algorithm(algorithm: &Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::Ed25519 | Algorithm::Ecdsa { .. } | Algorithm::Rsa { .. }
    )
}

/// Key types users may get certified. DSA and unknown algorithms are refused.
fn is_allowed_user_algorithm(algorithm: &Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::Ed25519 | Algorithm::Ecdsa { .. } | Algorithm::Rsa { .. }
    )
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serials start at `unix_secs << 20` so they keep increasing across restarts
/// without persisting the counter (up to ~1M certificates per second of uptime).
fn initial_serial() -> u64 {
    unix_now() << 20
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{cert_info, marshal_certificate, parse_certificate};
    use ssh_key::LineEnding;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn generate(algorithm: Algorithm) -> PrivateKey {
        PrivateKey::random(&mut rand::thread_rng(), algorithm).expect("should generate key")
    }

    fn test_ca() -> CertificateAuthority {
        let ca_key = generate(Algorithm::Ed25519);
        let pem = ca_key.to_openssh(LineEnding::LF).unwrap();
        CertificateAuthority::new(&pem, 8, CaOptions::default()).expect("should load CA")
    }

    #[test]
    fn test_sign_sets_principal_and_login_extension() {
        let ca = test_ca();
        let user = generate(Algorithm::Ed25519);

        let cert = ca
            .sign_public_key_for_github(user.public_key(), "shawn:shawn@schwartz.so", "shawn", "github.com")
            .expect("should sign");

        assert_eq!(cert.valid_principals(), ["shawn".to_string()]);
        assert_eq!(cert.key_id(), "shawn:shawn@schwartz.so");
        assert_eq!(cert.cert_type(), CertType::User);
        assert_eq!(
            cert.extensions().get("login@github.com").map(String::as_str),
            Some("shawn")
        );
        assert!(cert.extensions().contains_key("permit-pty"));
        assert_eq!(cert.public_key(), user.public_key().key_data());
    }

    #[test]
    fn test_sign_validity_window() {
        let ca = test_ca();
        let user = generate(Algorithm::Ed25519);
        let before = unix_now();

        let cert = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.example.com")
            .unwrap();

        let after = unix_now();
        assert!(cert.valid_before() > cert.valid_after());
        let skew = DEFAULT_CLOCK_SKEW.as_secs();
        assert!(cert.valid_after() >= before - skew);
        assert!(cert.valid_after() <= after - skew);
        assert!(cert.valid_before() >= before + 8 * 3600);
        assert!(cert.valid_before() <= after + 8 * 3600);
        assert!(!cert_info(&cert).is_expired);
    }

    #[test]
    fn test_sign_rejects_empty_principal() {
        let ca = test_ca();
        let user = generate(Algorithm::Ed25519);
        let result = ca.sign_public_key_for_github(user.public_key(), "id", "", "github.com");
        assert!(matches!(result, Err(SigningError::EmptyPrincipal)));
    }

    #[test]
    fn test_sign_rejects_empty_host() {
        let ca = test_ca();
        let user = generate(Algorithm::Ed25519);
        let result = ca.sign_public_key_for_github(user.public_key(), "id", "alice", "");
        assert!(matches!(result, Err(SigningError::EmptyHost)));
    }

    #[test]
    fn test_verify_only_cannot_sign() {
        let ca = test_ca();
        let verifier = CertificateAuthority::verify_only(ca.public_key().clone());
        let user = generate(Algorithm::Ed25519);
        let result = verifier.sign_public_key_for_github(user.public_key(), "id", "alice", "github.com");
        assert!(matches!(result, Err(SigningError::NoSigningKey)));
    }

    #[test]
    fn test_verify_only_accepts_certificates_from_its_ca() {
        let ca = test_ca();
        let verifier = CertificateAuthority::verify_only(ca.public_key().clone());
        let user = generate(Algorithm::Ed25519);
        let cert = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.com")
            .unwrap();

        verifier.verify(&cert).expect("should verify");

        let other = test_ca();
        let stranger = CertificateAuthority::verify_only(other.public_key().clone());
        assert!(matches!(stranger.verify(&cert), Err(SigningError::Verify(_))));
    }

    #[test]
    fn test_ecdsa_user_key_is_allowed() {
        let ca = test_ca();
        let user = generate(Algorithm::Ecdsa {
            curve: ssh_key::EcdsaCurve::NistP256,
        });
        let cert = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.com")
            .expect("p256 keys are on the allow-list");
        ca.verify(&cert).unwrap();
    }

    #[test]
    fn test_ecdsa_ca_key_signs() {
        let ca_key = generate(Algorithm::Ecdsa {
            curve: ssh_key::EcdsaCurve::NistP256,
        });
        let ca = CertificateAuthority::new(
            &ca_key.to_openssh(LineEnding::LF).unwrap(),
            1,
            CaOptions::default(),
        )
        .unwrap();
        let user = generate(Algorithm::Ed25519);
        let cert = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.com")
            .unwrap();
        ca.verify(&cert).unwrap();
    }

    #[test]
    fn test_rsa_ca_signs_with_sha512() {
        let ca_key = generate(Algorithm::Rsa { hash: None });
        let ca = CertificateAuthority::new(
            &ca_key.to_openssh(LineEnding::LF).unwrap(),
            1,
            CaOptions::default(),
        )
        .expect("RSA CA keys are supported");
        let user = generate(Algorithm::Ed25519);

        let cert = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.com")
            .expect("RSA CA should sign");

        assert_eq!(
            cert.signature().algorithm(),
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512)
            }
        );
        assert_eq!(cert.signature_key(), ca_key.public_key().key_data());
        ca.verify(&cert).unwrap();
    }

    #[test]
    fn test_new_rejects_garbage_key() {
        let result = CertificateAuthority::new("not a key", 8, CaOptions::default());
        assert!(matches!(result, Err(SigningError::InvalidKeyFormat(_))));
    }

    #[test]
    fn test_new_rejects_zero_validity() {
        let ca_key = generate(Algorithm::Ed25519);
        let pem = ca_key.to_openssh(LineEnding::LF).unwrap();
        let result = CertificateAuthority::new(&pem, 0, CaOptions::default());
        assert!(matches!(result, Err(SigningError::InvalidValidity)));
    }

    #[test]
    fn test_new_encrypted_key_requires_passphrase() {
        let ca_key = generate(Algorithm::Ed25519);
        let encrypted = ca_key
            .encrypt(&mut rand::thread_rng(), "hunter2")
            .expect("should encrypt");
        let pem = encrypted.to_openssh(LineEnding::LF).unwrap();

        let missing = CertificateAuthority::new(&pem, 8, CaOptions::default());
        assert!(matches!(missing, Err(SigningError::InvalidKeyFormat(_))));

        let options = CaOptions {
            passphrase: Some("hunter2".to_string()),
            ..CaOptions::default()
        };
        let ca = CertificateAuthority::new(&pem, 8, options).expect("should decrypt");
        assert_eq!(ca.public_key().key_data(), ca_key.public_key().key_data());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = CertificateAuthority::load(&dir.path().join("ca"), 8, CaOptions::default());
        assert!(matches!(result, Err(SigningError::ReadKey { .. })));
    }

    #[test]
    fn test_serials_are_unique_across_threads() {
        let ca = Arc::new(test_ca());
        let user = generate(Algorithm::Ed25519);
        let public_key = user.public_key().clone();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ca = Arc::clone(&ca);
                let public_key = public_key.clone();
                std::thread::spawn(move || {
                    (0..16)
                        .map(|_| {
                            ca.sign_public_key_for_github(&public_key, "id", "alice", "github.com")
                                .unwrap()
                                .serial()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for serial in handle.join().unwrap() {
                assert!(seen.insert(serial), "duplicate serial {serial}");
            }
        }
        assert_eq!(seen.len(), 128);
    }

    #[test]
    fn test_serials_increase() {
        let ca = test_ca();
        let user = generate(Algorithm::Ed25519);
        let first = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.com")
            .unwrap();
        let second = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.com")
            .unwrap();
        assert!(second.serial() > first.serial());
    }

    #[test]
    fn test_issued_certificate_round_trips() {
        let ca = test_ca();
        let user = generate(Algorithm::Ed25519);
        let cert = ca
            .sign_public_key_for_github(user.public_key(), "id", "alice", "github.com")
            .unwrap();

        let text = marshal_certificate(&cert).unwrap();
        let parsed = parse_certificate(text.as_bytes()).unwrap();

        assert_eq!(parsed.serial(), cert.serial());
        assert_eq!(parsed.key_id(), cert.key_id());
        assert_eq!(parsed.valid_principals(), cert.valid_principals());
        assert_eq!(parsed.valid_after(), cert.valid_after());
        assert_eq!(parsed.valid_before(), cert.valid_before());
        assert_eq!(parsed.extensions(), cert.extensions());
        ca.verify(&parsed).unwrap();
    }
}
