// ABOUTME: Inspects the installed certificate for `ghcert --status`.
// ABOUTME: Checks it still chains to the CA named by the verified trust policy.

use crate::login::{load_verified_policy, LoginOptions};
use anyhow::{Context, Result};
use ghcert_ssh::CertInfo;
use ssh_key::{HashAlg, PublicKey};
use std::path::Path;

/// Describe the certificate for `opts`, checked against the trust policy's CA.
///
/// The policy passes the same integrity check as a login before its CA key is
/// read; a tampered or untrusted policy is an error, not a silent skip.
pub fn check(opts: &LoginOptions) -> Result<CertInfo> {
    let policy = load_verified_policy(opts)?;
    let ca = policy
        .ca_key()
        .context("Trust policy does not name a usable CA key")?;
    inspect(&opts.cert_path(), Some(&ca))
}

/// Read and describe the certificate at `cert_path`.
///
/// With `ca` the certificate must also be signed by that CA; a foreign
/// certificate is an error rather than a report.
pub fn inspect(cert_path: &Path, ca: Option<&PublicKey>) -> Result<CertInfo> {
    let cert = ghcert_ssh::read_certificate(cert_path)
        .with_context(|| format!("No usable certificate at {}", cert_path.display()))?;

    if let Some(ca) = ca {
        let signer = cert.signature_key();
        if signer != ca.key_data() {
            anyhow::bail!(
                "Certificate at {} was signed by {}, not the configured CA {}",
                cert_path.display(),
                ghcert_ssh::key_data_fingerprint(signer),
                ghcert_ssh::compute_fingerprint(ca)
            );
        }
        // Checked at valid_after so an expired certificate still has its signature verified.
        let fingerprint = ca.fingerprint(HashAlg::Sha256);
        cert.validate_at(cert.valid_after(), [&fingerprint])
            .context("Certificate does not verify against the configured CA")?;
    }

    Ok(ghcert_ssh::cert_info(&cert))
}
