// ABOUTME: `ghcert policy sign`: signs a trust policy with an ed25519 key.
// ABOUTME: Prints the [signature] table to append to the policy file.

use anyhow::{Context, Result};
use ghcert_policy::{sign_policy, PolicySignature, TrustPolicy};
use std::path::Path;

/// Sign the policy at `policy_path` as this process would load it.
pub fn sign_policy_file(key_path: &Path, policy_path: &Path) -> Result<PolicySignature> {
    let key = ghcert_ssh::load_key(key_path).context("Failed to load signing key")?;
    if key.is_encrypted() {
        anyhow::bail!(
            "Signing key {} is encrypted; decrypt a copy with ssh-keygen -p first",
            key_path.display()
        );
    }
    // Sign the file as written; GHCERT_* overrides belong to the loader, not the signer.
    let policy =
        TrustPolicy::load_with(Some(policy_path), |_| None).context("Failed to load policy")?;
    sign_policy(&policy, &key).context("Failed to sign policy")
}
