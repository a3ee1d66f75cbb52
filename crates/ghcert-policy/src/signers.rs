// ABOUTME: Loads the set of keys trusted to sign policies.
// ABOUTME: One OpenSSH public key per line, authorized_keys style.

use crate::error::{PolicyError, Result};
use ssh_key::PublicKey;
use std::path::Path;

/// Parse a trusted-signers list. Blank lines and `#` comments are skipped.
pub fn parse_trusted_signers(contents: &str) -> Result<Vec<PublicKey>> {
    contents
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(lineno, line)| {
            ghcert_ssh::parse_public_key(line.as_bytes())
                .map_err(|e| PolicyError::Invalid(format!("trusted signer on line {lineno}: {e}")))
        })
        .collect()
}

/// Read and parse a trusted-signers file.
pub fn load_trusted_signers(path: &Path) -> Result<Vec<PublicKey>> {
    let contents = std::fs::read_to_string(path).map_err(|e| PolicyError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_trusted_signers(&contents)
}
