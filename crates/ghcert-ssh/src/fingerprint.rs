// ABOUTME: SSH public key fingerprint computation.
// ABOUTME: Produces OpenSSH-style SHA256 fingerprints for keys and CA signing keys.

use ssh_key::public::KeyData;
use ssh_key::{HashAlg, PublicKey};

/// Compute the SHA256 fingerprint of a public key.
///
/// Matches `ssh-keygen -l -E sha256`: the literal prefix `SHA256:` followed by the
/// unpadded base64 digest of the key's wire encoding. Works for every algorithm
/// the codec accepts, so callers can log fingerprints of keys they are about to
/// reject.
pub fn compute_fingerprint(public_key: &PublicKey) -> String {
    key_data_fingerprint(public_key.key_data())
}

/// Same as [`compute_fingerprint`] for bare key material, e.g. the signature key
/// embedded in a certificate.
pub fn key_data_fingerprint(key_data: &KeyData) -> String {
    key_data.fingerprint(HashAlg::Sha256).to_string()
}
