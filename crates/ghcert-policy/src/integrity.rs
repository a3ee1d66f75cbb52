// ABOUTME: Signs and verifies trust policies over a frozen canonical field set.
// ABOUTME: Signatures are ed25519 in SSH wire format, base64 encoded.

use crate::error::PolicyIntegrityError;
use crate::policy::TrustPolicy;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use ssh_key::private::KeypairData;
use ssh_key::public::KeyData;
use ssh_key::{PrivateKey, PublicKey};
use std::collections::BTreeMap;
use tracing::warn;

/// Domain separator so a policy signature can never be replayed as anything else.
const PAYLOAD_TAG: &str = "ghcert-policy-v1";

const SIG_ALGORITHM: &str = "ssh-ed25519";

/// Names of the fields covered by the signature.
///
/// Frozen: a field added to [`TrustPolicy`] later is *not* signed until it is
/// listed here, and listing it changes every existing signature.
pub const SIGNED_FIELDS: [&str; 5] = [
    "ca_public_key",
    "cert_validity_hours",
    "oidc_client_id",
    "oidc_tenant_id",
    "server_base_url",
];

/// Signature attached to a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySignature {
    /// OpenSSH text of the signing public key.
    pub signer: String,
    /// Base64 of `string("ssh-ed25519") || string(sig[64])`.
    pub sig: String,
}

impl PolicySignature {
    /// Render as a `[signature]` TOML table ready to append to a policy file.
    pub fn to_toml_table(&self) -> Result<String, toml::ser::Error> {
        #[derive(Serialize)]
        struct Wrapper<'a> {
            signature: &'a PolicySignature,
        }
        toml::to_string(&Wrapper { signature: self })
    }
}

/// How to treat a policy with no signature at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegrityMode {
    /// Unsigned policies are rejected.
    #[default]
    Strict,
    /// Unsigned policies are accepted with a warning. For local development and
    /// deployments that predate policy signing.
    Permissive,
}

fn signed_fields(policy: &TrustPolicy) -> BTreeMap<&'static str, String> {
    let mut fields = BTreeMap::new();
    fields.insert("ca_public_key", policy.ca_public_key.clone());
    fields.insert("cert_validity_hours", policy.cert_validity_hours.to_string());
    fields.insert("oidc_client_id", policy.oidc.client_id.clone());
    fields.insert("oidc_tenant_id", policy.oidc.tenant_id.clone());
    fields.insert("server_base_url", policy.server_base_url.clone());
    debug_assert!(fields.keys().copied().eq(SIGNED_FIELDS));
    fields
}

/// Bytes that are signed: the tag, then each `(name, value)` pair in name
/// order, every item as an SSH string (u32 big-endian length + bytes).
pub fn canonical_payload(policy: &TrustPolicy) -> Vec<u8> {
    let mut out = Vec::new();
    put_string(&mut out, PAYLOAD_TAG.as_bytes());
    for (name, value) in signed_fields(policy) {
        put_string(&mut out, name.as_bytes());
        put_string(&mut out, value.as_bytes());
    }
    out
}

/// Sign `policy` with an ed25519 key.
pub fn sign_policy(
    policy: &TrustPolicy,
    private_key: &PrivateKey,
) -> Result<PolicySignature, PolicyIntegrityError> {
    let KeypairData::Ed25519(keypair) = private_key.key_data() else {
        return Err(PolicyIntegrityError::UnsupportedSigner(
            private_key.algorithm().as_str().to_string(),
        ));
    };

    let signing_key = SigningKey::from_bytes(&keypair.private.to_bytes());
    let signature = signing_key.sign(&canonical_payload(policy));

    let mut wire = Vec::new();
    put_string(&mut wire, SIG_ALGORITHM.as_bytes());
    put_string(&mut wire, &signature.to_bytes());

    let signer = private_key
        .public_key()
        .to_openssh()
        .map_err(|e| PolicyIntegrityError::MalformedSignature(e.to_string()))?;

    Ok(PolicySignature {
        signer,
        sig: base64::engine::general_purpose::STANDARD.encode(wire),
    })
}

/// Check `signature` against `policy`.
///
/// With no signature, `Permissive` passes and `Strict` fails with
/// `MissingSignature`. A signature from a key outside `trusted_signers` is
/// `UntrustedSigningKey` even if it is mathematically valid.
pub fn verify_policy_integrity(
    policy: &TrustPolicy,
    signature: Option<&PolicySignature>,
    trusted_signers: &[PublicKey],
    mode: IntegrityMode,
) -> Result<(), PolicyIntegrityError> {
    let Some(signature) = signature else {
        return match mode {
            IntegrityMode::Permissive => {
                warn!("trust policy is unsigned; accepting it in permissive mode");
                Ok(())
            }
            IntegrityMode::Strict => Err(PolicyIntegrityError::MissingSignature),
        };
    };

    let signer = PublicKey::from_openssh(signature.signer.trim())
        .map_err(|e| PolicyIntegrityError::MalformedSignature(format!("signer: {e}")))?;
    let signer_fingerprint = ghcert_ssh::compute_fingerprint(&signer);

    let KeyData::Ed25519(ed_key) = signer.key_data() else {
        return Err(PolicyIntegrityError::UntrustedSigningKey(signer_fingerprint));
    };
    if !trusted_signers
        .iter()
        .any(|trusted| trusted.key_data() == signer.key_data())
    {
        return Err(PolicyIntegrityError::UntrustedSigningKey(signer_fingerprint));
    }

    let sig_bytes = decode_wire_signature(&signature.sig)?;
    let verifying_key = VerifyingKey::from_bytes(&ed_key.0)
        .map_err(|e| PolicyIntegrityError::MalformedSignature(e.to_string()))?;

    verifying_key
        .verify_strict(&canonical_payload(policy), &Signature::from_bytes(&sig_bytes))
        .map_err(|_| PolicyIntegrityError::SignatureMismatch)
}

fn decode_wire_signature(encoded: &str) -> Result<[u8; 64], PolicyIntegrityError> {
    let wire = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| PolicyIntegrityError::MalformedSignature(e.to_string()))?;

    let mut rest = wire.as_slice();
    let algorithm = take_string(&mut rest)?;
    if algorithm != SIG_ALGORITHM.as_bytes() {
        return Err(PolicyIntegrityError::MalformedSignature(format!(
            "unexpected signature algorithm {}",
            String::from_utf8_lossy(algorithm)
        )));
    }
    let blob = take_string(&mut rest)?;
    if !rest.is_empty() {
        return Err(PolicyIntegrityError::MalformedSignature(
            "trailing bytes after signature".into(),
        ));
    }

    blob.try_into().map_err(|_| {
        PolicyIntegrityError::MalformedSignature(format!(
            "signature is {} bytes, expected 64",
            blob.len()
        ))
    })
}

fn put_string(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

fn take_string<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], PolicyIntegrityError> {
    let truncated = || PolicyIntegrityError::MalformedSignature("truncated signature".into());

    if input.len() < 4 {
        return Err(truncated());
    }
    let (len, rest) = input.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() < len {
        return Err(truncated());
    }
    let (value, rest) = rest.split_at(len);
    *input = rest;
    Ok(value)
}
