// ABOUTME: Error types for trust policy loading and integrity verification.
// ABOUTME: PolicyIntegrityError is kept separate so callers can fail closed on it specifically.

use std::path::PathBuf;
use thiserror::Error;

/// The policy signature did not check out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyIntegrityError {
    #[error("policy signature does not match its contents")]
    SignatureMismatch,

    #[error("policy is signed by an untrusted key: {0}")]
    UntrustedSigningKey(String),

    #[error("policy is unsigned and unsigned policies are not accepted")]
    MissingSignature,

    #[error("policy signature is malformed: {0}")]
    MalformedSignature(String),

    /// Only ed25519 keys can sign policies.
    #[error("cannot sign policy with a {0} key (only ed25519 is supported)")]
    UnsupportedSigner(String),
}

/// Errors loading or validating a trust policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize policy: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("invalid policy: {0}")]
    Invalid(String),

    #[error(transparent)]
    Integrity(#[from] PolicyIntegrityError),
}

/// Result type alias using PolicyError.
pub type Result<T> = std::result::Result<T, PolicyError>;
