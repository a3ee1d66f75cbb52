// ABOUTME: Error types for SSH key, certificate and signing operations using thiserror.
// ABOUTME: Separates key-file IO, key parsing, certificate parsing and CA signing failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing key files.
#[derive(Error, Debug)]
pub enum SshError {
    /// Failed to read a key file from disk.
    #[error("failed to read SSH key from {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse an SSH key file.
    #[error("failed to parse SSH key from {path}: {source}")]
    ParseKey {
        path: PathBuf,
        #[source]
        source: ssh_key::Error,
    },

    /// A `.pub` file does not hold a usable public key.
    #[error("invalid public key in {path}: {source}")]
    InvalidPublicKey {
        path: PathBuf,
        #[source]
        source: KeyFormatError,
    },

    /// Failed to generate an SSH key.
    #[error("failed to generate SSH key: {0}")]
    GenerateKey(#[source] ssh_key::Error),

    /// Failed to serialize a key or certificate.
    #[error("failed to serialize key: {0}")]
    SerializeKey(#[source] ssh_key::Error),

    /// Failed to write a key or certificate file to disk.
    #[error("failed to write key to {path}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set file permissions.
    #[error("failed to set permissions on {path}: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A user-supplied public key could not be parsed.
#[derive(Error, Debug)]
pub enum KeyFormatError {
    #[error("public key is empty")]
    Empty,

    #[error("public key is not valid UTF-8")]
    NotUtf8,

    /// The text names a certificate type, not a bare key.
    #[error("expected a public key but got a certificate ({0})")]
    IsCertificate(String),

    #[error("invalid public key: {0}")]
    Invalid(#[source] ssh_key::Error),
}

/// Certificate text could not be parsed.
#[derive(Error, Debug)]
pub enum CertificateParseError {
    #[error("invalid certificate format: {0}")]
    InvalidFormat(String),

    /// A syntactically valid public key that is not a certificate.
    #[error("not a certificate: {algorithm} is a plain public key")]
    NotACertificate { algorithm: String },

    #[error("failed to read certificate from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures constructing the authority or issuing a certificate.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("failed to read CA key from {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CA key: {0}")]
    InvalidKeyFormat(String),

    #[error("unsupported CA key type: {0}")]
    UnsupportedKeyType(String),

    #[error("certificate validity must be at least one hour")]
    InvalidValidity,

    #[error("principal must not be empty")]
    EmptyPrincipal,

    #[error("target host must not be empty")]
    EmptyHost,

    #[error("key type {0} is not allowed for certificates")]
    DisallowedKeyType(String),

    #[error("this authority has no signing key")]
    NoSigningKey,

    #[error("signing failed: {0}")]
    Sign(#[source] ssh_key::Error),

    #[error("certificate rejected: {0}")]
    Verify(#[source] ssh_key::Error),
}

/// Result type alias using SshError.
pub type Result<T> = std::result::Result<T, SshError>;
