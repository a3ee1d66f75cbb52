// ABOUTME: SSH certificate codec and certificate authority for ghcert.
// ABOUTME: Re-exports the codec, authority, fingerprint and key-file helpers.

pub mod authority;
pub mod codec;
pub mod error;
pub mod fingerprint;
pub mod key;
mod rsa_sha512;

pub use authority::{CaOptions, CertificateAuthority, DEFAULT_CLOCK_SKEW, LOGIN_EXTENSION_PREFIX};
pub use codec::{
    cert_info, cert_info_at, marshal_certificate, parse_certificate, parse_public_key,
    read_certificate, CertInfo,
};
pub use error::{CertificateParseError, KeyFormatError, Result, SigningError, SshError};
pub use fingerprint::{compute_fingerprint, key_data_fingerprint};
pub use key::{
    cert_path_for, default_key_path, generate_key, load_key, load_or_generate_key,
    public_key_path_for, read_public_key, write_certificate, xdg_config_dir,
};

// Callers name these types without depending on ssh-key themselves.
pub use ssh_key::{Certificate, PrivateKey, PublicKey};
