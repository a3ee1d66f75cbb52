// ABOUTME: Parses and serializes SSH public keys and certificates in OpenSSH text form.
// ABOUTME: Also projects certificates into CertInfo for status display.

use crate::error::{CertificateParseError, KeyFormatError, SshError};
use crate::fingerprint::{compute_fingerprint, key_data_fingerprint};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use ssh_key::{Certificate, PublicKey};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Suffix shared by every OpenSSH certificate algorithm name.
const CERT_ALGORITHM_SUFFIX: &str = "-cert-v01@openssh.com";

/// Parse a single-line `algorithm base64 [comment]` public key.
pub fn parse_public_key(input: &[u8]) -> Result<PublicKey, KeyFormatError> {
    let text = std::str::from_utf8(input).map_err(|_| KeyFormatError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(KeyFormatError::Empty);
    }

    let algorithm = first_token(text);
    if algorithm.ends_with(CERT_ALGORITHM_SUFFIX) {
        return Err(KeyFormatError::IsCertificate(algorithm.to_string()));
    }

    PublicKey::from_openssh(text).map_err(KeyFormatError::Invalid)
}

/// Parse a single-line OpenSSH certificate.
///
/// Leading and trailing whitespace is ignored so file contents and pasted text
/// can be passed straight through.
pub fn parse_certificate(input: &[u8]) -> Result<Certificate, CertificateParseError> {
    let text = std::str::from_utf8(input)
        .map_err(|_| CertificateParseError::InvalidFormat("not valid UTF-8".to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(CertificateParseError::InvalidFormat(
            "certificate is empty".to_string(),
        ));
    }

    let algorithm = first_token(text);
    if !algorithm.ends_with(CERT_ALGORITHM_SUFFIX) {
        return match PublicKey::from_openssh(text) {
            Ok(key) => Err(CertificateParseError::NotACertificate {
                algorithm: key.algorithm().as_str().to_string(),
            }),
            Err(e) => Err(CertificateParseError::InvalidFormat(e.to_string())),
        };
    }

    Certificate::from_openssh(text).map_err(|e| CertificateParseError::InvalidFormat(e.to_string()))
}

/// Read and parse a certificate file.
pub fn read_certificate(path: &Path) -> Result<Certificate, CertificateParseError> {
    let data = std::fs::read(path).map_err(|e| CertificateParseError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_certificate(&data)
}

/// Serialize a certificate to its canonical single-line text form.
///
/// The output is a pure function of the certificate, so repeated calls are
/// byte-identical.
pub fn marshal_certificate(cert: &Certificate) -> Result<String, SshError> {
    cert.to_openssh().map_err(SshError::SerializeKey)
}

/// Read-only view of a certificate for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertInfo {
    pub serial: u64,
    pub key_id: String,
    pub principals: Vec<String>,
    pub valid_after: DateTime<Utc>,
    pub valid_before: DateTime<Utc>,
    pub critical_options: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, String>,
    pub key_fingerprint: String,
    pub signing_key_fingerprint: String,
    pub is_expired: bool,
    #[serde(rename = "time_left_secs", serialize_with = "serialize_secs")]
    pub time_left: Duration,
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

/// Inspect a certificate against the current wall clock.
pub fn cert_info(cert: &Certificate) -> CertInfo {
    cert_info_at(cert, SystemTime::now())
}

/// Inspect a certificate against an explicit instant.
///
/// A certificate is expired at and after `valid_before`.
pub fn cert_info_at(cert: &Certificate, now: SystemTime) -> CertInfo {
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let valid_before = cert.valid_before();
    let is_expired = now_secs >= valid_before;
    let time_left = Duration::from_secs(valid_before.saturating_sub(now_secs));

    let signed_key = PublicKey::from(cert.public_key().clone());

    CertInfo {
        serial: cert.serial(),
        key_id: cert.key_id().to_string(),
        principals: cert.valid_principals().to_vec(),
        valid_after: to_datetime(cert.valid_after()),
        valid_before: to_datetime(valid_before),
        critical_options: to_map(cert.critical_options().iter()),
        extensions: to_map(cert.extensions().iter()),
        key_fingerprint: compute_fingerprint(&signed_key),
        signing_key_fingerprint: key_data_fingerprint(cert.signature_key()),
        is_expired,
        time_left,
    }
}

fn first_token(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or_default()
}

fn to_datetime(unix_secs: u64) -> DateTime<Utc> {
    i64::try_from(unix_secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn to_map<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> BTreeMap<String, String> {
    entries.map(|(k, v)| (k.clone(), v.clone())).collect()
}
