// ABOUTME: Gets an issued certificate from the browser flow back into the CLI.
// ABOUTME: Polls a local status endpoint, falling back to pasting the certificate by hand.

use async_trait::async_trait;
use ghcert_ssh::{CertificateParseError, SshError};
use serde::Deserialize;
use ssh_key::Certificate;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Address of the companion agent's status listener.
pub const LOOPBACK_ADDR: &str = "127.0.0.1:47213";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Consecutive failed probes after which an interactive login stops polling.
pub const DEFAULT_UNAVAILABLE_LIMIT: u32 = 3;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum LoopbackError {
    /// The status endpoint could not be reached or answered nonsense.
    #[error("loopback status endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("no certificate arrived within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("pasted certificate is not valid: {0}")]
    ManualInputInvalid(#[source] CertificateParseError),

    #[error("waiting for the certificate was cancelled")]
    Cancelled,

    #[error("failed to read certificate from the terminal: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LoopbackStatus {
    pub valid: bool,
}

/// Asks whether a certificate has been delivered locally.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn status(&self) -> Result<LoopbackStatus, LoopbackError>;
}

/// Probes `http://127.0.0.1:47213/status`.
pub struct HttpStatusProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusProbe {
    pub fn new() -> Result<Self, LoopbackError> {
        Self::with_url(format!("http://{LOOPBACK_ADDR}/status"))
    }

    pub fn with_url(url: String) -> Result<Self, LoopbackError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| LoopbackError::Unavailable(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn status(&self) -> Result<LoopbackStatus, LoopbackError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LoopbackError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LoopbackError::Unavailable(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| LoopbackError::Unavailable(e.to_string()))
    }
}

/// Timing for [`wait_for_certificate`].
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
    /// Give up after this many consecutive unreachable probes. `None` keeps
    /// polling until the deadline.
    pub unavailable_limit: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_POLL_DEADLINE,
            unavailable_limit: None,
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Delivered(Box<Certificate>),
    TimedOut,
    /// The probe failed `unavailable_limit` times in a row.
    Unavailable,
    Cancelled,
}

/// Poll `probe` until it reports a certificate at `cert_path`, the deadline
/// passes, or `cancel` fires.
///
/// A `valid: true` report is only believed once the file at `cert_path` holds
/// a certificate that survives a marshal and re-parse unchanged and has not
/// expired; anything else is treated as not ready yet.
pub async fn wait_for_certificate(
    probe: &dyn StatusProbe,
    cert_path: &Path,
    settings: &PollSettings,
    cancel: &CancellationToken,
) -> PollOutcome {
    let deadline = tokio::time::sleep(settings.deadline);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failures = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = &mut deadline => return PollOutcome::TimedOut,
            _ = ticker.tick() => {
                match probe.status().await {
                    Ok(LoopbackStatus { valid: true }) => {
                        failures = 0;
                        if let Some(cert) = load_delivered(cert_path) {
                            return PollOutcome::Delivered(Box::new(cert));
                        }
                    }
                    Ok(LoopbackStatus { valid: false }) => failures = 0,
                    Err(e) => {
                        failures += 1;
                        debug!(error = %e, failures, "loopback probe failed");
                        if settings.unavailable_limit.is_some_and(|limit| failures >= limit) {
                            return PollOutcome::Unavailable;
                        }
                    }
                }
            }
        }
    }
}

fn load_delivered(cert_path: &Path) -> Option<Certificate> {
    let cert = match ghcert_ssh::read_certificate(cert_path) {
        Ok(cert) => cert,
        Err(e) => {
            debug!(error = %e, "status is valid but certificate is not readable yet");
            return None;
        }
    };
    let reparsed = ghcert_ssh::marshal_certificate(&cert)
        .ok()
        .and_then(|text| ghcert_ssh::parse_certificate(text.as_bytes()).ok());
    if reparsed.as_ref() != Some(&cert) {
        debug!(path = %cert_path.display(), "delivered certificate does not round-trip");
        return None;
    }
    if ghcert_ssh::cert_info(&cert).is_expired {
        debug!(path = %cert_path.display(), "certificate at the delivery path has expired");
        return None;
    }
    Some(cert)
}

/// Read a pasted certificate: lines up to two consecutive empty lines or EOF.
pub fn read_manual_certificate<R: BufRead>(reader: R) -> Result<Certificate, LoopbackError> {
    let mut lines = Vec::new();
    let mut empty_run = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            empty_run += 1;
            if empty_run == 2 {
                break;
            }
        } else {
            empty_run = 0;
        }
        lines.push(line);
    }

    ghcert_ssh::parse_certificate(lines.join("\n").as_bytes())
        .map_err(LoopbackError::ManualInputInvalid)
}

/// Blocking manual-entry step, run once polling has given up.
pub type ManualEntry = Box<dyn FnOnce() -> Result<Certificate, LoopbackError> + Send>;

/// Manual entry from the process's stdin.
pub fn stdin_entry() -> ManualEntry {
    Box::new(|| read_manual_certificate(std::io::stdin().lock()))
}

/// Poll for the certificate, then fall back to `manual` if one is given.
///
/// With `manual` (interactive) polling stops early once the endpoint is
/// unreachable `unavailable_limit` times in a row. Without it the poll runs to
/// the deadline and ends in [`LoopbackError::Timeout`].
pub async fn obtain_certificate(
    probe: &dyn StatusProbe,
    cert_path: &Path,
    settings: &PollSettings,
    cancel: &CancellationToken,
    manual: Option<ManualEntry>,
) -> Result<Certificate, LoopbackError> {
    let mut settings = settings.clone();
    if manual.is_none() {
        settings.unavailable_limit = None;
    } else if settings.unavailable_limit.is_none() {
        settings.unavailable_limit = Some(DEFAULT_UNAVAILABLE_LIMIT);
    }

    match wait_for_certificate(probe, cert_path, &settings, cancel).await {
        PollOutcome::Delivered(cert) => {
            info!(path = %cert_path.display(), "certificate delivered locally");
            Ok(*cert)
        }
        PollOutcome::Cancelled => Err(LoopbackError::Cancelled),
        PollOutcome::TimedOut | PollOutcome::Unavailable => match manual {
            Some(entry) => {
                // The blocking read cannot be interrupted; on cancel it is abandoned.
                let pasted = tokio::task::spawn_blocking(entry);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(LoopbackError::Cancelled),
                    joined = pasted => {
                        joined.map_err(|e| LoopbackError::Io(std::io::Error::other(e)))?
                    }
                }
            }
            None => Err(LoopbackError::Timeout(settings.deadline)),
        },
    }
}
