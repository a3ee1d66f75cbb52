// ABOUTME: Error types for the issuance server.
// ABOUTME: AuthSessionError renders as a safe HTML page; ServeError covers startup.

use crate::pages;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use ghcert_policy::PolicyError;
use ghcert_ssh::{KeyFormatError, SigningError, SshError};
use thiserror::Error;
use tracing::warn;

/// Failures along the login and issuance path.
#[derive(Error, Debug)]
pub enum AuthSessionError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(#[from] KeyFormatError),

    /// No such session, or it was already consumed.
    #[error("unknown or already used authorization session")]
    Unknown,

    #[error("authorization session expired")]
    Expired,

    /// The identity provider refused or could not be reached.
    #[error("identity provider failure: {0}")]
    UpstreamFailure(String),

    /// The server runs without OIDC (development mode).
    #[error("no identity provider is configured")]
    NoProvider,

    #[error("certificate signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("certificate encoding failed: {0}")]
    Encoding(#[from] SshError),
}

impl AuthSessionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthSessionError::InvalidPublicKey(_) => StatusCode::BAD_REQUEST,
            AuthSessionError::Unknown
            | AuthSessionError::Expired
            | AuthSessionError::UpstreamFailure(_) => StatusCode::UNAUTHORIZED,
            AuthSessionError::NoProvider => StatusCode::SERVICE_UNAVAILABLE,
            AuthSessionError::Signing(_) | AuthSessionError::Encoding(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show a browser. Upstream and signing details stay in the log.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthSessionError::InvalidPublicKey(_) => "The supplied SSH public key is not valid.",
            AuthSessionError::Unknown => {
                "This login link is unknown or has already been used. Start again from the CLI."
            }
            AuthSessionError::Expired => "This login link has expired. Start again from the CLI.",
            AuthSessionError::UpstreamFailure(_) => "Sign-in with the identity provider failed.",
            AuthSessionError::NoProvider => "Sign-in is not configured on this server.",
            AuthSessionError::Signing(_) | AuthSessionError::Encoding(_) => {
                "The certificate could not be issued."
            }
        }
    }
}

impl IntoResponse for AuthSessionError {
    fn into_response(self) -> Response {
        warn!(error = %self, "request failed");
        let status = self.status();
        (status, Html(pages::error_page(status, self.public_message()))).into_response()
    }
}

/// Errors building the server from its configuration.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("failed to load CA key: {0}")]
    Authority(#[from] SigningError),

    #[error("CA key {actual} does not match the policy CA key {expected}")]
    CaMismatch { expected: String, actual: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
