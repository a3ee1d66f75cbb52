// ABOUTME: HTTP routes for the issuance server.
// ABOUTME: Browser-facing login endpoints return HTML; API endpoints return typed JSON.

use crate::coordinator::{CallbackParams, Coordinator};
use crate::error::AuthSessionError;
use crate::pages;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use ghcert_policy::UserInfo;
use serde::{Deserialize, Serialize};
use ssh_key::{Certificate, PublicKey};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared state handed to every handler.
pub struct AppState {
    pub coordinator: Coordinator,
    pub dev_mode: bool,
}

/// JSON body of every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse {
    Ok {
        dev_mode: bool,
        timestamp: DateTime<Utc>,
    },
    Accepted {
        message: String,
        fingerprint: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct PubkeyQuery {
    #[serde(default)]
    pubkey: String,
}

#[derive(Debug, Deserialize)]
struct IssueRequest {
    pubkey: String,
    #[serde(default)]
    token: String,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/start", get(start_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/dev", get(dev_handler))
        .route("/cert/issue", post(issue_handler))
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

async fn start_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<PubkeyQuery>,
) -> Result<Redirect, AuthSessionError> {
    if state.dev_mode {
        ghcert_ssh::parse_public_key(query.pubkey.as_bytes())?;
        let encoded: String = url::form_urlencoded::byte_serialize(query.pubkey.as_bytes()).collect();
        return Ok(Redirect::to(&format!("/auth/dev?pubkey={encoded}")));
    }

    let url = state.coordinator.start_auth(&query.pubkey).await?;
    Ok(Redirect::to(url.as_str()))
}

async fn callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<String>, AuthSessionError> {
    let (user, public_key) = state.coordinator.handle_callback(params).await?;
    issue_page(&state.coordinator, &user, &public_key)
}

async fn dev_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<PubkeyQuery>,
) -> Response {
    if !state.dev_mode {
        let page = pages::error_page(
            StatusCode::FORBIDDEN,
            "Development login is disabled on this server.",
        );
        return (StatusCode::FORBIDDEN, Html(page)).into_response();
    }

    let result = ghcert_ssh::parse_public_key(query.pubkey.as_bytes())
        .map_err(AuthSessionError::from)
        .and_then(|public_key| issue_page(&state.coordinator, &dev_user(), &public_key));
    match result {
        Ok(page) => page.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Acknowledges a key. Certificates are only issued through the login callback.
async fn issue_handler(
    payload: Result<Json<IssueRequest>, JsonRejection>,
) -> (StatusCode, Json<ApiResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(ApiResponse::Error {
                    message: rejection.body_text(),
                }),
            )
        }
    };
    debug!(has_token = !request.token.is_empty(), "issue request");
    match ghcert_ssh::parse_public_key(request.pubkey.as_bytes()) {
        Ok(public_key) => (
            StatusCode::OK,
            Json(ApiResponse::Accepted {
                message: "sign in through /auth/start to receive a certificate".into(),
                fingerprint: ghcert_ssh::compute_fingerprint(&public_key),
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::Error {
                message: format!("invalid public key: {e}"),
            }),
        ),
    }
}

async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<ApiResponse> {
    Json(ApiResponse::Ok {
        dev_mode: state.dev_mode,
        timestamp: Utc::now(),
    })
}

fn dev_user() -> UserInfo {
    UserInfo {
        subject: "dev-user".into(),
        email: "devuser@localhost".into(),
        username: "devuser".into(),
        name: "Development User".into(),
    }
}

fn issue_page(
    coordinator: &Coordinator,
    user: &UserInfo,
    public_key: &PublicKey,
) -> Result<Html<String>, AuthSessionError> {
    let cert: Certificate = coordinator.issue_for(user, public_key)?;
    let text = ghcert_ssh::marshal_certificate(&cert)?;
    let info = ghcert_ssh::cert_info(&cert);
    let principal = info.principals.first().cloned().unwrap_or_default();
    Ok(Html(pages::success_page(&principal, &text, info.valid_before)))
}
