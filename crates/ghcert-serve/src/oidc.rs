// ABOUTME: Identity provider seam plus the Microsoft Entra ID implementation.
// ABOUTME: Authorization-code flow with PKCE (S256) and OIDC userinfo.

use crate::error::{AuthSessionError, ServeError};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ghcert_policy::{OidcSettings, UserInfo};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;
use url::Url;

const ENTRA_AUTHORITY: &str = "https://login.microsoftonline.com";
const ENTRA_USERINFO: &str = "https://graph.microsoft.com/oidc/userinfo";
const SCOPES: &str = "openid profile email";
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

/// Random 32-byte state token, hex encoded.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = compute_code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// `BASE64URL(SHA256(verifier))`, no padding.
pub fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// An OIDC identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is sent to for login.
    fn authorization_url(&self, state: &str, code_challenge: &str) -> Url;

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenSet, AuthSessionError>;

    async fn user_info(&self, tokens: &TokenSet) -> Result<UserInfo, AuthSessionError>;
}

/// Microsoft Entra ID (v2.0 endpoints) for a single tenant.
pub struct EntraIdProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    authorize_url: Url,
    token_url: Url,
    userinfo_url: Url,
}

impl EntraIdProvider {
    pub fn new(settings: &OidcSettings, redirect_uri: String) -> Result<Self, ServeError> {
        if settings.tenant_id.is_empty() || settings.client_id.is_empty() {
            return Err(ServeError::Config(
                "oidc.tenant_id and oidc.client_id are required".into(),
            ));
        }

        let base = format!("{ENTRA_AUTHORITY}/{}/oauth2/v2.0", settings.tenant_id);
        let parse = |s: &str| Url::parse(s).map_err(|e| ServeError::Config(format!("{s}: {e}")));

        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| ServeError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_uri,
            authorize_url: parse(&format!("{base}/authorize"))?,
            token_url: parse(&format!("{base}/token"))?,
            userinfo_url: parse(ENTRA_USERINFO)?,
        })
    }
}

#[async_trait]
impl IdentityProvider for EntraIdProvider {
    fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenSet, AuthSessionError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", SCOPES),
        ];
        if !self.client_secret.is_empty() {
            form.push(("client_secret", self.client_secret.as_str()));
        }

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthSessionError::UpstreamFailure(format!("token request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthSessionError::UpstreamFailure(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenSet>()
            .await
            .map_err(|e| AuthSessionError::UpstreamFailure(format!("token response: {e}")))
    }

    async fn user_info(&self, tokens: &TokenSet) -> Result<UserInfo, AuthSessionError> {
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| AuthSessionError::UpstreamFailure(format!("userinfo request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthSessionError::UpstreamFailure(format!(
                "userinfo endpoint returned {status}"
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| AuthSessionError::UpstreamFailure(format!("userinfo response: {e}")))?;

        let claims = tokens.id_token.as_deref().and_then(id_token_claims);
        Ok(merge_claims(info, claims))
    }
}

/// Decode the payload of an ID token. The token came straight from the token
/// endpoint over TLS, so its signature is not re-checked here.
pub fn id_token_claims(token: &str) -> Option<UserInfo> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice(&decoded) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!(error = %e, "could not decode id_token payload");
            None
        }
    }
}

/// Fill claims the userinfo endpoint left empty from the ID token.
fn merge_claims(mut info: UserInfo, claims: Option<UserInfo>) -> UserInfo {
    let Some(claims) = claims else {
        return info;
    };
    for (field, fallback) in [
        (&mut info.subject, claims.subject),
        (&mut info.email, claims.email),
        (&mut info.username, claims.username),
        (&mut info.name, claims.name),
    ] {
        if field.is_empty() {
            *field = fallback;
        }
    }
    info
}
