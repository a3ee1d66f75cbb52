// ABOUTME: Drives a login from /auth/start through the provider callback to a signed certificate.
// ABOUTME: Owns the session store, the identity provider and the certificate authority.

use crate::error::AuthSessionError;
use crate::oidc::{generate_state, IdentityProvider, Pkce};
use crate::session::{AuthSession, SessionStore};
use ghcert_policy::{derive_principal, PrincipalSource, TrustPolicy, UserInfo};
use ghcert_ssh::CertificateAuthority;
use serde::Deserialize;
use ssh_key::{Certificate, PublicKey};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Query parameters the identity provider sends to /auth/callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub struct Coordinator {
    sessions: Arc<SessionStore>,
    provider: Option<Arc<dyn IdentityProvider>>,
    authority: Arc<CertificateAuthority>,
    principal_source: PrincipalSource,
    target_host: String,
}

impl Coordinator {
    pub fn new(
        sessions: Arc<SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        authority: Arc<CertificateAuthority>,
        policy: &TrustPolicy,
    ) -> Self {
        Self::build(sessions, Some(provider), authority, policy)
    }

    /// A coordinator for development mode, where nobody signs in through OIDC.
    ///
    /// Direct issuance works; the login endpoints fail with `NoProvider`.
    pub fn without_provider(
        sessions: Arc<SessionStore>,
        authority: Arc<CertificateAuthority>,
        policy: &TrustPolicy,
    ) -> Self {
        Self::build(sessions, None, authority, policy)
    }

    fn build(
        sessions: Arc<SessionStore>,
        provider: Option<Arc<dyn IdentityProvider>>,
        authority: Arc<CertificateAuthority>,
        policy: &TrustPolicy,
    ) -> Self {
        Self {
            sessions,
            provider,
            authority,
            principal_source: policy.principal_source,
            target_host: policy.target_host(),
        }
    }

    pub fn authority(&self) -> &CertificateAuthority {
        &self.authority
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    fn provider(&self) -> Result<&dyn IdentityProvider, AuthSessionError> {
        self.provider.as_deref().ok_or(AuthSessionError::NoProvider)
    }

    /// Open a session for `pubkey_text` and return the provider login URL.
    pub async fn start_auth(&self, pubkey_text: &str) -> Result<Url, AuthSessionError> {
        let provider = self.provider()?;
        let public_key = ghcert_ssh::parse_public_key(pubkey_text.as_bytes())?;
        let state = generate_state();
        let pkce = Pkce::generate();

        let url = provider.authorization_url(&state, &pkce.challenge);
        info!(
            fingerprint = %ghcert_ssh::compute_fingerprint(&public_key),
            "authorization session started"
        );
        self.sessions
            .insert(AuthSession::new(state, public_key, pkce.verifier))
            .await;
        Ok(url)
    }

    /// Consume the session named by the callback and resolve the user.
    ///
    /// The session is consumed before the provider is contacted, so a replayed
    /// or racing callback fails even if the first one later errors upstream.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
    ) -> Result<(UserInfo, PublicKey), AuthSessionError> {
        let state = params.state.as_deref().ok_or(AuthSessionError::Unknown)?;
        let session = self.sessions.consume(state).await?;

        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_default();
            warn!(%error, %description, "identity provider returned an error");
            return Err(AuthSessionError::UpstreamFailure(format!(
                "{error}: {description}"
            )));
        }
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthSessionError::UpstreamFailure("callback carried no code".into()))?;

        let provider = self.provider()?;
        let tokens = provider
            .exchange_code(&code, &session.pkce_verifier)
            .await?;
        let user = provider.user_info(&tokens).await?;

        Ok((user, session.pending_public_key))
    }

    /// Sign `public_key` for `user`.
    pub fn issue_for(
        &self,
        user: &UserInfo,
        public_key: &PublicKey,
    ) -> Result<Certificate, AuthSessionError> {
        let principal = derive_principal(user, self.principal_source);
        let who = if user.email.is_empty() {
            &user.subject
        } else {
            &user.email
        };
        let key_id = format!("{principal}:{who}");

        let cert = self.authority.sign_public_key_for_github(
            public_key,
            &key_id,
            &principal,
            &self.target_host,
        )?;
        info!(
            %principal,
            %key_id,
            serial = cert.serial(),
            host = %self.target_host,
            "issued certificate"
        );
        Ok(cert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::TokenSet;
    use crate::session::DEFAULT_SESSION_TTL;
    use async_trait::async_trait;
    use ghcert_ssh::CaOptions;
    use ssh_key::{Algorithm, LineEnding, PrivateKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider that accepts any code and returns a fixed user.
    struct FakeProvider {
        user: UserInfo,
        exchanges: AtomicUsize,
        fail_exchange: bool,
    }

    impl FakeProvider {
        fn new(user: UserInfo) -> Self {
            Self {
                user,
                exchanges: AtomicUsize::new(0),
                fail_exchange: false,
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
            let mut url = Url::parse("https://idp.test/authorize").unwrap();
            url.query_pairs_mut()
                .append_pair("state", state)
                .append_pair("code_challenge", code_challenge);
            url
        }

        async fn exchange_code(
            &self,
            code: &str,
            _pkce_verifier: &str,
        ) -> Result<TokenSet, AuthSessionError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if self.fail_exchange {
                return Err(AuthSessionError::UpstreamFailure("invalid_grant".into()));
            }
            Ok(TokenSet {
                access_token: format!("token-for-{code}"),
                id_token: None,
                token_type: "Bearer".into(),
                expires_in: Some(3600),
            })
        }

        async fn user_info(&self, _tokens: &TokenSet) -> Result<UserInfo, AuthSessionError> {
            Ok(self.user.clone())
        }
    }

    fn shawn() -> UserInfo {
        UserInfo {
            subject: "sub-1".into(),
            email: "shawn@schwartz.so".into(),
            username: String::new(),
            name: "Shawn".into(),
        }
    }

    fn user_key() -> PublicKey {
        PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    fn coordinator_with(provider: Arc<FakeProvider>, policy: &TrustPolicy) -> Coordinator {
        let ca_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let pem = ca_key.to_openssh(LineEnding::LF).unwrap();
        let authority = CertificateAuthority::new(&pem, 8, CaOptions::default()).unwrap();
        Coordinator::new(
            Arc::new(SessionStore::new(DEFAULT_SESSION_TTL)),
            provider,
            Arc::new(authority),
            policy,
        )
    }

    fn state_of(url: &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn callback(state: &str) -> CallbackParams {
        CallbackParams {
            code: Some("code-1".into()),
            state: Some(state.into()),
            ..CallbackParams::default()
        }
    }

    #[tokio::test]
    async fn test_without_provider_issues_directly_but_refuses_login() {
        let ca_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let pem = ca_key.to_openssh(LineEnding::LF).unwrap();
        let authority = CertificateAuthority::new(&pem, 8, CaOptions::default()).unwrap();
        let coordinator = Coordinator::without_provider(
            Arc::new(SessionStore::new(DEFAULT_SESSION_TTL)),
            Arc::new(authority),
            &TrustPolicy::default(),
        );
        let key = user_key();

        let err = coordinator
            .start_auth(&key.to_openssh().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthSessionError::NoProvider));
        assert!(coordinator.sessions().is_empty().await);

        let cert = coordinator.issue_for(&shawn(), &key).unwrap();
        assert_eq!(cert.valid_principals(), ["shawn".to_string()]);
    }

    #[tokio::test]
    async fn test_full_flow_issues_certificate() {
        let provider = Arc::new(FakeProvider::new(shawn()));
        let coordinator = coordinator_with(provider, &TrustPolicy::default());
        let key = user_key();

        let url = coordinator
            .start_auth(&key.to_openssh().unwrap())
            .await
            .unwrap();
        let (user, pending) = coordinator
            .handle_callback(callback(&state_of(&url)))
            .await
            .unwrap();
        assert_eq!(pending.key_data(), key.key_data());

        let cert = coordinator.issue_for(&user, &pending).unwrap();
        assert_eq!(cert.valid_principals(), ["shawn".to_string()]);
        assert_eq!(cert.key_id(), "shawn:shawn@schwartz.so");
        assert_eq!(
            cert.extensions().get("login@github.com").map(String::as_str),
            Some("shawn")
        );
    }

    #[tokio::test]
    async fn test_key_id_falls_back_to_subject() {
        let provider = Arc::new(FakeProvider::new(shawn()));
        let policy = TrustPolicy {
            principal_source: PrincipalSource::Username,
            github_enterprise_url: "https://github.acme.test".into(),
            ..TrustPolicy::default()
        };
        let coordinator = coordinator_with(provider, &policy);
        let user = UserInfo {
            subject: "sub-9".into(),
            username: "devuser".into(),
            ..UserInfo::default()
        };

        let cert = coordinator.issue_for(&user, &user_key()).unwrap();
        assert_eq!(cert.key_id(), "devuser:sub-9");
        assert!(cert.extensions().contains_key("login@github.acme.test"));
    }

    #[tokio::test]
    async fn test_empty_principal_is_refused() {
        let provider = Arc::new(FakeProvider::new(shawn()));
        let policy = TrustPolicy {
            principal_source: PrincipalSource::Username,
            ..TrustPolicy::default()
        };
        let coordinator = coordinator_with(provider, &policy);

        let result = coordinator.issue_for(&shawn(), &user_key());
        assert!(matches!(result, Err(AuthSessionError::Signing(_))));
    }

    #[tokio::test]
    async fn test_invalid_public_key() {
        let coordinator =
            coordinator_with(Arc::new(FakeProvider::new(shawn())), &TrustPolicy::default());
        let result = coordinator.start_auth("ssh-ed25519 not-base64").await;
        assert!(matches!(result, Err(AuthSessionError::InvalidPublicKey(_))));
    }

    #[tokio::test]
    async fn test_replayed_callback_is_unknown() {
        let coordinator =
            coordinator_with(Arc::new(FakeProvider::new(shawn())), &TrustPolicy::default());
        let url = coordinator
            .start_auth(&user_key().to_openssh().unwrap())
            .await
            .unwrap();
        let state = state_of(&url);

        coordinator.handle_callback(callback(&state)).await.unwrap();
        assert!(matches!(
            coordinator.handle_callback(callback(&state)).await,
            Err(AuthSessionError::Unknown)
        ));
    }

    #[tokio::test]
    async fn test_missing_state_is_unknown() {
        let coordinator =
            coordinator_with(Arc::new(FakeProvider::new(shawn())), &TrustPolicy::default());
        let params = CallbackParams {
            code: Some("c".into()),
            ..CallbackParams::default()
        };
        assert!(matches!(
            coordinator.handle_callback(params).await,
            Err(AuthSessionError::Unknown)
        ));
    }

    #[tokio::test]
    async fn test_provider_error_consumes_session() {
        let provider = Arc::new(FakeProvider::new(shawn()));
        let coordinator = coordinator_with(provider.clone(), &TrustPolicy::default());
        let url = coordinator
            .start_auth(&user_key().to_openssh().unwrap())
            .await
            .unwrap();
        let state = state_of(&url);

        let denied = CallbackParams {
            state: Some(state.clone()),
            error: Some("access_denied".into()),
            error_description: Some("user cancelled".into()),
            ..CallbackParams::default()
        };
        assert!(matches!(
            coordinator.handle_callback(denied).await,
            Err(AuthSessionError::UpstreamFailure(_))
        ));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);

        assert!(matches!(
            coordinator.handle_callback(callback(&state)).await,
            Err(AuthSessionError::Unknown)
        ));
    }

    #[tokio::test]
    async fn test_failed_exchange_is_upstream_failure() {
        let mut fake = FakeProvider::new(shawn());
        fake.fail_exchange = true;
        let coordinator = coordinator_with(Arc::new(fake), &TrustPolicy::default());
        let url = coordinator
            .start_auth(&user_key().to_openssh().unwrap())
            .await
            .unwrap();

        assert!(matches!(
            coordinator.handle_callback(callback(&state_of(&url))).await,
            Err(AuthSessionError::UpstreamFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session() {
        let coordinator =
            coordinator_with(Arc::new(FakeProvider::new(shawn())), &TrustPolicy::default());
        let url = coordinator
            .start_auth(&user_key().to_openssh().unwrap())
            .await
            .unwrap();

        tokio::time::advance(DEFAULT_SESSION_TTL + Duration::from_secs(1)).await;
        assert!(matches!(
            coordinator.handle_callback(callback(&state_of(&url))).await,
            Err(AuthSessionError::Expired)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callbacks_single_winner() {
        let provider = Arc::new(FakeProvider::new(shawn()));
        let coordinator = Arc::new(coordinator_with(provider.clone(), &TrustPolicy::default()));
        let url = coordinator
            .start_auth(&user_key().to_openssh().unwrap())
            .await
            .unwrap();
        let state = state_of(&url);

        let attempts = (0..8).map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let params = callback(&state);
            tokio::spawn(async move { coordinator.handle_callback(params).await })
        });
        let results = futures::future::join_all(attempts).await;

        let mut ok = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => ok += 1,
                Err(AuthSessionError::Unknown) | Err(AuthSessionError::Expired) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
    }
}
