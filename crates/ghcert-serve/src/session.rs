// ABOUTME: In-memory store of pending authorization sessions, keyed by state token.
// ABOUTME: consume() removes under the lock, so each state succeeds at most once.

use crate::error::AuthSessionError;
use ssh_key::PublicKey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a login may take between /auth/start and the callback.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

/// How often the background sweeper evicts expired sessions.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A login in flight.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub state: String,
    /// Key that will be certified once the login completes.
    pub pending_public_key: PublicKey,
    pub pkce_verifier: String,
    pub created_at: Instant,
}

impl AuthSession {
    pub fn new(state: String, pending_public_key: PublicKey, pkce_verifier: String) -> Self {
        Self {
            state,
            pending_public_key,
            pkce_verifier,
            created_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) >= ttl
    }
}

/// Pending sessions. Shared between request handlers through an `Arc`.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, AuthSession>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn insert(&self, session: AuthSession) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.state.clone(), session);
    }

    /// Take the session for `state`. Lookup and removal happen under one lock
    /// acquisition, so concurrent callers with the same token cannot both win.
    pub async fn consume(&self, state: &str) -> Result<AuthSession, AuthSessionError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(state)
        };
        match session {
            None => Err(AuthSessionError::Unknown),
            Some(session) if session.is_expired(self.ttl, Instant::now()) => {
                debug!(state = %state, "session expired before callback");
                Err(AuthSessionError::Expired)
            }
            Some(session) => Ok(session),
        }
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(self.ttl, now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run [`SessionStore::sweep`] every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep().await;
                        if removed > 0 {
                            debug!(removed, "evicted expired sessions");
                        }
                    }
                }
            }
        })
    }
}
