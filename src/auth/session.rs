//! Process-wide owner session shared by every request.
//!
//! Handlers read the current session without blocking; background tasks can
//! `subscribe()` to sign-in and sign-out transitions. Rotating the integration
//! key is not a transition and does not wake subscribers.

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use super::IntegrationKey;

/// The owner whose orders authenticated callers act on.
#[derive(Debug, Clone)]
pub struct OwnerSession {
    pub owner_id: Uuid,
    pub integration_key: IntegrationKey,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Authenticated(OwnerSession),
    Anonymous,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

pub struct SessionCache {
    tx: watch::Sender<SessionState>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Uninitialized);
        Self { tx }
    }

    /// A cache already signed in as `owner_id`.
    pub fn signed_in(owner_id: Uuid, key: IntegrationKey) -> Self {
        let cache = Self::new();
        cache.sign_in(OwnerSession {
            owner_id,
            integration_key: key,
        });
        cache
    }

    pub fn begin_loading(&self) {
        self.tx.send_replace(SessionState::Loading);
    }

    pub fn sign_in(&self, session: OwnerSession) {
        info!("Owner session established for {}", session.owner_id);
        self.tx.send_replace(SessionState::Authenticated(session));
    }

    pub fn sign_out(&self) {
        info!("Owner session cleared");
        self.tx.send_replace(SessionState::Anonymous);
    }

    /// Replace the integration key in place. Returns false when there is no
    /// authenticated session to rotate.
    pub fn rotate_key(&self, key: IntegrationKey) -> bool {
        let mut rotated = false;
        self.tx.send_if_modified(|state| {
            if let SessionState::Authenticated(session) = state {
                session.integration_key = key;
                rotated = true;
            }
            // Same owner, same session: nothing for subscribers to react to.
            false
        });
        if rotated {
            info!("Integration key rotated");
        }
        rotated
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn current_session(&self) -> Option<OwnerSession> {
        match &*self.tx.borrow() {
            SessionState::Authenticated(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Check a provided integration key against the current session.
    pub fn verify(&self, provided: &str) -> Option<OwnerSession> {
        let session = self.current_session()?;
        session
            .integration_key
            .verify(provided)
            .then_some(session)
    }
}
