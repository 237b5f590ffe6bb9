//! Identity of the acting user
//!
//! Session management lives outside this crate; it only needs to know who
//! is signed in right now.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Id of the signed-in user, if any
    async fn current_user_id(&self) -> Option<String>;

    /// Session token for authenticated remote calls
    async fn access_token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct Session {
    user_id: Option<String>,
    access_token: Option<String>,
}

/// Identity set explicitly by the host (sign-in/sign-out)
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    session: Arc<RwLock<Session>>,
}

impl StaticIdentity {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let identity = Self::default();
        identity.sign_in(user_id, None);
        identity
    }

    pub fn sign_in(&self, user_id: impl Into<String>, access_token: Option<String>) {
        if let Ok(mut session) = self.session.write() {
            session.user_id = Some(user_id.into());
            session.access_token = access_token;
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut session) = self.session.write() {
            *session = Session::default();
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user_id(&self) -> Option<String> {
        self.session.read().ok().and_then(|s| s.user_id.clone())
    }

    async fn access_token(&self) -> Option<String> {
        self.session.read().ok().and_then(|s| s.access_token.clone())
    }
}
