//! SessionProvider port - 認証セッション
//!
//! The scheduler does not authenticate anyone. It only asks the host
//! application for the current token (sent in the channel handshake) and the
//! current user id (stamped on emitted events).

use std::sync::RwLock;

pub trait SessionProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    fn current_user_id(&self) -> Option<String>;
}

/// No signed-in user.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSession;

impl SessionProvider for AnonymousSession {
    fn token(&self) -> Option<String> {
        None
    }

    fn current_user_id(&self) -> Option<String> {
        None
    }
}

/// Session whose token/user can be replaced at runtime (sign-in, refresh).
#[derive(Debug, Default)]
pub struct StaticSession {
    inner: RwLock<SessionState>,
}

#[derive(Debug, Default, Clone)]
struct SessionState {
    token: Option<String>,
    user_id: Option<String>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(SessionState {
                token: Some(token.into()),
                user_id: Some(user_id.into()),
            }),
        }
    }

    pub fn replace(&self, token: Option<String>, user_id: Option<String>) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.token = token;
        state.user_id = user_id;
    }

    fn read(&self) -> SessionState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SessionProvider for StaticSession {
    fn token(&self) -> Option<String> {
        self.read().token
    }

    fn current_user_id(&self) -> Option<String> {
        self.read().user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_session_can_be_signed_out() {
        let session = StaticSession::new("tok", "user-1");
        assert_eq!(session.token().as_deref(), Some("tok"));

        session.replace(None, None);
        assert_eq!(session.token(), None);
        assert_eq!(session.current_user_id(), None);
    }
}
