use std::sync::Mutex;

use uuid::Uuid;

/// Identity boundary. The host environment owns authentication; the core
/// only ever asks who the current user is.
pub trait AuthProvider: Send + Sync {
    fn current_user_id(&self) -> Option<Uuid>;
}

/// Single-session provider for tests and embedded hosts.
#[derive(Default)]
pub struct SessionAuth {
    current: Mutex<Option<Uuid>>,
}

impl SessionAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: Uuid) -> Self {
        Self {
            current: Mutex::new(Some(user_id)),
        }
    }

    pub fn sign_in(&self, user_id: Uuid) {
        *self.current.lock().expect("auth lock poisoned") = Some(user_id);
    }

    /// Callers must also drop their listener subscriptions on sign-out;
    /// the core never shares state across identities beyond the store.
    pub fn sign_out(&self) {
        *self.current.lock().expect("auth lock poisoned") = None;
    }
}

impl AuthProvider for SessionAuth {
    fn current_user_id(&self) -> Option<Uuid> {
        *self.current.lock().expect("auth lock poisoned")
    }
}
