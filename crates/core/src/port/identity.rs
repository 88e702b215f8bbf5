// Identity Provider Port
//
// Key material never enters the core; only the public id does.

use crate::domain::Identity;
use std::sync::{PoisonError, RwLock};

/// Source of the identity acting on this client
pub trait IdentityProvider: Send + Sync {
    /// `None` when no identity is bound
    fn current_identity(&self) -> Option<Identity>;
}

/// Bindable session identity (login / logout)
#[derive(Default)]
pub struct SessionIdentity {
    current: RwLock<Option<Identity>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(identity: Identity) -> Self {
        Self {
            current: RwLock::new(Some(identity)),
        }
    }

    /// Bind `identity`, replacing any previous one
    pub fn bind(&self, identity: Identity) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(identity);
    }

    /// Unbind; returns the identity that was bound
    pub fn leave(&self) -> Option<Identity> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_identity(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
