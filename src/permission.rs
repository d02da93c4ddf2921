//! Microphone authorization precondition
//!
//! The recorder never asks the OS for permission. Whoever embeds it obtains
//! authorization first and reports the outcome through an
//! [`AuthorizationProvider`]; `start()` refuses to open the device unless the
//! provider answers [`Authorization::Granted`].

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Outcome of the caller's permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    Granted,
    Denied,
    /// The caller has not asked yet
    NotDetermined,
}

impl Authorization {
    pub fn from_granted(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

pub trait AuthorizationProvider: Send + Sync {
    fn microphone_authorization(&self) -> Authorization;
}

impl AuthorizationProvider for Authorization {
    fn microphone_authorization(&self) -> Authorization {
        *self
    }
}

/// Authorization that can change after the recorder was built
/// (e.g. the user revoked access in system settings).
#[derive(Debug, Clone)]
pub struct SharedAuthorization {
    inner: Arc<RwLock<Authorization>>,
}

impl SharedAuthorization {
    pub fn new(initial: Authorization) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn set(&self, value: Authorization) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = value;
        }
    }
}

impl Default for SharedAuthorization {
    fn default() -> Self {
        Self::new(Authorization::NotDetermined)
    }
}

impl AuthorizationProvider for SharedAuthorization {
    fn microphone_authorization(&self) -> Authorization {
        // A poisoned lock is treated as "no permission"
        self.inner
            .read()
            .map(|guard| *guard)
            .unwrap_or(Authorization::Denied)
    }
}
