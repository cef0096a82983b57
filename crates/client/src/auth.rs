//! Bearer token supply for authenticated requests.
//!
//! Read on every REST call and socket subscription, so a token replaced
//! after sign-in or refresh takes effect without rebuilding the clients.

use std::sync::RwLock;

/// Source of the current bearer token. `None` means signed out.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A token that can be replaced at runtime (sign-in, refresh, sign-out).
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
        }
    }

    pub fn set(&self, token: Option<String>) {
        let mut slot = self
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = token.filter(|t| !t.trim().is_empty());
    }
}

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
