//! Session authentication from `connection_init` parameters.

use std::collections::HashMap;

use herald_core::Principal;
use serde_json::{Map, Value};

/// Connection parameters that may carry a credential, checked in order.
/// Matching ignores ASCII case.
pub const AUTHORIZATION_PARAMS: [&str; 2] = ["X-Authorization", "Authorization"];

/// Resolves the user of a session from its connection parameters.
///
/// A principal returned here replaces the one attached to the WebSocket
/// upgrade for the rest of the session.
pub trait ConnectionAuthenticator: Send + Sync {
    /// `None` leaves the session with the upgrade principal.
    fn authenticate(&self, params: &Map<String, Value>) -> Option<Principal>;
}

/// Maps static bearer tokens to user names.
#[derive(Debug, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, Principal>,
}

impl TokenAuthenticator {
    /// Authenticator accepting each `(token, user)` pair.
    pub fn new<I, T, U>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, user)| (token.into(), Principal::new(user)))
                .collect(),
        }
    }

    /// Number of configured tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl ConnectionAuthenticator for TokenAuthenticator {
    fn authenticate(&self, params: &Map<String, Value>) -> Option<Principal> {
        let credential = credential(params)?;
        self.tokens.get(credential).cloned()
    }
}

/// The credential from the first authorization parameter present, with any
/// `Bearer ` prefix removed.
pub fn credential(params: &Map<String, Value>) -> Option<&str> {
    let raw = AUTHORIZATION_PARAMS.iter().find_map(|name| {
        params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_str())
    })?;
    let raw = raw.trim();
    let token = match raw.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => raw[7..].trim_start(),
        _ => raw,
    };
    (!token.is_empty()).then_some(token)
}
