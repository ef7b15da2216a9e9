//! Authenticated principal attached to a session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the user a WebSocket session was authenticated as.
///
/// Set either by an upstream layer that inserts a `Principal` into the
/// upgrade request's extensions, or from the `connection_init` parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Create a principal from a user name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The user name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
