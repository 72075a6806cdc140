//! Versioned schema migrations shipped by a plugin.

use serde::{Deserialize, Serialize};

/// A one-time schema change scoped to the plugin's own schema.
///
/// `up` may contain several `;`-terminated statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub up: String,
}

impl Migration {
    pub fn new(version: u32, name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            up: up.into(),
        }
    }
}
