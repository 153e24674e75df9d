//! Configuration options for contexts and card connections

use serde::{Deserialize, Serialize};

use crate::types::{Protocol, Scope, ShareMode};

/// Options used when establishing a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Scope of the resource manager session
    pub scope: Scope,
}

impl ContextConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scope
    pub const fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// Options used when connecting to a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Sharing mode for the connection
    pub share_mode: ShareMode,

    /// Protocols the caller accepts
    pub protocols: Protocol,
}

impl ConnectOptions {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharing mode
    pub const fn with_share_mode(mut self, mode: ShareMode) -> Self {
        self.share_mode = mode;
        self
    }

    /// Set the preferred protocols
    pub const fn with_protocols(mut self, protocols: Protocol) -> Self {
        self.protocols = protocols;
        self
    }
}
