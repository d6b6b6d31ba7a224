use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::{ProposalNamespaces, SessionEvent, SessionPayload};

#[derive(Debug, Clone, Error)]
pub enum PortError {
    #[error("port not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl PortError {
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            PortError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Message without the variant prefix, for user-facing text.
    pub fn detail(&self) -> String {
        match self {
            PortError::NotImplemented(what) => (*what).to_owned(),
            PortError::Transport(m)
            | PortError::Validation(m)
            | PortError::NotFound(m)
            | PortError::Rpc { message: m, .. } => m.clone(),
        }
    }
}

/// Wallet pairing/session transport. Everything the core needs from a
/// WalletConnect-style provider and nothing more.
#[async_trait]
pub trait WalletTransport: Send + Sync {
    /// Prepare the transport (relay connection, stored sessions).
    async fn init(&self) -> Result<(), PortError>;

    /// Propose a session. Emits [`SessionEvent::DisplayUri`] once the pairing
    /// URI is known and resolves when the peer approves or rejects.
    async fn connect(&self, namespaces: &ProposalNamespaces) -> Result<SessionPayload, PortError>;

    async fn disconnect(&self) -> Result<(), PortError>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Session retained by the transport, if any.
    fn current_session(&self) -> Option<SessionPayload>;

    /// JSON-RPC request routed to `chain_id`. Wallet methods go to the peer,
    /// reads go to the chain's node.
    async fn request(&self, chain_id: u64, method: &str, params: Value)
        -> Result<Value, PortError>;
}

/// Key/value persistence for the cached session token.
pub trait SessionStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, PortError>;
    fn save(&self, key: &str, value: &str) -> Result<(), PortError>;
    fn remove(&self, key: &str) -> Result<(), PortError>;
}
