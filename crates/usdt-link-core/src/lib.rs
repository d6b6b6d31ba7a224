pub mod chain;
pub mod domain;
pub mod error;
pub mod networks;
pub mod ports;
pub mod session;
pub mod state_machine;
pub mod transfer;
pub mod units;

pub use chain::{classify_transfer_error, ChainBinding, ChainClient};
pub use domain::{
    NativeCurrency, NetworkDescriptor, NetworkId, ProposalNamespaces, SessionEvent,
    SessionPayload, SessionState, SessionStatus, TransferReceipt, TransferRequest,
    WalletSnapshot,
};
pub use error::{AmountError, TransferFailure, TransitionError, WalletError};
pub use networks::{by_chain_id, describe, describe_code, list_all};
pub use ports::{PortError, SessionStore, WalletTransport};
pub use session::{
    deep_link, extract_address, extract_chain_id, pairing_topic, SessionManager,
    SESSION_STORAGE_KEY,
};
pub use state_machine::{session_transition, SessionAction, StateTransition};
pub use transfer::{validate_address, validate_amount, TransferOrchestrator};
pub use units::{format_units, parse_units};
