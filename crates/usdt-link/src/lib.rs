pub mod bridge;

pub use bridge::{
    outcome_report, short_address, Pairing, PairingAttempt, StatusReport, TokenStore,
    TransferStatus, WalletBridge,
};
