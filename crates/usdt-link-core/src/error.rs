use thiserror::Error;

use crate::domain::{NetworkId, SessionStatus};
use crate::ports::PortError;
use crate::state_machine::SessionAction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount must be greater than 0")]
    NonPositive,
    #[error("invalid amount format: {0}")]
    Malformed(String),
    #[error("amount has more than {decimals} decimal places")]
    TooManyDecimals { decimals: u8 },
    #[error("amount exceeds balance of {balance}")]
    ExceedsBalance { balance: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("rejected by user")]
    UserRejected,
    #[error("insufficient funds for gas")]
    InsufficientGas,
    #[error("insufficient allowance")]
    InsufficientAllowance,
    #[error("{0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error("wallet already connected")]
    AlreadyConnected,
    #[error("connection attempt already in progress")]
    ConnectionInProgress,
    #[error("connection rejected by wallet")]
    ConnectionRejected,
    #[error("connection attempt cancelled")]
    ConnectionCancelled,
    #[error("wallet provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("wallet not connected")]
    NotConnected,
    #[error("session transport: {0}")]
    Session(#[from] PortError),
    #[error("balance query failed: {0}")]
    BalanceQueryFailed(String),
    #[error("receipt query failed: {0}")]
    ReceiptQueryFailed(String),
    #[error("failed to switch to {network}: {message}")]
    NetworkSwitchFailed { network: NetworkId, message: String },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("a transfer is already in flight")]
    TransferInFlight,
    #[error("transfer submission failed: {0}")]
    TransferSubmissionFailed(TransferFailure),
}

impl WalletError {
    /// Errors the host should swallow without telling the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, WalletError::ConnectionInProgress)
    }

    /// Field-level validation errors, resolved without touching the network.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidAddress(_) | WalletError::InvalidAmount(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            WalletError::UnknownNetwork(code) => format!("Unsupported network: {code}"),
            WalletError::AlreadyConnected => "Wallet is already connected".to_owned(),
            WalletError::ConnectionInProgress => String::new(),
            WalletError::ConnectionRejected => {
                "Connection was rejected. Please try again.".to_owned()
            }
            WalletError::ConnectionCancelled => "Connection cancelled".to_owned(),
            WalletError::ProviderUnavailable(_) => {
                "Wallet provider could not be initialized".to_owned()
            }
            WalletError::NotConnected => "Wallet not connected".to_owned(),
            WalletError::Session(e) => e.detail(),
            WalletError::BalanceQueryFailed(m) => format!("Failed to get USDT balance: {m}"),
            WalletError::ReceiptQueryFailed(m) => {
                format!("Failed to get transaction status: {m}")
            }
            WalletError::NetworkSwitchFailed { network, message } => {
                format!("Failed to switch to {network} network. {message}")
            }
            WalletError::InvalidAddress(_) => "Invalid wallet address".to_owned(),
            WalletError::InvalidAmount(AmountError::ExceedsBalance { .. }) => {
                "Insufficient USDT balance".to_owned()
            }
            WalletError::InvalidAmount(AmountError::TooManyDecimals { decimals }) => {
                format!("Amount supports at most {decimals} decimal places")
            }
            WalletError::InvalidAmount(AmountError::NonPositive) => {
                "Amount must be greater than 0".to_owned()
            }
            WalletError::InvalidAmount(AmountError::Malformed(_)) => {
                "Invalid amount format".to_owned()
            }
            WalletError::TransferInFlight => "A transfer is already pending".to_owned(),
            WalletError::TransferSubmissionFailed(reason) => match reason {
                TransferFailure::UserRejected => "Transaction rejected by user".to_owned(),
                TransferFailure::InsufficientGas => "Insufficient funds for gas fees".to_owned(),
                TransferFailure::InsufficientAllowance => "Insufficient USDT allowance".to_owned(),
                TransferFailure::Unknown(m) if m.is_empty() => {
                    "Transaction failed. Please try again.".to_owned()
                }
                TransferFailure::Unknown(m) => m.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal session transition: {from:?} --{action:?}-->")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub action: SessionAction,
}
