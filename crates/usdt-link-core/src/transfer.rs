//! Validation and sequencing of user-initiated USDT transfers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use tracing::{debug, info};

use crate::chain::ChainClient;
use crate::domain::{NetworkId, TransferReceipt, TransferRequest};
use crate::error::{AmountError, WalletError};
use crate::networks::describe;
use crate::ports::{SessionStore, WalletTransport};
use crate::session::SessionManager;
use crate::units::{parse_units, scale_of};

/// Accepts `0x` + 40 hex digits. Mixed-case input must carry a valid EIP-55
/// checksum; all-lowercase and all-uppercase input is taken as is.
pub fn validate_address(raw: &str) -> Result<Address, WalletError> {
    let invalid = || WalletError::InvalidAddress(raw.to_owned());
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").ok_or_else(invalid)?;
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(trimmed, None).map_err(|_| invalid())
    } else {
        trimmed.parse().map_err(|_| invalid())
    }
}

/// Amount must be a positive decimal not exceeding `balance`. Compared
/// exactly at the finer of the two scales.
pub fn validate_amount(amount: &str, balance: &str) -> Result<(), AmountError> {
    let scale = scale_of(amount).max(scale_of(balance));
    let scale = u8::try_from(scale)
        .map_err(|_| AmountError::Malformed(format!("too many decimal places: {amount}")))?;

    let wanted = parse_units(amount, scale)?;
    if wanted.is_zero() {
        return Err(AmountError::NonPositive);
    }
    let available = parse_units(balance, scale)
        .map_err(|e| AmountError::Malformed(format!("balance {balance}: {e}")))?;
    if wanted > available {
        return Err(AmountError::ExceedsBalance {
            balance: balance.to_owned(),
        });
    }
    Ok(())
}

pub struct TransferOrchestrator<T, S> {
    session: SessionManager<T, S>,
    chain: Arc<ChainClient<T>>,
    balances: Mutex<HashMap<NetworkId, String>>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T, S> TransferOrchestrator<T, S>
where
    T: WalletTransport,
    S: SessionStore,
{
    pub fn new(session: SessionManager<T, S>, chain: Arc<ChainClient<T>>) -> Self {
        Self {
            session,
            chain,
            balances: Mutex::new(HashMap::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn account(&self) -> Result<Address, WalletError> {
        self.session
            .state()
            .account_address
            .and_then(|a| a.parse().ok())
            .ok_or(WalletError::NotConnected)
    }

    /// Most recently loaded token balance for `network`.
    pub fn cached_balance(&self, network: NetworkId) -> Option<String> {
        self.balances
            .lock()
            .ok()
            .and_then(|g| g.get(&network).cloned())
    }

    fn remember_balance(&self, network: NetworkId, balance: &str) {
        if let Ok(mut g) = self.balances.lock() {
            g.insert(network, balance.to_owned());
        }
    }

    /// Read the connected account's token balance and remember it for
    /// validation.
    pub async fn load_token_balance(&self, network: NetworkId) -> Result<String, WalletError> {
        let account = self.account()?;
        let balance = self.chain.get_token_balance(network, account).await?;
        self.remember_balance(network, &balance);
        Ok(balance)
    }

    /// Local checks only; never touches the network.
    pub fn validate(&self, request: &TransferRequest) -> Result<Address, WalletError> {
        let recipient = validate_address(&request.recipient_address)?;
        match self.cached_balance(request.network) {
            Some(balance) => validate_amount(&request.amount, &balance)?,
            None => {
                let scale = u8::try_from(scale_of(&request.amount))
                    .map_err(|_| AmountError::Malformed(request.amount.clone()))?;
                if parse_units(&request.amount, scale)?.is_zero() {
                    return Err(AmountError::NonPositive.into());
                }
            }
        }
        Ok(recipient)
    }

    pub async fn estimate_fee(&self, request: &TransferRequest) -> Result<String, WalletError> {
        let recipient = self.validate(request)?;
        let from = self.account()?;
        self.chain
            .estimate_transfer_fee(request.network, from, recipient, &request.amount)
            .await
    }

    /// Validate, bind to the target network, re-check the balance and submit.
    /// Failures are returned as-is; nothing is retried here.
    pub async fn submit(&self, request: &TransferRequest) -> Result<TransferReceipt, WalletError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WalletError::TransferInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let from = self.account()?;
        let recipient = self.validate(request)?;

        let target = describe(request.network);
        // The wallet may have moved chains on its own since the client bound.
        let wallet_chain = self.session.state().active_chain_id;
        if self.chain.active_chain_id() != Some(target.chain_id)
            || wallet_chain.is_some_and(|id| id != target.chain_id)
        {
            debug!(network = %request.network, ?wallet_chain, "switching network before transfer");
            self.chain.switch_network(request.network).await?;
        }

        // The displayed balance may be stale by now.
        let fresh = self.chain.get_token_balance(request.network, from).await?;
        self.remember_balance(request.network, &fresh);
        validate_amount(&request.amount, &fresh)?;
        let decimals = self.chain.token_decimals(request.network).await?;
        parse_units(&request.amount, decimals)?;

        let receipt = self
            .chain
            .submit_token_transfer(request.network, from, recipient, &request.amount)
            .await?;
        info!(tx_hash = %receipt.tx_hash, status = receipt.status_code, "transfer finished");
        Ok(receipt)
    }
}
