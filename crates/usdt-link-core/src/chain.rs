//! Chain access bound to the wallet session: balances, network switching,
//! ERC-20 transfers and receipts.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::sol;
use alloy::sol_types::SolCall;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{NetworkDescriptor, NetworkId, TransferReceipt, WalletSnapshot};
use crate::error::{TransferFailure, WalletError};
use crate::networks::describe;
use crate::ports::{PortError, WalletTransport};
use crate::units::{format_units, parse_units};

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function decimals() external view returns (uint8 value);
        function transfer(address to, uint256 amount) external returns (bool success);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

const UNRECOGNIZED_CHAIN: i64 = 4902;
const USER_REJECTED: i64 = 4001;
const DEFAULT_RECEIPT_POLL: Duration = Duration::from_secs(2);
const FALLBACK_GAS_PRICE_WEI: u64 = 20_000_000_000;

/// Network the client is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBinding {
    pub network: NetworkId,
    pub chain_id: u64,
}

impl ChainBinding {
    fn of(descriptor: &NetworkDescriptor) -> Self {
        Self {
            network: descriptor.id,
            chain_id: descriptor.chain_id,
        }
    }
}

pub struct ChainClient<T> {
    transport: Arc<T>,
    binding: Mutex<Option<ChainBinding>>,
    receipt_poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    from: Address,
    #[serde(default)]
    to: Option<Address>,
    block_number: U64,
    gas_used: U256,
    #[serde(default)]
    status: Option<U64>,
}

impl From<RpcReceipt> for TransferReceipt {
    fn from(r: RpcReceipt) -> Self {
        Self {
            tx_hash: r.transaction_hash,
            from_address: r.from,
            to_address: r.to,
            block_number: r.block_number.to::<u64>(),
            gas_used: r.gas_used.saturating_to::<u64>(),
            status_code: r.status.map(|s| s.saturating_to::<u8>()).unwrap_or(0),
        }
    }
}

impl<T: WalletTransport> ChainClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            binding: Mutex::new(None),
            receipt_poll_interval: DEFAULT_RECEIPT_POLL,
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    pub fn binding(&self) -> Option<ChainBinding> {
        self.binding.lock().ok().and_then(|g| *g)
    }

    pub fn active_chain_id(&self) -> Option<u64> {
        self.binding().map(|b| b.chain_id)
    }

    /// Bind without asking the wallet, e.g. to the chain a session settled on.
    pub fn bind(&self, network: NetworkId) -> Result<ChainBinding, WalletError> {
        let binding = ChainBinding::of(describe(network));
        let mut g = self
            .binding
            .lock()
            .map_err(|e| PortError::Transport(format!("chain binding lock poisoned: {e}")))?;
        *g = Some(binding);
        debug!(network = %network, chain_id = binding.chain_id, "chain client bound");
        Ok(binding)
    }

    fn bound(&self) -> Result<ChainBinding, WalletError> {
        self.binding().ok_or(WalletError::NotConnected)
    }

    /// Ask the wallet to switch chains, registering the chain first when the
    /// wallet does not know it, then rebind.
    pub async fn switch_network(&self, network: NetworkId) -> Result<ChainBinding, WalletError> {
        let target = describe(network);
        let route = self.active_chain_id().unwrap_or(target.chain_id);
        let switch_params = serde_json::json!([{ "chainId": target.chain_id_hex }]);
        let failed = |e: PortError| WalletError::NetworkSwitchFailed {
            network,
            message: e.detail(),
        };

        match self
            .transport
            .request(route, "wallet_switchEthereumChain", switch_params.clone())
            .await
        {
            Ok(_) => {}
            Err(e) if is_unrecognized_chain(&e) => {
                info!(network = %network, "wallet does not know chain, adding it");
                self.transport
                    .request(
                        route,
                        "wallet_addEthereumChain",
                        serde_json::json!([target.add_chain_params()]),
                    )
                    .await
                    .map_err(failed)?;
                self.transport
                    .request(target.chain_id, "wallet_switchEthereumChain", switch_params)
                    .await
                    .map_err(failed)?;
            }
            Err(e) => return Err(failed(e)),
        }

        self.bind(network)
    }

    pub async fn get_native_balance(&self, address: Address) -> Result<String, WalletError> {
        let binding = self
            .bound()
            .map_err(|_| WalletError::BalanceQueryFailed("no network bound".to_owned()))?;
        let decimals = describe(binding.network).native_currency.decimals;
        let raw = self
            .transport
            .request(
                binding.chain_id,
                "eth_getBalance",
                serde_json::json!([address, "latest"]),
            )
            .await
            .map_err(|e| WalletError::BalanceQueryFailed(e.detail()))?;
        let wei = parse_quantity(&raw).map_err(|e| WalletError::BalanceQueryFailed(e.detail()))?;
        Ok(format_units(wei, decimals))
    }

    pub async fn snapshot(&self, address: Address) -> Result<WalletSnapshot, WalletError> {
        let binding = self.bound()?;
        let native_balance = self.get_native_balance(address).await?;
        Ok(WalletSnapshot {
            address,
            chain_id: binding.chain_id,
            native_balance,
        })
    }

    pub async fn token_decimals(&self, network: NetworkId) -> Result<u8, WalletError> {
        let d = describe(network);
        self.call(d.chain_id, d.token_contract_address, IERC20::decimalsCall {})
            .await
            .map(|r| r.value)
            .map_err(|e| WalletError::BalanceQueryFailed(e.detail()))
    }

    /// Token balance scaled by the contract's `decimals`.
    pub async fn get_token_balance(
        &self,
        network: NetworkId,
        address: Address,
    ) -> Result<String, WalletError> {
        let d = describe(network);
        let raw = self
            .call(
                d.chain_id,
                d.token_contract_address,
                IERC20::balanceOfCall { owner: address },
            )
            .await
            .map_err(|e| WalletError::BalanceQueryFailed(e.detail()))?
            .balance;
        let decimals = self.token_decimals(network).await?;
        Ok(format_units(raw, decimals))
    }

    /// Estimated network fee for the transfer, in the native currency.
    pub async fn estimate_transfer_fee(
        &self,
        network: NetworkId,
        from: Address,
        to: Address,
        amount: &str,
    ) -> Result<String, WalletError> {
        let d = describe(network);
        let decimals = self.token_decimals(network).await?;
        let value = parse_units(amount, decimals)?;
        let tx = transfer_tx(d, from, to, value);

        let gas = self
            .transport
            .request(d.chain_id, "eth_estimateGas", serde_json::json!([tx]))
            .await
            .and_then(|v| parse_quantity(&v))
            .map_err(|e| WalletError::TransferSubmissionFailed(classify_transfer_error(&e)))?;
        let gas_price = match self
            .transport
            .request(d.chain_id, "eth_gasPrice", serde_json::json!([]))
            .await
            .and_then(|v| parse_quantity(&v))
        {
            Ok(price) if !price.is_zero() => price,
            Ok(_) => U256::from(FALLBACK_GAS_PRICE_WEI),
            Err(e) => {
                debug!("gas price unavailable, using fallback: {e}");
                U256::from(FALLBACK_GAS_PRICE_WEI)
            }
        };
        Ok(format_units(
            gas.saturating_mul(gas_price),
            d.native_currency.decimals,
        ))
    }

    /// Submit `transfer(to, amount)` on the network's token contract and wait
    /// until it is mined.
    pub async fn submit_token_transfer(
        &self,
        network: NetworkId,
        from: Address,
        to: Address,
        amount: &str,
    ) -> Result<TransferReceipt, WalletError> {
        let d = describe(network);
        let submit_failed =
            |e: &PortError| WalletError::TransferSubmissionFailed(classify_transfer_error(e));

        let decimals = self
            .call(d.chain_id, d.token_contract_address, IERC20::decimalsCall {})
            .await
            .map_err(|e| submit_failed(&e))?
            .value;
        let value = parse_units(amount, decimals).map_err(|e| {
            WalletError::TransferSubmissionFailed(TransferFailure::Unknown(e.to_string()))
        })?;

        info!(network = %network, %to, amount, "submitting token transfer");
        let result = self
            .transport
            .request(
                d.chain_id,
                "eth_sendTransaction",
                serde_json::json!([transfer_tx(d, from, to, value)]),
            )
            .await
            .map_err(|e| submit_failed(&e))?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| PortError::Validation("eth_sendTransaction must return hash".to_owned()))
            .and_then(|s| {
                B256::from_str(s)
                    .map_err(|e| PortError::Validation(format!("invalid tx hash: {e}")))
            })
            .map_err(|e| submit_failed(&e))?;
        info!(%tx_hash, "transfer submitted, waiting for confirmation");

        loop {
            match self.receipt_on(d.chain_id, tx_hash).await {
                Ok(Some(receipt)) => {
                    info!(%tx_hash, block = receipt.block_number, status = receipt.status_code, "transfer mined");
                    return Ok(receipt);
                }
                Ok(None) => tokio::time::sleep(self.receipt_poll_interval).await,
                Err(e) => {
                    return Err(WalletError::TransferSubmissionFailed(TransferFailure::Unknown(
                        e.detail(),
                    )))
                }
            }
        }
    }

    /// Single lookup on the bound chain. `None` while not yet mined.
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TransferReceipt>, WalletError> {
        let binding = self.bound()?;
        self.receipt_on(binding.chain_id, tx_hash)
            .await
            .map_err(|e| WalletError::ReceiptQueryFailed(e.detail()))
    }

    async fn receipt_on(
        &self,
        chain_id: u64,
        tx_hash: B256,
    ) -> Result<Option<TransferReceipt>, PortError> {
        let raw = self
            .transport
            .request(
                chain_id,
                "eth_getTransactionReceipt",
                serde_json::json!([tx_hash]),
            )
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        let receipt: RpcReceipt = serde_json::from_value(raw)
            .map_err(|e| PortError::Validation(format!("malformed receipt: {e}")))?;
        Ok(Some(receipt.into()))
    }

    async fn call<C: SolCall>(
        &self,
        chain_id: u64,
        to: Address,
        call: C,
    ) -> Result<C::Return, PortError> {
        let data = Bytes::from(call.abi_encode());
        let raw = self
            .transport
            .request(
                chain_id,
                "eth_call",
                serde_json::json!([{ "to": to, "data": data }, "latest"]),
            )
            .await?;
        let hex = raw
            .as_str()
            .ok_or_else(|| PortError::Validation("eth_call must return hex string".to_owned()))?;
        let bytes = Bytes::from_str(hex)
            .map_err(|e| PortError::Validation(format!("invalid eth_call result: {e}")))?;
        C::abi_decode_returns(&bytes, true)
            .map_err(|e| PortError::Validation(format!("{} decode failed: {e}", C::SIGNATURE)))
    }
}

fn transfer_tx(d: &NetworkDescriptor, from: Address, to: Address, value: U256) -> Value {
    let data = Bytes::from(IERC20::transferCall { to, amount: value }.abi_encode());
    serde_json::json!({
        "from": from,
        "to": d.token_contract_address,
        "data": data,
        "value": "0x0",
    })
}

fn is_unrecognized_chain(e: &PortError) -> bool {
    e.rpc_code() == Some(UNRECOGNIZED_CHAIN)
        || e.detail().to_ascii_lowercase().contains("unrecognized chain")
}

fn parse_quantity(value: &Value) -> Result<U256, PortError> {
    let raw = value
        .as_str()
        .ok_or_else(|| PortError::Validation(format!("quantity must be hex string: {value}")))?;
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| PortError::Validation(format!("quantity missing 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| PortError::Validation(format!("invalid quantity {raw}: {e}")))
}

/// Map a wallet/node failure to the user-facing transfer failure reason.
pub fn classify_transfer_error(e: &PortError) -> TransferFailure {
    let detail = e.detail();
    let lower = detail.to_ascii_lowercase();
    if e.rpc_code() == Some(USER_REJECTED)
        || lower.contains("action_rejected")
        || lower.contains("user rejected")
        || lower.contains("user denied")
    {
        return TransferFailure::UserRejected;
    }
    if lower.contains("insufficient allowance") {
        return TransferFailure::InsufficientAllowance;
    }
    if lower.contains("insufficient funds") {
        return TransferFailure::InsufficientGas;
    }
    warn!("unclassified transfer failure: {e}");
    TransferFailure::Unknown(detail)
}
