use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WalletError;

/// Supported networks, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkId {
    Sepolia,
    Ethereum,
    Polygon,
    Bnb,
}

impl NetworkId {
    pub const ALL: [NetworkId; 4] = [
        NetworkId::Sepolia,
        NetworkId::Ethereum,
        NetworkId::Polygon,
        NetworkId::Bnb,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            NetworkId::Sepolia => "SEPOLIA",
            NetworkId::Ethereum => "ETH",
            NetworkId::Polygon => "POL",
            NetworkId::Bnb => "BNB",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for NetworkId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NetworkId::ALL
            .into_iter()
            .find(|id| id.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WalletError::UnknownNetwork(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub id: NetworkId,
    pub chain_id: u64,
    pub chain_id_hex: &'static str,
    pub display_name: &'static str,
    pub rpc_url: &'static str,
    pub explorer_url: &'static str,
    pub native_currency: NativeCurrency,
    pub token_contract_address: Address,
}

impl NetworkDescriptor {
    /// CAIP-2 chain reference, e.g. `eip155:137`.
    pub fn caip2(&self) -> String {
        format!("eip155:{}", self.chain_id)
    }

    pub fn tx_url(&self, tx_hash: B256) -> String {
        format!("{}/tx/{}", self.explorer_url, tx_hash)
    }

    pub fn address_url(&self, address: Address) -> String {
        format!("{}/address/{}", self.explorer_url, address)
    }

    /// Parameter object for `wallet_addEthereumChain`.
    pub fn add_chain_params(&self) -> Value {
        serde_json::json!({
            "chainId": self.chain_id_hex,
            "chainName": self.display_name,
            "nativeCurrency": {
                "name": self.native_currency.name,
                "symbol": self.native_currency.symbol,
                "decimals": self.native_currency.decimals,
            },
            "rpcUrls": [self.rpc_url],
            "blockExplorerUrls": [self.explorer_url],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Observable connection state. `account_address` is set only while
/// `status == Connected`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub pairing_uri: Option<String>,
    pub account_address: Option<String>,
    pub active_chain_id: Option<u64>,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }
}

/// Settled session as reported by the pairing transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub topic: String,
    /// Topic of the proposal this session settled, when the transport knows it.
    #[serde(default)]
    pub pairing_topic: Option<String>,
    /// Namespace-qualified accounts, `<namespace>:<chainId>:<address>`.
    pub accounts: Vec<String>,
    #[serde(default)]
    pub peer_name: Option<String>,
}

/// Inbound messages from the pairing transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DisplayUri { uri: String },
    Connected { session: SessionPayload },
    Updated { topic: String, accounts: Vec<String> },
    Changed { topic: String, name: String, data: Value },
    Deleted { topic: String },
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub address: Address,
    pub chain_id: u64,
    pub native_balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub recipient_address: String,
    pub amount: String,
    pub network: NetworkId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_hash: B256,
    pub from_address: Address,
    pub to_address: Option<Address>,
    pub block_number: u64,
    pub gas_used: u64,
    pub status_code: u8,
}

impl TransferReceipt {
    pub fn succeeded(&self) -> bool {
        self.status_code == 1
    }
}

/// The `eip155` namespace requested when pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalNamespaces {
    pub methods: Vec<String>,
    pub chains: Vec<String>,
    pub events: Vec<String>,
    pub rpc_map: BTreeMap<u64, String>,
}

impl Default for ProposalNamespaces {
    fn default() -> Self {
        let mainnets = [NetworkId::Ethereum, NetworkId::Polygon, NetworkId::Bnb];
        Self {
            methods: [
                "eth_sendTransaction",
                "eth_signTransaction",
                "eth_sign",
                "personal_sign",
                "eth_signTypedData",
                "wallet_switchEthereumChain",
                "wallet_addEthereumChain",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            chains: mainnets
                .iter()
                .map(|id| crate::networks::describe(*id).caip2())
                .collect(),
            events: vec!["chainChanged".to_owned(), "accountsChanged".to_owned()],
            rpc_map: mainnets
                .iter()
                .map(|id| {
                    let d = crate::networks::describe(*id);
                    (d.chain_id, d.rpc_url.to_owned())
                })
                .collect(),
        }
    }
}
