//! Static registry of the supported networks and their USDT contracts.

use alloy::primitives::address;

use crate::domain::{NativeCurrency, NetworkDescriptor, NetworkId};
use crate::error::WalletError;

static NETWORKS: [NetworkDescriptor; 4] = [
    NetworkDescriptor {
        id: NetworkId::Sepolia,
        chain_id: 11_155_111,
        chain_id_hex: "0xaa36a7",
        display_name: "Sepolia Testnet",
        rpc_url: "https://rpc.sepolia.org",
        explorer_url: "https://sepolia.etherscan.io",
        native_currency: NativeCurrency {
            name: "Sepolia ETH",
            symbol: "ETH",
            decimals: 18,
        },
        // Aave faucet USDT
        token_contract_address: address!("aA8E23Fb1079EA71e0a56F48a2aA51851D8433D0"),
    },
    NetworkDescriptor {
        id: NetworkId::Ethereum,
        chain_id: 1,
        chain_id_hex: "0x1",
        display_name: "Ethereum Mainnet",
        rpc_url: "https://eth.llamarpc.com",
        explorer_url: "https://etherscan.io",
        native_currency: NativeCurrency {
            name: "Ethereum",
            symbol: "ETH",
            decimals: 18,
        },
        token_contract_address: address!("dAC17F958D2ee523a2206206994597C13D831ec7"),
    },
    NetworkDescriptor {
        id: NetworkId::Polygon,
        chain_id: 137,
        chain_id_hex: "0x89",
        display_name: "Polygon Mainnet",
        rpc_url: "https://polygon-rpc.com",
        explorer_url: "https://polygonscan.com",
        native_currency: NativeCurrency {
            name: "MATIC",
            symbol: "MATIC",
            decimals: 18,
        },
        token_contract_address: address!("c2132D05D31c914a87C6611C10748AEb04B58e8F"),
    },
    NetworkDescriptor {
        id: NetworkId::Bnb,
        chain_id: 56,
        chain_id_hex: "0x38",
        display_name: "BNB Smart Chain",
        rpc_url: "https://bsc-dataseed1.binance.org",
        explorer_url: "https://bscscan.com",
        native_currency: NativeCurrency {
            name: "BNB",
            symbol: "BNB",
            decimals: 18,
        },
        token_contract_address: address!("55d398326f99059fF775485246999027B3197955"),
    },
];

pub fn describe(id: NetworkId) -> &'static NetworkDescriptor {
    // NETWORKS is laid out in NetworkId::ALL order.
    &NETWORKS[id as usize]
}

/// Lookup by the external network code (`SEPOLIA`, `ETH`, `POL`, `BNB`).
pub fn describe_code(code: &str) -> Result<&'static NetworkDescriptor, WalletError> {
    code.parse::<NetworkId>().map(describe)
}

pub fn list_all() -> &'static [NetworkDescriptor] {
    &NETWORKS
}

pub fn by_chain_id(chain_id: u64) -> Option<&'static NetworkDescriptor> {
    NETWORKS.iter().find(|n| n.chain_id == chain_id)
}
