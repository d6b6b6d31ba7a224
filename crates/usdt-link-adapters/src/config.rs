use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use usdt_link_core::{by_chain_id, describe, NetworkId, ProposalNamespaces};

const ENV_PREFIX: &str = "USDT_LINK_";

/// Metadata announced to the wallet when proposing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
    pub native_redirect: String,
    pub universal_redirect: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "MetaMask USDT App".to_owned(),
            description: "Transfer USDT tokens via MetaMask".to_owned(),
            url: "https://walletconnect.com".to_owned(),
            icons: vec!["https://avatars.githubusercontent.com/u/37784886".to_owned()],
            native_redirect: "metamaskusdtapp://".to_owned(),
            universal_redirect: "https://metamaskusdtapp.com".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkAdapterConfig {
    pub project_id: Option<String>,
    pub relay_url: String,
    /// Deep link scheme of the wallet app.
    pub wallet_scheme: String,
    pub metadata: AppMetadata,
    pub session_store_path: Option<PathBuf>,
    /// When set, wallet-signed methods are forwarded to this JSON-RPC bridge
    /// instead of the built-in deterministic peer.
    pub wallet_proxy_url: Option<String>,
    pub rpc_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub rpc_overrides: BTreeMap<u64, String>,
}

impl Default for LinkAdapterConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            relay_url: "wss://relay.walletconnect.com".to_owned(),
            wallet_scheme: "metamask".to_owned(),
            metadata: AppMetadata::default(),
            session_store_path: None,
            wallet_proxy_url: None,
            rpc_timeout_ms: 15_000,
            receipt_poll_interval_ms: 2_000,
            rpc_overrides: BTreeMap::new(),
        }
    }
}

impl LinkAdapterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from `USDT_LINK_*` variables resolved through `lookup`.
    /// Unparseable numbers keep their defaults.
    ///
    /// Recognised keys: `PROJECT_ID`, `RELAY_URL`, `WALLET_SCHEME`,
    /// `SESSION_STORE`, `WALLET_PROXY_URL`, `RPC_TIMEOUT_MS`,
    /// `RECEIPT_POLL_MS` and `RPC_<NETWORK CODE>` (e.g. `USDT_LINK_RPC_POL`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &str, default: u64| match get(name) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("ignoring {ENV_PREFIX}{name}={raw}: {e}");
                default
            }),
            None => default,
        };

        let defaults = Self::default();
        let mut rpc_overrides = BTreeMap::new();
        for network in NetworkId::ALL {
            if let Some(url) = get(&format!("RPC_{}", network.code())) {
                rpc_overrides.insert(describe(network).chain_id, url);
            }
        }

        Self {
            project_id: get("PROJECT_ID"),
            relay_url: get("RELAY_URL").unwrap_or(defaults.relay_url),
            wallet_scheme: get("WALLET_SCHEME").unwrap_or(defaults.wallet_scheme),
            metadata: defaults.metadata,
            session_store_path: get("SESSION_STORE").map(PathBuf::from),
            wallet_proxy_url: get("WALLET_PROXY_URL"),
            rpc_timeout_ms: number("RPC_TIMEOUT_MS", defaults.rpc_timeout_ms),
            receipt_poll_interval_ms: number(
                "RECEIPT_POLL_MS",
                defaults.receipt_poll_interval_ms,
            ),
            rpc_overrides,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Node endpoint for `chain_id`: override first, then the registry.
    pub fn rpc_url(&self, chain_id: u64) -> Option<String> {
        self.rpc_overrides
            .get(&chain_id)
            .cloned()
            .or_else(|| by_chain_id(chain_id).map(|d| d.rpc_url.to_owned()))
    }

    pub fn namespaces(&self) -> ProposalNamespaces {
        let mut namespaces = ProposalNamespaces::default();
        for (chain_id, url) in namespaces.rpc_map.iter_mut() {
            if let Some(custom) = self.rpc_overrides.get(chain_id) {
                url.clone_from(custom);
            }
        }
        namespaces
    }
}
