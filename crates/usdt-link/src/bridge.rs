//! Bridge between the host shell and the wallet crates.
//! This must remain the only host-facing boundary: everything crossing it is
//! either plain data or a user-facing message.

use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use usdt_link_adapters::{
    FileSessionStore, LinkAdapterConfig, MemorySessionStore, WalletConnectAdapter,
};
use usdt_link_core::{
    by_chain_id, deep_link, describe, list_all, validate_address, ChainBinding, ChainClient,
    NetworkDescriptor, NetworkId, PortError, SessionManager, SessionState, SessionStore,
    TransferOrchestrator, TransferReceipt, TransferRequest, WalletError,
};

/// Session token persistence chosen from configuration.
#[derive(Debug)]
pub enum TokenStore {
    File(FileSessionStore),
    Memory(MemorySessionStore),
}

impl SessionStore for TokenStore {
    fn load(&self, key: &str) -> Result<Option<String>, PortError> {
        match self {
            TokenStore::File(s) => s.load(key),
            TokenStore::Memory(s) => s.load(key),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PortError> {
        match self {
            TokenStore::File(s) => s.save(key, value),
            TokenStore::Memory(s) => s.save(key, value),
        }
    }

    fn remove(&self, key: &str) -> Result<(), PortError> {
        match self {
            TokenStore::File(s) => s.remove(key),
            TokenStore::Memory(s) => s.remove(key),
        }
    }
}

type LinkSession = SessionManager<WalletConnectAdapter, TokenStore>;
type LinkOrchestrator = TransferOrchestrator<WalletConnectAdapter, TokenStore>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: TransferStatus,
    pub message: String,
    pub explorer_url: Option<String>,
}

impl StatusReport {
    fn error(message: String) -> Self {
        Self {
            status: TransferStatus::Error,
            message,
            explorer_url: None,
        }
    }
}

/// `0x1234...abcd`
pub fn short_address(address: &str) -> String {
    if address.len() <= 10
        || !address.is_char_boundary(6)
        || !address.is_char_boundary(address.len() - 4)
    {
        return address.to_owned();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Status shown to the user once a submission settles.
pub fn outcome_report(
    request: &TransferRequest,
    outcome: &Result<TransferReceipt, WalletError>,
) -> StatusReport {
    match outcome {
        Ok(receipt) => {
            let explorer_url = Some(describe(request.network).tx_url(receipt.tx_hash));
            if receipt.succeeded() {
                StatusReport {
                    status: TransferStatus::Success,
                    message: format!(
                        "Successfully transferred {} USDT to {}",
                        request.amount,
                        short_address(&request.recipient_address)
                    ),
                    explorer_url,
                }
            } else {
                StatusReport {
                    status: TransferStatus::Error,
                    message: "Transaction reverted".to_owned(),
                    explorer_url,
                }
            }
        }
        Err(e) => StatusReport::error(e.user_message()),
    }
}

/// Outcome of [`WalletBridge::connect`], run in the background.
pub type PairingAttempt = JoinHandle<Result<Option<SessionState>, String>>;

/// First observable step of a pairing.
pub enum Pairing {
    /// A link is ready for the wallet; `attempt` resolves on its answer.
    Pending {
        link: Option<String>,
        attempt: PairingAttempt,
    },
    /// The attempt settled before any link was published.
    Settled(Result<Option<SessionState>, String>),
}

#[derive(Clone)]
pub struct WalletBridge {
    config: Arc<LinkAdapterConfig>,
    transport: Arc<WalletConnectAdapter>,
    session: LinkSession,
    chain: Arc<ChainClient<WalletConnectAdapter>>,
    orchestrator: Arc<LinkOrchestrator>,
    last_report: Arc<Mutex<StatusReport>>,
}

impl WalletBridge {
    pub fn new(config: LinkAdapterConfig) -> Result<Self, PortError> {
        let transport = Arc::new(WalletConnectAdapter::with_config(config.clone())?);
        let store = Arc::new(match config.session_store_path {
            Some(ref path) => TokenStore::File(FileSessionStore::new(path)),
            None => TokenStore::Memory(MemorySessionStore::default()),
        });
        let session =
            SessionManager::with_namespaces(Arc::clone(&transport), store, config.namespaces());
        let chain = Arc::new(
            ChainClient::new(Arc::clone(&transport))
                .with_receipt_poll_interval(config.receipt_poll_interval()),
        );
        let orchestrator = Arc::new(TransferOrchestrator::new(
            session.clone(),
            Arc::clone(&chain),
        ));
        Ok(Self {
            config: Arc::new(config),
            transport,
            session,
            chain,
            orchestrator,
            last_report: Arc::new(Mutex::new(StatusReport::default())),
        })
    }

    /// Wallet-side hooks of the deterministic peer.
    pub fn transport(&self) -> &Arc<WalletConnectAdapter> {
        &self.transport
    }

    pub fn networks(&self) -> &'static [NetworkDescriptor] {
        list_all()
    }

    /// Bring up the transport and start following its session events.
    pub async fn start(&self) -> Result<SessionState, String> {
        let state = self.session.initialize().await.map_err(|e| e.user_message())?;
        drop(self.session.spawn_event_loop());
        if let Some(network) = state.active_chain_id.and_then(by_chain_id).map(|d| d.id) {
            self.chain.bind(network).map_err(|e| e.user_message())?;
        }
        Ok(state)
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// `Ok(None)` when another attempt is already pending.
    pub async fn connect(&self) -> Result<Option<SessionState>, String> {
        match self.session.initiate_connection().await {
            Ok(state) => {
                if let Some(network) = state.active_chain_id.and_then(by_chain_id).map(|d| d.id) {
                    self.chain.bind(network).map_err(|e| e.user_message())?;
                }
                Ok(Some(state))
            }
            Err(e) if e.is_silent() => Ok(None),
            Err(e) => Err(e.user_message()),
        }
    }

    /// Start a pairing in the background and wait until its link is
    /// published or the attempt settles, whichever comes first.
    pub async fn begin_pairing(&self) -> Pairing {
        let mut updates = self.subscribe();
        let mut attempt = tokio::spawn({
            let bridge = self.clone();
            async move { bridge.connect().await }
        });
        tokio::select! {
            seen = async {
                updates
                    .wait_for(|s| s.pairing_uri.is_some() || s.is_connected())
                    .await
                    .map(|_| ())
            } => {
                if let Err(e) = seen {
                    warn!("session updates closed: {e}");
                }
                Pairing::Pending {
                    link: self.pairing_link(),
                    attempt,
                }
            }
            joined = &mut attempt => Pairing::Settled(
                joined.unwrap_or_else(|e| Err(format!("pairing task failed: {e}"))),
            ),
        }
    }

    /// Wallet deep link for the pending pairing, if any.
    pub fn pairing_link(&self) -> Option<String> {
        self.session
            .state()
            .pairing_uri
            .map(|uri| deep_link(&self.config.wallet_scheme, &uri))
    }

    pub fn cancel_connect(&self) -> SessionState {
        self.session.cancel_pending_connection().unwrap_or_else(|e| {
            warn!("cancel failed: {e}");
            self.session.state()
        })
    }

    pub async fn disconnect(&self) -> SessionState {
        self.session.teardown().await;
        self.session.state()
    }

    pub fn on_foreground(&self) -> SessionState {
        self.session.resync_on_foreground().unwrap_or_else(|e| {
            warn!("foreground resync failed: {e}");
            self.session.state()
        })
    }

    pub async fn select_network(&self, network: NetworkId) -> Result<ChainBinding, String> {
        self.chain
            .switch_network(network)
            .await
            .map_err(|e| e.user_message())
    }

    /// Token balance of the connected account.
    pub async fn token_balance(&self, network: NetworkId) -> Result<String, String> {
        self.orchestrator
            .load_token_balance(network)
            .await
            .map_err(|e| e.user_message())
    }

    /// Token balance of any address; needs no session.
    pub async fn token_balance_of(
        &self,
        network: NetworkId,
        address: &str,
    ) -> Result<String, String> {
        let owner: Address = validate_address(address).map_err(|e| e.user_message())?;
        self.chain
            .get_token_balance(network, owner)
            .await
            .map_err(|e| e.user_message())
    }

    pub async fn receipt(
        &self,
        network: NetworkId,
        tx_hash: &str,
    ) -> Result<Option<TransferReceipt>, String> {
        let hash: B256 = tx_hash
            .trim()
            .parse()
            .map_err(|_| format!("Invalid transaction hash: {tx_hash}"))?;
        self.chain.bind(network).map_err(|e| e.user_message())?;
        self.chain
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| e.user_message())
    }

    /// Field-level check of a transfer form; never touches the network.
    pub fn check(&self, request: &TransferRequest) -> Result<(), String> {
        self.orchestrator
            .validate(request)
            .map(|_| ())
            .map_err(|e| e.user_message())
    }

    pub async fn estimate_fee(&self, request: &TransferRequest) -> Result<String, String> {
        self.orchestrator
            .estimate_fee(request)
            .await
            .map_err(|e| e.user_message())
    }

    pub fn transfer_status(&self) -> StatusReport {
        if self.orchestrator.is_in_flight() {
            return StatusReport {
                status: TransferStatus::Pending,
                message: "Transaction pending...".to_owned(),
                explorer_url: None,
            };
        }
        self.last_report
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    fn record(&self, report: &StatusReport) {
        if let Ok(mut g) = self.last_report.lock() {
            *g = report.clone();
        }
    }

    pub async fn transfer(&self, request: &TransferRequest) -> StatusReport {
        if self.orchestrator.is_in_flight() {
            // Reported but not recorded: the pending transfer owns the status.
            return StatusReport::error(WalletError::TransferInFlight.user_message());
        }
        let outcome = self.orchestrator.submit(request).await;
        if matches!(outcome, Err(WalletError::TransferInFlight)) {
            return StatusReport::error(WalletError::TransferInFlight.user_message());
        }
        let report = outcome_report(request, &outcome);
        info!(status = ?report.status, "transfer settled");
        self.record(&report);
        report
    }
}
