use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{hex, keccak256, B256};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use usdt_link_core::{PortError, ProposalNamespaces, SessionEvent, SessionPayload, WalletTransport};

use crate::rpc::{post_json_rpc, HttpRpcAdapter};
use crate::LinkAdapterConfig;

const EVENT_CAPACITY: usize = 64;
const UNRECOGNIZED_CHAIN: i64 = 4902;

/// WalletConnect-style session transport.
///
/// Pairing produces a `wc:` URI for the wallet. In deterministic mode the
/// wallet side is driven in-process through the peer hooks
/// (`approve_pairing`, `reject_pairing`, ...); with `wallet_proxy_url`
/// configured, pairing and wallet methods are forwarded to that bridge.
/// Chain reads always go to the node over [`HttpRpcAdapter`].
#[derive(Debug, Clone)]
pub struct WalletConnectAdapter {
    config: Arc<LinkAdapterConfig>,
    mode: PeerMode,
    rpc: HttpRpcAdapter,
    events: broadcast::Sender<SessionEvent>,
    inner: Arc<Mutex<WalletConnectState>>,
}

#[derive(Debug, Clone)]
enum PeerMode {
    Deterministic,
    Proxy(ProxyRuntime),
}

#[derive(Debug, Clone)]
struct ProxyRuntime {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug)]
struct PendingPairing {
    topic: String,
    responder: oneshot::Sender<Result<SessionPayload, PortError>>,
}

#[derive(Debug)]
struct WalletConnectState {
    initialized: bool,
    session: Option<SessionPayload>,
    pairing: Option<PendingPairing>,
    pairing_uri: Option<String>,
    peer_chains: BTreeSet<u64>,
    tx_seq: u64,
    submitted: HashMap<B256, Value>,
}

impl Default for WalletConnectState {
    fn default() -> Self {
        Self {
            initialized: false,
            session: None,
            pairing: None,
            pairing_uri: None,
            // Chains a fresh MetaMask install knows without wallet_addEthereumChain.
            peer_chains: BTreeSet::from([1, 11_155_111]),
            tx_seq: 0,
            submitted: HashMap::new(),
        }
    }
}

impl WalletConnectAdapter {
    pub fn with_config(config: LinkAdapterConfig) -> Result<Self, PortError> {
        let rpc = HttpRpcAdapter::new(&config)?;
        let mode = match config.wallet_proxy_url {
            Some(ref base_url) => {
                match reqwest::Client::builder()
                    .timeout(config.rpc_timeout())
                    .build()
                {
                    Ok(client) => PeerMode::Proxy(ProxyRuntime {
                        base_url: base_url.clone(),
                        client,
                    }),
                    Err(e) => {
                        warn!("wallet proxy client unavailable, using deterministic peer: {e}");
                        PeerMode::Deterministic
                    }
                }
            }
            None => PeerMode::Deterministic,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            mode,
            rpc,
            events,
            inner: Arc::new(Mutex::new(WalletConnectState::default())),
        })
    }

    /// Replace the node client, e.g. to point reads at a local endpoint.
    pub fn with_rpc(mut self, rpc: HttpRpcAdapter) -> Self {
        self.rpc = rpc;
        self
    }

    pub fn is_proxied(&self) -> bool {
        matches!(self.mode, PeerMode::Proxy(_))
    }

    fn lock(&self) -> Result<MutexGuard<'_, WalletConnectState>, PortError> {
        self.inner
            .lock()
            .map_err(|e| PortError::Transport(format!("wc lock poisoned: {e}")))
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    pub fn pending_pairing_uri(&self) -> Option<String> {
        self.lock().ok().and_then(|g| g.pairing_uri.clone())
    }

    /// Peer hook: the wallet approves the pending proposal with `accounts`
    /// (`eip155:<chain>:<address>`).
    pub fn approve_pairing(&self, accounts: Vec<String>) -> Result<SessionPayload, PortError> {
        let (pairing, session) = {
            let mut g = self.lock()?;
            let pairing = g
                .pairing
                .take()
                .ok_or_else(|| PortError::NotFound("no pending pairing".to_owned()))?;
            let session = self.settle(&mut g, &pairing.topic, accounts, None)?;
            (pairing, session)
        };
        if pairing.responder.send(Ok(session.clone())).is_err() {
            debug!(topic = %session.topic, "pairing waiter gone before approval");
        }
        self.emit(SessionEvent::Connected {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Peer hook: the wallet declines the pending proposal.
    pub fn reject_pairing(&self, code: i64, message: &str) -> Result<(), PortError> {
        let pairing = {
            let mut g = self.lock()?;
            g.pairing_uri = None;
            g.pairing
                .take()
                .ok_or_else(|| PortError::NotFound("no pending pairing".to_owned()))?
        };
        let _ = pairing.responder.send(Err(PortError::Rpc {
            code,
            message: message.to_owned(),
        }));
        Ok(())
    }

    /// Peer hook: the wallet changed the accounts exposed to the session.
    pub fn emit_session_update(&self, accounts: Vec<String>) -> Result<(), PortError> {
        let topic = {
            let mut g = self.lock()?;
            let session = g
                .session
                .as_mut()
                .ok_or_else(|| PortError::NotFound("no active session".to_owned()))?;
            session.accounts = accounts.clone();
            session.topic.clone()
        };
        self.emit(SessionEvent::Updated { topic, accounts });
        Ok(())
    }

    /// Peer hook: the wallet moved to another chain.
    pub fn emit_chain_changed(&self, chain_id: u64) -> Result<(), PortError> {
        let topic = self
            .current_session()
            .map(|s| s.topic)
            .ok_or_else(|| PortError::NotFound("no active session".to_owned()))?;
        self.emit(SessionEvent::Changed {
            topic,
            name: "chainChanged".to_owned(),
            data: Value::String(format!("0x{chain_id:x}")),
        });
        Ok(())
    }

    /// Peer hook: the wallet ended the session.
    pub fn delete_session(&self) -> Result<(), PortError> {
        let session = self
            .lock()?
            .session
            .take()
            .ok_or_else(|| PortError::NotFound("no active session".to_owned()))?;
        self.emit(SessionEvent::Deleted {
            topic: session.topic,
        });
        Ok(())
    }

    /// Relay connection dropped.
    pub fn drop_connection(&self) -> Result<(), PortError> {
        self.lock()?.session = None;
        self.emit(SessionEvent::Disconnected);
        Ok(())
    }

    fn settle(
        &self,
        g: &mut WalletConnectState,
        pairing_topic: &str,
        accounts: Vec<String>,
        peer_name: Option<String>,
    ) -> Result<SessionPayload, PortError> {
        if accounts.is_empty() {
            return Err(PortError::Validation(
                "session must expose at least one account".to_owned(),
            ));
        }
        let session = SessionPayload {
            topic: hex::encode(keccak256(pairing_topic.as_bytes())),
            pairing_topic: Some(pairing_topic.to_owned()),
            accounts,
            peer_name: peer_name.or_else(|| Some("MetaMask Wallet".to_owned())),
        };
        g.session = Some(session.clone());
        g.pairing_uri = None;
        Ok(session)
    }

    fn proxy(&self) -> Option<&ProxyRuntime> {
        match &self.mode {
            PeerMode::Proxy(proxy) => Some(proxy),
            PeerMode::Deterministic => None,
        }
    }

    async fn proxy_call(
        &self,
        proxy: &ProxyRuntime,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> Result<Value, PortError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
            "chainId": format!("eip155:{chain_id}"),
        });
        post_json_rpc(&proxy.client, &proxy.base_url, &payload).await
    }

    fn is_wallet_method(&self, method: &str) -> bool {
        self.config.namespaces().methods.iter().any(|m| m == method)
    }

    fn deterministic_wallet_call(&self, method: &str, params: &Value) -> Result<Value, PortError> {
        let mut g = self.lock()?;
        match method {
            "wallet_switchEthereumChain" => {
                let target = chain_id_param(params)?;
                if !g.peer_chains.contains(&target) {
                    return Err(PortError::Rpc {
                        code: UNRECOGNIZED_CHAIN,
                        message: format!(
                            "Unrecognized chain ID \"0x{target:x}\". Try adding the chain using wallet_addEthereumChain first."
                        ),
                    });
                }
                let topic = g.session.as_ref().map(|s| s.topic.clone());
                drop(g);
                if let Some(topic) = topic {
                    self.emit(SessionEvent::Changed {
                        topic,
                        name: "chainChanged".to_owned(),
                        data: Value::String(format!("0x{target:x}")),
                    });
                }
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let target = chain_id_param(params)?;
                info!(chain_id = target, "peer registered chain");
                g.peer_chains.insert(target);
                Ok(Value::Null)
            }
            "eth_sendTransaction" => {
                let tx = params
                    .get(0)
                    .ok_or_else(|| PortError::Validation("transaction object missing".to_owned()))?;
                g.tx_seq = g.tx_seq.saturating_add(1);
                let mut seed = tx.to_string().into_bytes();
                seed.extend_from_slice(&g.tx_seq.to_be_bytes());
                let hash = keccak256(seed);
                let receipt = serde_json::json!({
                    "transactionHash": hash,
                    "from": tx.get("from").cloned().unwrap_or(Value::Null),
                    "to": tx.get("to").cloned().unwrap_or(Value::Null),
                    "blockNumber": format!("0x{:x}", g.tx_seq),
                    "gasUsed": "0xcb20",
                    "status": "0x1",
                });
                g.submitted.insert(hash, receipt);
                Ok(Value::String(hash.to_string()))
            }
            _ => Err(PortError::NotImplemented(
                "deterministic peer only handles chain management and transfers",
            )),
        }
    }

    fn local_receipt(&self, params: &Value) -> Option<Value> {
        let hash: B256 = params.get(0)?.as_str()?.parse().ok()?;
        self.lock().ok()?.submitted.get(&hash).cloned()
    }
}

#[async_trait]
impl WalletTransport for WalletConnectAdapter {
    async fn init(&self) -> Result<(), PortError> {
        if self.config.project_id.is_none() {
            return Err(PortError::Validation(
                "WalletConnect project id is not configured".to_owned(),
            ));
        }
        let relay = &self.config.relay_url;
        if !relay.starts_with("wss://") && !relay.starts_with("ws://") {
            return Err(PortError::Validation(format!(
                "relay url must be a websocket url: {relay}"
            )));
        }
        self.lock()?.initialized = true;
        debug!(%relay, proxied = self.is_proxied(), "wc transport ready");
        Ok(())
    }

    async fn connect(&self, namespaces: &ProposalNamespaces) -> Result<SessionPayload, PortError> {
        let topic = random_hex()?;
        let sym_key = random_hex()?;
        let uri = format!("wc:{topic}@2?relay-protocol=irn&symKey={sym_key}");

        let rx = {
            let mut g = self.lock()?;
            if !g.initialized {
                return Err(PortError::Transport("wc transport not initialized".to_owned()));
            }
            let (tx, rx) = oneshot::channel();
            // A newer proposal supersedes an unanswered one.
            if let Some(stale) = g.pairing.replace(PendingPairing {
                topic: topic.clone(),
                responder: tx,
            }) {
                debug!(topic = %stale.topic, "superseding unanswered pairing");
            }
            g.pairing_uri = Some(uri.clone());
            rx
        };
        info!(%topic, chains = ?namespaces.chains, "session proposed");
        self.emit(SessionEvent::DisplayUri { uri: uri.clone() });

        let Some(proxy) = self.proxy() else {
            return rx
                .await
                .map_err(|_| PortError::Transport("pairing abandoned by transport".to_owned()))?;
        };

        let proposal = serde_json::json!([{
            "uri": uri,
            "namespaces": { "eip155": namespaces },
            "metadata": self.config.metadata,
        }]);
        let answer = self.proxy_call(proxy, 1, "wc_sessionPropose", proposal).await;
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                let mut g = self.lock()?;
                g.pairing = None;
                g.pairing_uri = None;
                return Err(e);
            }
        };
        let accounts: Vec<String> = answer
            .get("accounts")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PortError::Validation(format!("invalid session accounts: {e}")))?
            .unwrap_or_default();
        let peer_name = answer
            .get("peerName")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let session = {
            let mut g = self.lock()?;
            g.pairing = None;
            self.settle(&mut g, &topic, accounts, peer_name)?
        };
        self.emit(SessionEvent::Connected {
            session: session.clone(),
        });
        Ok(session)
    }

    async fn disconnect(&self) -> Result<(), PortError> {
        let session = {
            let mut g = self.lock()?;
            g.pairing = None;
            g.pairing_uri = None;
            g.session.take()
        };
        let Some(session) = session else {
            return Ok(());
        };
        if let Some(proxy) = self.proxy() {
            self.proxy_call(
                proxy,
                1,
                "wc_sessionDelete",
                serde_json::json!([{ "topic": session.topic }]),
            )
            .await?;
        }
        info!(topic = %session.topic, "session closed");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn current_session(&self) -> Option<SessionPayload> {
        self.lock().ok().and_then(|g| g.session.clone())
    }

    async fn request(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> Result<Value, PortError> {
        if self.is_wallet_method(method) {
            if self.current_session().is_none() {
                return Err(PortError::Transport(format!(
                    "{method} requires an active wallet session"
                )));
            }
            return match self.proxy() {
                Some(proxy) => self.proxy_call(proxy, chain_id, method, params).await,
                None => self.deterministic_wallet_call(method, &params),
            };
        }

        if method == "eth_getTransactionReceipt" && self.proxy().is_none() {
            if let Some(receipt) = self.local_receipt(&params) {
                return Ok(receipt);
            }
        }
        self.rpc.call(chain_id, method, params).await
    }
}

fn chain_id_param(params: &Value) -> Result<u64, PortError> {
    let raw = params
        .get(0)
        .and_then(|p| p.get("chainId"))
        .and_then(Value::as_str)
        .ok_or_else(|| PortError::Validation("chainId parameter missing".to_owned()))?;
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| PortError::Validation(format!("chainId must be hex: {raw}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| PortError::Validation(format!("invalid chainId {raw}: {e}")))
}

fn random_hex() -> Result<String, PortError> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)
        .map_err(|e| PortError::Transport(format!("entropy unavailable: {e}")))?;
    Ok(hex::encode(buf))
}
