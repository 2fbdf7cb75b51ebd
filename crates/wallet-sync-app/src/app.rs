// Application event loop: wires the wallet bridge into the selection
// reconciler, and the selected account into a balance merge session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wallet_sync_core::{
    Address, Candidate, CandidateGroup, MergeResult, MergeSession, NetworkClient,
    PersistenceAdapter, SelectionReconciler, StreamMerger, ValueUpdate,
};

use crate::chain::{Chain, ChainSelection, Endpoints};
use crate::config::Config;
use crate::protocol::{BridgeMessage, BridgeStatus, UiUpdate, UserCommand, WalletPayload};
use crate::rpc::SolanaRpcClient;
use crate::ws_server::BridgeEvent;

pub const SELECTION_STORAGE_KEY: &str = "wallet-sync:selected-wallet-and-address";

/// Builds the network client for a cluster. The event loop calls this at
/// startup and again on every chain switch.
pub trait Connector: Send + 'static {
    type Client: NetworkClient<Subject = Address, Value = u64>;

    fn connect(&self, endpoints: Endpoints, commitment: &str) -> Self::Client;
}

/// Connects to real Solana RPC nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolanaConnector;

impl Connector for SolanaConnector {
    type Client = SolanaRpcClient;

    fn connect(&self, endpoints: Endpoints, commitment: &str) -> SolanaRpcClient {
        SolanaRpcClient::new(endpoints, commitment)
    }
}

/// A merge result tagged with the session generation it came from.
#[derive(Debug)]
pub struct BalanceEvent {
    pub generation: u64,
    pub address: Address,
    pub result: MergeResult<u64>,
}

/// Receivers fed by callbacks registered in [`AppState::new`].
pub struct AppChannels {
    pub selection_rx: mpsc::UnboundedReceiver<Option<Candidate>>,
    pub balance_rx: mpsc::UnboundedReceiver<BalanceEvent>,
}

pub struct AppState<K: Connector> {
    pub config: Config,
    pub chain: ChainSelection,
    pub reconciler: SelectionReconciler,
    pub bridge_status: BridgeStatus,
    /// Latest balance accepted for the current session.
    pub last_balance: Option<ValueUpdate<u64>>,
    /// Bumped whenever the balance session is replaced. Events carrying an
    /// older generation are discarded in `handle_balance_event`.
    pub balance_generation: u64,
    connector: K,
    merger: StreamMerger<K::Client>,
    balance_session: Option<MergeSession<Address>>,
    balance_tx: mpsc::UnboundedSender<BalanceEvent>,
}

impl<K: Connector> AppState<K> {
    pub fn new(
        config: Config,
        store: Arc<dyn PersistenceAdapter>,
        connector: K,
    ) -> (Self, AppChannels) {
        let chain = ChainSelection::load(Arc::clone(&store), config.default_chain);

        let (selection_tx, selection_rx) = mpsc::unbounded_channel();
        let mut reconciler = SelectionReconciler::new(store, SELECTION_STORAGE_KEY);
        reconciler.on_change(Box::new(move |selected| {
            let _ = selection_tx.send(selected.cloned());
        }));

        let client = connector.connect(config.endpoints(chain.current()), &config.commitment);
        let (balance_tx, balance_rx) = mpsc::unbounded_channel();

        let state = AppState {
            config,
            chain,
            reconciler,
            bridge_status: BridgeStatus::Disconnected,
            last_balance: None,
            balance_generation: 0,
            connector,
            merger: StreamMerger::new(Arc::new(client)),
            balance_session: None,
            balance_tx,
        };
        let channels = AppChannels {
            selection_rx,
            balance_rx,
        };
        (state, channels)
    }

    /// Address the balance session is currently tracking.
    pub fn tracked_address(&self) -> Option<&Address> {
        self.balance_session.as_ref().map(|s| s.subject())
    }

    /// Block explorer page for the selected account on the current chain.
    pub fn explorer_link(&self) -> Option<String> {
        let selected = self.reconciler.current()?;
        Some(self.chain.current().explorer_url(selected.address.as_str()))
    }

    pub fn stop_balance_session(&mut self) {
        if let Some(session) = self.balance_session.take() {
            session.cancel();
            debug!(address = %session.subject(), "balance session stopped");
        }
    }

    /// Cancel the balance session and wait for its tasks to wind down.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.balance_session.take() {
            session.cancel();
            session.finished().await;
        }
    }

    /// Replace the balance session with one for the current selection (or
    /// none, if nothing is selected).
    pub fn restart_balance_session(&mut self) {
        self.stop_balance_session();
        self.balance_generation += 1;
        self.last_balance = None;

        let Some(selected) = self.reconciler.current() else {
            return;
        };
        let address = selected.address.clone();
        let generation = self.balance_generation;
        let tx = self.balance_tx.clone();
        let tagged = address.clone();

        let session = self.merger.start(address.clone(), move |result| {
            let _ = tx.send(BalanceEvent {
                generation,
                address: tagged.clone(),
                result,
            });
        });
        info!(
            %address,
            generation,
            chain = %self.chain.current(),
            explorer = %self.explorer_link().unwrap_or_default(),
            "balance session started"
        );
        self.balance_session = Some(session);
    }

    /// Switch clusters: rebuild the client and restart the balance session.
    /// Returns `false` if `chain` was already selected.
    pub fn switch_chain(&mut self, chain: Chain) -> bool {
        if !self.chain.set(chain) {
            return false;
        }
        let client = self
            .connector
            .connect(self.config.endpoints(chain), &self.config.commitment);
        self.merger = StreamMerger::new(Arc::new(client));
        self.restart_balance_session();
        true
    }

    /// Apply one bridge message. Selection changes are reported separately
    /// through the selection channel.
    pub fn handle_bridge_message(&mut self, msg: BridgeMessage) -> Vec<UiUpdate> {
        match msg {
            BridgeMessage::WalletsChanged { wallets } => {
                let groups: Vec<CandidateGroup> =
                    wallets.into_iter().map(WalletPayload::into_group).collect();
                debug!(wallets = groups.len(), "wallet snapshot received");
                self.reconciler.on_candidates_changed(&groups);
                Vec::new()
            }
            BridgeMessage::SelectAccount { wallet, address } => {
                self.reconciler.select(Some(Candidate::new(wallet, address)));
                Vec::new()
            }
            BridgeMessage::ClearSelection => {
                self.reconciler.select(None);
                Vec::new()
            }
            BridgeMessage::SelectChain { chain } => match Chain::parse(&chain) {
                Some(chain) => {
                    if self.switch_chain(chain) {
                        vec![UiUpdate::Chain(chain)]
                    } else {
                        Vec::new()
                    }
                }
                None => {
                    warn!(%chain, "ignoring unknown chain from bridge");
                    Vec::new()
                }
            },
        }
    }

    /// Turn a merge result into a UI update, unless it belongs to a session
    /// that has since been replaced.
    pub fn handle_balance_event(&mut self, event: BalanceEvent) -> Option<UiUpdate> {
        if event.generation != self.balance_generation {
            debug!(
                event_generation = event.generation,
                current = self.balance_generation,
                "discarding balance event from replaced session"
            );
            return None;
        }

        match event.result {
            Ok(update) => {
                let ui = UiUpdate::Balance {
                    address: event.address,
                    slot: update.token.get(),
                    lamports: update.value,
                };
                self.last_balance = Some(update);
                Some(ui)
            }
            Err(e) => Some(UiUpdate::BalanceError {
                address: event.address,
                message: e.to_string(),
            }),
        }
    }
}

/// Run the event loop until a `Quit` command arrives or the command channel
/// closes.
pub async fn run<K: Connector>(
    mut bridge_rx: mpsc::Receiver<BridgeEvent>,
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState<K>,
    mut channels: AppChannels,
) -> anyhow::Result<()> {
    info!(chain = %state.chain.current(), "event loop started");
    let _ = ui_tx.send(UiUpdate::Chain(state.chain.current())).await;

    // When the bridge server stops, stop polling its channel instead of
    // spinning on `None`.
    let mut bridge_open = true;

    loop {
        tokio::select! {
            event = bridge_rx.recv(), if bridge_open => match event {
                Some(BridgeEvent::Connected { addr }) => {
                    info!(%addr, "bridge attached");
                    state.bridge_status = BridgeStatus::Connected;
                    let _ = ui_tx.send(UiUpdate::Bridge(BridgeStatus::Connected)).await;
                }
                Some(BridgeEvent::Disconnected { addr }) => {
                    info!(%addr, "bridge detached");
                    state.bridge_status = BridgeStatus::Disconnected;
                    let _ = ui_tx.send(UiUpdate::Bridge(BridgeStatus::Disconnected)).await;
                }
                Some(BridgeEvent::Message(msg)) => {
                    for update in state.handle_bridge_message(msg) {
                        let _ = ui_tx.send(update).await;
                    }
                }
                None => {
                    warn!("bridge channel closed");
                    bridge_open = false;
                }
            },

            Some(selected) = channels.selection_rx.recv() => {
                state.restart_balance_session();
                let _ = ui_tx.send(UiUpdate::Selection(selected)).await;
            }

            Some(event) = channels.balance_rx.recv() => {
                if let Some(update) = state.handle_balance_event(event) {
                    let _ = ui_tx.send(update).await;
                }
            }

            cmd = cmd_rx.recv() => match cmd {
                Some(UserCommand::Refresh) => {
                    info!("refreshing balance");
                    state.restart_balance_session();
                }
                Some(UserCommand::Quit) | None => {
                    info!("shutting down event loop");
                    break;
                }
            },
        }
    }

    state.shutdown().await;
    Ok(())
}
