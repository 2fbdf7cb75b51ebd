// End-to-end tests: a wallet bridge client talking to the real bridge server,
// the event loop, a SQLite store, and a local node serving balances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use wallet_sync_app::app::{self, AppState, Connector, SELECTION_STORAGE_KEY};
use wallet_sync_app::chain::{Chain, Endpoints, CHAIN_STORAGE_KEY};
use wallet_sync_app::config::Config;
use wallet_sync_app::protocol::{BridgeStatus, UiUpdate, UserCommand};
use wallet_sync_app::ws_server;
use wallet_sync_core::db::SqliteStore;
use wallet_sync_core::{
    Address, Candidate, NetworkClient, PersistenceAdapter, UpdateStream, ValueUpdate,
};

// ===========================================================================
// Local node
// ===========================================================================

/// Balances keyed by address, plus a push feed of `(address, slot, lamports)`.
struct LocalNode {
    balances: Mutex<HashMap<String, (u64, u64)>>,
    feed: broadcast::Sender<(String, u64, u64)>,
}

impl LocalNode {
    fn new() -> Arc<Self> {
        let (feed, _) = broadcast::channel(64);
        Arc::new(LocalNode {
            balances: Mutex::new(HashMap::new()),
            feed,
        })
    }

    fn set(&self, address: &str, slot: u64, lamports: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), (slot, lamports));
    }

    fn push(&self, address: &str, slot: u64, lamports: u64) {
        self.set(address, slot, lamports);
        let _ = self.feed.send((address.to_string(), slot, lamports));
    }
}

struct LocalClient(Arc<LocalNode>);

#[async_trait]
impl NetworkClient for LocalClient {
    type Subject = Address;
    type Value = u64;

    async fn fetch_current_value(&self, address: &Address) -> anyhow::Result<ValueUpdate<u64>> {
        let balances = self.0.balances.lock().unwrap();
        let (slot, lamports) = balances
            .get(address.as_str())
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no account {address}"))?;
        Ok(ValueUpdate::new(slot, lamports))
    }

    async fn subscribe_to_updates(&self, address: &Address) -> anyhow::Result<UpdateStream<u64>> {
        let wanted = address.to_string();
        let rx = self.0.feed.subscribe();
        Ok(stream::unfold(rx, move |mut rx| {
            let wanted = wanted.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok((addr, slot, lamports)) if addr == wanted => {
                            return Some((Ok(ValueUpdate::new(slot, lamports)), rx));
                        }
                        Ok(_) => continue,
                        Err(_) => return None,
                    }
                }
            }
        })
        .boxed())
    }
}

#[derive(Clone)]
struct LocalConnector(Arc<LocalNode>);

impl Connector for LocalConnector {
    type Client = LocalClient;

    fn connect(&self, _endpoints: Endpoints, _commitment: &str) -> LocalClient {
        LocalClient(Arc::clone(&self.0))
    }
}

// ===========================================================================
// Harness
// ===========================================================================

fn config(db_path: &str) -> Config {
    Config {
        default_chain: Chain::Devnet,
        bridge_port: 1,
        db_path: db_path.to_string(),
        commitment: "confirmed".into(),
        endpoint_overrides: HashMap::new(),
    }
}

struct Running {
    bridge_url: String,
    ui_rx: mpsc::Receiver<UiUpdate>,
    cmd_tx: mpsc::Sender<UserCommand>,
    app: tokio::task::JoinHandle<anyhow::Result<()>>,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn next(&mut self) -> UiUpdate {
        tokio::time::timeout(Duration::from_secs(5), self.ui_rx.recv())
            .await
            .expect("timed out waiting for UI update")
            .expect("UI channel closed")
    }

    /// Skip updates until one matches.
    async fn until(&mut self, pred: impl Fn(&UiUpdate) -> bool) -> UiUpdate {
        loop {
            let update = self.next().await;
            if pred(&update) {
                return update;
            }
        }
    }

    async fn stop(self) {
        self.cmd_tx.send(UserCommand::Quit).await.unwrap();
        self.app.await.unwrap().unwrap();
        self.server.abort();
    }
}

async fn start(store: Arc<SqliteStore>, node: Arc<LocalNode>) -> Running {
    let (state, channels) = AppState::new(config(":memory:"), store, LocalConnector(node));

    let listener = ws_server::bind(0).await.unwrap();
    let bridge_url = format!("ws://{}", listener.local_addr().unwrap());
    let (bridge_tx, bridge_rx) = mpsc::channel(64);
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (ui_tx, ui_rx) = mpsc::channel(256);

    let server = tokio::spawn(ws_server::serve(listener, bridge_tx));
    let app = tokio::spawn(app::run(bridge_rx, cmd_rx, ui_tx, state, channels));

    Running {
        bridge_url,
        ui_rx,
        cmd_tx,
        app,
        server,
    }
}

fn temp_db(name: &str) -> (Arc<SqliteStore>, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("wallet_sync_app_it_{name}.db"));
    let _ = std::fs::remove_file(&path);
    let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
    (Arc::new(store), path)
}

fn is_balance(update: &UiUpdate) -> bool {
    matches!(update, UiUpdate::Balance { .. })
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn bridge_selection_drives_live_balance() {
    let (store, path) = temp_db("live");
    let node = LocalNode::new();
    node.set("A1", 100, 1_000_000_000);
    node.set("A2", 100, 2_000_000_000);

    let mut running = start(Arc::clone(&store), Arc::clone(&node)).await;
    assert_eq!(running.next().await, UiUpdate::Chain(Chain::Devnet));

    let (mut bridge, _) = tokio_tungstenite::connect_async(running.bridge_url.as_str())
        .await
        .unwrap();
    assert_eq!(running.next().await, UiUpdate::Bridge(BridgeStatus::Connected));

    bridge
        .send(Message::Text(
            r#"{"type":"WALLETS_CHANGED","wallets":[{"name":"Phantom","accounts":["A1","A2"]}]}"#.into(),
        ))
        .await
        .unwrap();
    bridge
        .send(Message::Text(
            r#"{"type":"SELECT_ACCOUNT","wallet":"Phantom","address":"A2"}"#.into(),
        ))
        .await
        .unwrap();

    assert_eq!(
        running.next().await,
        UiUpdate::Selection(Some(Candidate::new("Phantom", "A2")))
    );
    assert_eq!(
        running.until(is_balance).await,
        UiUpdate::Balance {
            address: Address::from("A2"),
            slot: 100,
            lamports: 2_000_000_000
        }
    );

    // The subscription task opens its feed independently of the fetch.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Pushes for other accounts are ignored; newer pushes for A2 land.
    node.push("A1", 101, 5);
    node.push("A2", 102, 2_500_000_000);
    assert_eq!(
        running.until(is_balance).await,
        UiUpdate::Balance {
            address: Address::from("A2"),
            slot: 102,
            lamports: 2_500_000_000
        }
    );

    assert_eq!(
        store.get(SELECTION_STORAGE_KEY).unwrap().as_deref(),
        Some("Phantom:A2")
    );

    bridge.close(None).await.unwrap();
    assert_eq!(
        running.until(|u| matches!(u, UiUpdate::Bridge(_))).await,
        UiUpdate::Bridge(BridgeStatus::Disconnected)
    );

    running.stop().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn selection_and_chain_survive_restart() {
    let (store, path) = temp_db("restart");
    let node = LocalNode::new();
    node.set("B1", 7, 42);

    {
        let mut running = start(Arc::clone(&store), Arc::clone(&node)).await;
        running.next().await;
        let (mut bridge, _) = tokio_tungstenite::connect_async(running.bridge_url.as_str())
            .await
            .unwrap();
        for msg in [
            r#"{"type":"WALLETS_CHANGED","wallets":[{"name":"Solflare","accounts":["B0","B1"]}]}"#,
            r#"{"type":"SELECT_ACCOUNT","wallet":"Solflare","address":"B1"}"#,
            r#"{"type":"SELECT_CHAIN","chain":"solana:testnet"}"#,
        ] {
            bridge.send(Message::Text(msg.into())).await.unwrap();
        }
        running
            .until(|u| *u == UiUpdate::Chain(Chain::Testnet))
            .await;
        running.stop().await;
    }

    assert_eq!(
        store.get(CHAIN_STORAGE_KEY).unwrap().as_deref(),
        Some("solana:testnet")
    );

    // Second run over the same database file.
    let reopened = Arc::new(SqliteStore::open(path.to_str().unwrap()).unwrap());
    let mut running = start(reopened, Arc::clone(&node)).await;
    assert_eq!(running.next().await, UiUpdate::Chain(Chain::Testnet));

    let (mut bridge, _) = tokio_tungstenite::connect_async(running.bridge_url.as_str())
        .await
        .unwrap();
    bridge
        .send(Message::Text(
            r#"{"type":"WALLETS_CHANGED","wallets":[{"name":"Solflare","accounts":["B0","B1"]}]}"#.into(),
        ))
        .await
        .unwrap();

    assert_eq!(
        running
            .until(|u| matches!(u, UiUpdate::Selection(_)))
            .await,
        UiUpdate::Selection(Some(Candidate::new("Solflare", "B1")))
    );
    assert_eq!(
        running.until(is_balance).await,
        UiUpdate::Balance {
            address: Address::from("B1"),
            slot: 7,
            lamports: 42
        }
    );

    running.stop().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn wallet_disconnect_clears_selection() {
    let (store, path) = temp_db("disconnect");
    store.set(SELECTION_STORAGE_KEY, "Phantom:A1").unwrap();
    let node = LocalNode::new();
    node.set("A1", 1, 1);

    let mut running = start(Arc::clone(&store), node).await;
    running.next().await;
    let (mut bridge, _) = tokio_tungstenite::connect_async(running.bridge_url.as_str())
        .await
        .unwrap();

    bridge
        .send(Message::Text(
            r#"{"type":"WALLETS_CHANGED","wallets":[{"name":"Phantom","accounts":["A1"]}]}"#.into(),
        ))
        .await
        .unwrap();
    assert_eq!(
        running.until(|u| matches!(u, UiUpdate::Selection(_))).await,
        UiUpdate::Selection(Some(Candidate::new("Phantom", "A1")))
    );

    bridge
        .send(Message::Text(r#"{"type":"WALLETS_CHANGED","wallets":[]}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        running.until(|u| matches!(u, UiUpdate::Selection(_))).await,
        UiUpdate::Selection(None)
    );

    // Invalidation is not an explicit clear: the saved choice stays for the
    // next time the wallet appears.
    assert_eq!(
        store.get(SELECTION_STORAGE_KEY).unwrap().as_deref(),
        Some("Phantom:A1")
    );

    running.stop().await;
    let _ = std::fs::remove_file(&path);
}
