// Solana clusters and the persisted choice between them.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};
use wallet_sync_core::PersistenceAdapter;

pub const CHAIN_STORAGE_KEY: &str = "wallet-sync:selected-chain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Mainnet,
    Devnet,
    Testnet,
}

/// RPC endpoints for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub http: String,
    pub ws: String,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Mainnet, Chain::Devnet, Chain::Testnet];

    /// Parse a wallet-standard chain id such as `solana:devnet`.
    pub fn parse(id: &str) -> Option<Chain> {
        Chain::ALL.into_iter().find(|c| c.id() == id)
    }

    pub fn id(self) -> &'static str {
        match self {
            Chain::Mainnet => "solana:mainnet",
            Chain::Devnet => "solana:devnet",
            Chain::Testnet => "solana:testnet",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Chain::Mainnet => "Mainnet Beta",
            Chain::Devnet => "Devnet",
            Chain::Testnet => "Testnet",
        }
    }

    /// Value of the explorer's `cluster` query parameter.
    pub fn explorer_cluster(self) -> &'static str {
        match self {
            Chain::Mainnet => "mainnet-beta",
            Chain::Devnet => "devnet",
            Chain::Testnet => "testnet",
        }
    }

    pub fn default_endpoints(self) -> Endpoints {
        let host = match self {
            Chain::Mainnet => "api.mainnet-beta.solana.com",
            Chain::Devnet => "api.devnet.solana.com",
            Chain::Testnet => "api.testnet.solana.com",
        };
        Endpoints {
            http: format!("https://{host}"),
            ws: format!("wss://{host}"),
        }
    }

    pub fn explorer_url(self, address: &str) -> String {
        format!(
            "https://explorer.solana.com/address/{address}?cluster={}",
            self.explorer_cluster()
        )
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// The currently selected cluster, persisted under [`CHAIN_STORAGE_KEY`].
pub struct ChainSelection {
    store: Arc<dyn PersistenceAdapter>,
    current: Chain,
}

impl ChainSelection {
    /// Read the stored chain, falling back to `default` when nothing is
    /// stored. An unrecognized stored value is removed.
    pub fn load(store: Arc<dyn PersistenceAdapter>, default: Chain) -> Self {
        let current = match store.get(CHAIN_STORAGE_KEY) {
            Ok(Some(raw)) => match Chain::parse(&raw) {
                Some(chain) => chain,
                None => {
                    error!(
                        stored = %raw,
                        fallback = %default,
                        "unrecognized chain in storage; using default"
                    );
                    if let Err(e) = store.remove(CHAIN_STORAGE_KEY) {
                        warn!(error = %e, "failed to remove unrecognized chain");
                    }
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                warn!(error = %e, "failed to read stored chain; using default");
                default
            }
        };
        ChainSelection { store, current }
    }

    pub fn current(&self) -> Chain {
        self.current
    }

    /// Switch to `chain` and persist it. Returns `false` if it was already
    /// selected.
    pub fn set(&mut self, chain: Chain) -> bool {
        if chain == self.current {
            return false;
        }
        if let Err(e) = self.store.set(CHAIN_STORAGE_KEY, chain.id()) {
            warn!(error = %e, %chain, "failed to persist chain");
        }
        info!(from = %self.current, to = %chain, "chain changed");
        self.current = chain;
        true
    }
}
