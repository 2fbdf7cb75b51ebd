// Messages exchanged between the wallet bridge, the event loop and the UI.

use serde::{Deserialize, Serialize};
use wallet_sync_core::{Address, Candidate, CandidateGroup};

use crate::chain::Chain;

/// Messages sent by the wallet bridge (JSON text frames, tagged by `type`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    /// The full set of connected wallets and their accounts, in display order.
    WalletsChanged { wallets: Vec<WalletPayload> },
    /// The user picked an account.
    SelectAccount { wallet: String, address: String },
    /// The user cleared the selection.
    ClearSelection,
    /// The user switched clusters. `chain` is a wallet-standard id.
    SelectChain { chain: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletPayload {
    pub name: String,
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl WalletPayload {
    pub fn into_group(self) -> CandidateGroup {
        CandidateGroup::new(self.name, self.accounts)
    }
}

impl BridgeMessage {
    pub fn parse(text: &str) -> Result<BridgeMessage, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Whether a wallet bridge is currently attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Connected,
    Disconnected,
}

/// Updates sent from the event loop to whatever renders them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiUpdate {
    Chain(Chain),
    Selection(Option<Candidate>),
    Balance {
        address: Address,
        slot: u64,
        lamports: u64,
    },
    BalanceError {
        address: Address,
        message: String,
    },
    Bridge(BridgeStatus),
}

/// Commands from the user (or the signal handler) to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Re-run the fetch and subscription for the current account.
    Refresh,
    Quit,
}
