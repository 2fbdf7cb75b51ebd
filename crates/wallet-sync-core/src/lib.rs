// Library root: value reconciliation for a wallet client. Merges fetched and
// pushed account values under a monotonic token, and keeps a persisted
// account selection consistent with a changing set of wallets.

pub mod candidate;
pub mod db;
pub mod merger;
pub mod selection;
pub mod storage;
pub mod token;

pub use candidate::{Address, Candidate, CandidateGroup, SelectionKey};
pub use merger::{
    CancelHandle, MergeError, MergeResult, MergeSession, NetworkClient, StreamMerger, UpdateStream,
};
pub use selection::{ListenerId, SelectionListener, SelectionReconciler};
pub use storage::{MemoryStore, PersistenceAdapter, PersistenceError};
pub use token::{OrderingToken, ValueUpdate, Watermark};
