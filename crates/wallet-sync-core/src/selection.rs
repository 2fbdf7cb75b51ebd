// Persisted account selection, reconciled against the live wallet set.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::candidate::{
    find_by_key, find_exact, find_group_fallback, Candidate, CandidateGroup, SelectionKey,
};
use crate::storage::PersistenceAdapter;

/// Listener invoked with the effective selection whenever it changes.
pub type SelectionListener = Box<dyn FnMut(Option<&Candidate>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Owns the selected account and keeps it valid as wallets come and go.
///
/// Until the user picks an account explicitly, every wallet-set change tries
/// to restore the persisted choice. The chosen account is kept as given and
/// the effective selection is derived from it against the latest wallet set:
/// an account missing from a still-connected wallet shows as that wallet's
/// first account (and comes back if the account reappears), and a
/// disconnected wallet clears the choice. Only [`select`](Self::select)
/// writes to storage.
pub struct SelectionReconciler {
    store: Arc<dyn PersistenceAdapter>,
    storage_key: String,
    /// The account as chosen or restored, before validation.
    selected: Option<Candidate>,
    /// Effective selection reported to listeners.
    chosen: Option<Candidate>,
    explicit: bool,
    groups: Option<Vec<CandidateGroup>>,
    listeners: Vec<(ListenerId, SelectionListener)>,
    next_listener: u64,
}

impl SelectionReconciler {
    pub fn new(store: Arc<dyn PersistenceAdapter>, storage_key: impl Into<String>) -> Self {
        SelectionReconciler {
            store,
            storage_key: storage_key.into(),
            selected: None,
            chosen: None,
            explicit: false,
            groups: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn current(&self) -> Option<&Candidate> {
        self.chosen.as_ref()
    }

    /// Whether the user has made a manual choice during this reconciler's
    /// lifetime. Once set it stays set.
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// The most recent wallet set, if any has been seen.
    pub fn groups(&self) -> Option<&[CandidateGroup]> {
        self.groups.as_deref()
    }

    pub fn on_change(&mut self, listener: SelectionListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Explicit user choice. Persists it (or clears the stored key for
    /// `None`) and disables restoration for the rest of this reconciler's life.
    pub fn select(&mut self, candidate: Option<Candidate>) {
        self.explicit = true;

        let write = match &candidate {
            Some(c) => self.store.set(&self.storage_key, &c.storage_key().encode()),
            None => self.store.remove(&self.storage_key),
        };
        if let Err(e) = write {
            warn!(key = %self.storage_key, "failed to persist selection: {e}");
        }

        info!(
            selected = %DisplayChoice(candidate.as_ref()),
            "account selected explicitly"
        );
        self.selected = candidate;
        self.recompute();
    }

    /// Re-derive the selection from a new wallet set.
    pub fn on_candidates_changed(&mut self, groups: &[CandidateGroup]) {
        if !self.explicit {
            if let Some(restored) = self.restore(groups) {
                self.selected = Some(restored);
            }
        }
        self.groups = Some(groups.to_vec());
        self.recompute();
    }

    /// Derive the effective selection from `selected` and the last wallet set.
    /// Before any wallet set is known the choice is taken as is.
    fn recompute(&mut self) {
        let effective = match (&self.selected, &self.groups) {
            (Some(c), Some(groups)) => {
                let validated = validate(c, groups);
                if validated.is_none() {
                    info!(previous = %c, "wallet disconnected, clearing selection");
                    self.selected = None;
                }
                validated
            }
            (selected, _) => selected.clone(),
        };
        self.replace(effective);
    }

    fn restore(&self, groups: &[CandidateGroup]) -> Option<Candidate> {
        let raw = match self.store.get(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.storage_key, "failed to load saved selection: {e}");
                return None;
            }
        };
        let Some(key) = SelectionKey::parse(&raw) else {
            debug!(key = %self.storage_key, raw = %raw, "ignoring malformed saved selection");
            return None;
        };
        if let Some(found) = find_by_key(groups, &key) {
            debug!(restored = %found, "restored saved selection");
            return Some(found.clone());
        }
        // The saved account is gone but its wallet is here: keep the saved
        // account as the choice and let validation show the wallet's first.
        let saved = Candidate::new(key.group, key.address);
        find_group_fallback(groups, &saved)?;
        debug!(saved = %saved, "restored saved wallet");
        Some(saved)
    }

    fn replace(&mut self, next: Option<Candidate>) {
        if self.chosen == next {
            return;
        }
        self.chosen = next;
        let chosen = self.chosen.as_ref();
        for (_, listener) in self.listeners.iter_mut() {
            listener(chosen);
        }
    }
}

/// Exact match anywhere wins; otherwise the first account of the candidate's
/// wallet if that wallet is still connected and exposes any account.
fn validate(candidate: &Candidate, groups: &[CandidateGroup]) -> Option<Candidate> {
    find_exact(groups, candidate)
        .or_else(|| find_group_fallback(groups, candidate))
        .cloned()
}

struct DisplayChoice<'a>(Option<&'a Candidate>);

impl fmt::Display for DisplayChoice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(c) => write!(f, "{c}"),
            None => f.write_str("none"),
        }
    }
}
