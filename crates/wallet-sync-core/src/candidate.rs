// Candidate accounts, the wallets that expose them, and the persisted key
// identifying a previous choice.
//
// Snapshots are owned by the discovery source and only read here. Identity
// is always (group name, address) by value, never by reference, since every
// change notification hands over a freshly built collection.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Opaque account address. Used as the merge subject and as half of a
/// candidate's identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Address(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Candidate / CandidateGroup
// ---------------------------------------------------------------------------

/// A selectable account. `group` names the wallet exposing it; it is a
/// back-reference by name, not ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub group: String,
    pub address: Address,
}

impl Candidate {
    pub fn new(group: impl Into<String>, address: impl Into<Address>) -> Self {
        Candidate {
            group: group.into(),
            address: address.into(),
        }
    }

    /// Same wallet name and same address.
    pub fn is_same(&self, other: &Candidate) -> bool {
        self.group == other.group && self.address == other.address
    }

    pub fn belongs_to(&self, group: &CandidateGroup) -> bool {
        self.group == group.name
    }

    /// The persisted form of this candidate.
    pub fn storage_key(&self) -> SelectionKey {
        SelectionKey {
            group: self.group.clone(),
            address: self.address.clone(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.address)
    }
}

/// A wallet and the accounts it currently exposes, in the wallet's order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    pub name: String,
    candidates: Vec<Candidate>,
}

impl CandidateGroup {
    /// Build a group from its name and account addresses. Each candidate's
    /// back-reference is set to `name`.
    pub fn new<I, A>(name: impl Into<String>, addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        let name = name.into();
        let candidates = addresses
            .into_iter()
            .map(|a| Candidate::new(name.clone(), a))
            .collect();
        CandidateGroup { name, candidates }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn first(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn find(&self, address: &Address) -> Option<&Candidate> {
        self.candidates.iter().find(|c| &c.address == address)
    }
}

// ---------------------------------------------------------------------------
// CandidateSet lookups
// ---------------------------------------------------------------------------

/// First candidate in any group that is the same as `wanted`.
pub fn find_exact<'a>(groups: &'a [CandidateGroup], wanted: &Candidate) -> Option<&'a Candidate> {
    groups
        .iter()
        .flat_map(|g| g.candidates.iter())
        .find(|c| c.is_same(wanted))
}

/// First candidate of the first non-empty group `wanted` belongs to.
pub fn find_group_fallback<'a>(
    groups: &'a [CandidateGroup],
    wanted: &Candidate,
) -> Option<&'a Candidate> {
    groups
        .iter()
        .filter(|g| wanted.belongs_to(g))
        .find_map(|g| g.first())
}

/// Resolve a persisted key: groups are scanned in order, and within each group
/// with the key's name the first matching address wins.
pub fn find_by_key<'a>(groups: &'a [CandidateGroup], key: &SelectionKey) -> Option<&'a Candidate> {
    groups
        .iter()
        .filter(|g| g.name == key.group)
        .find_map(|g| g.find(&key.address))
}

// ---------------------------------------------------------------------------
// SelectionKey
// ---------------------------------------------------------------------------

/// `(wallet name, account address)` as stored durably: `"<name>:<address>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionKey {
    pub group: String,
    pub address: Address,
}

impl SelectionKey {
    /// Parse a stored key. Only the first two `:`-separated fields are used;
    /// returns `None` if either is missing or empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(':');
        let group = parts.next().filter(|s| !s.is_empty())?;
        let address = parts.next().filter(|s| !s.is_empty())?;
        Some(SelectionKey {
            group: group.to_string(),
            address: Address::from(address),
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.group, self.address)
    }
}
