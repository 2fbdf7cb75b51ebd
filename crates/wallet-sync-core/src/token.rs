// Ordering tokens and the watermark that fences out stale updates.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrderingToken
// ---------------------------------------------------------------------------

/// Total-ordered fencing value attached to every observed update (for Solana
/// this is the slot at which the value was read).
///
/// `OrderingToken::MIN` means "never updated".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingToken(u64);

impl OrderingToken {
    pub const MIN: OrderingToken = OrderingToken(0);

    pub const fn new(value: u64) -> Self {
        OrderingToken(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for OrderingToken {
    fn from(value: u64) -> Self {
        OrderingToken(value)
    }
}

impl fmt::Display for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ValueUpdate
// ---------------------------------------------------------------------------

/// A value together with the token at which it was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueUpdate<V> {
    pub token: OrderingToken,
    pub value: V,
}

impl<V> ValueUpdate<V> {
    pub fn new(token: impl Into<OrderingToken>, value: V) -> Self {
        ValueUpdate {
            token: token.into(),
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Highest token accepted so far within one merge session.
///
/// Equal tokens are accepted: a fetch and a push observed at the same slot
/// carry the same value, and delivering both never moves the consumer
/// backwards.
#[derive(Debug, Clone, Default)]
pub struct Watermark {
    last: OrderingToken,
}

impl Watermark {
    pub fn new() -> Self {
        Watermark {
            last: OrderingToken::MIN,
        }
    }

    /// The highest token accepted so far.
    pub fn last(&self) -> OrderingToken {
        self.last
    }

    /// Returns `true` if `token` would be accepted, without advancing.
    pub fn admits(&self, token: OrderingToken) -> bool {
        token >= self.last
    }

    /// Accept `token` and advance the watermark to it, or reject it if a newer
    /// token was already accepted. Rejections leave the watermark untouched.
    pub fn advance(&mut self, token: OrderingToken) -> bool {
        if !self.admits(token) {
            return false;
        }
        self.last = token;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_watermark_admits_min() {
        let mut mark = Watermark::new();
        assert_eq!(mark.last(), OrderingToken::MIN);
        assert!(mark.advance(OrderingToken::MIN));
    }

    #[test]
    fn advance_moves_forward_and_rejects_older() {
        let mut mark = Watermark::new();
        assert!(mark.advance(10.into()));
        assert!(mark.advance(12.into()));
        assert!(!mark.advance(11.into()));
        assert_eq!(mark.last(), OrderingToken::new(12));
    }

    #[test]
    fn equal_token_is_admitted() {
        let mut mark = Watermark::new();
        assert!(mark.advance(7.into()));
        assert!(mark.advance(7.into()));
    }

    #[test]
    fn admits_does_not_advance() {
        let mark = Watermark::new();
        assert!(mark.admits(99.into()));
        assert_eq!(mark.last(), OrderingToken::MIN);
    }

    #[test]
    fn tokens_order_numerically() {
        assert!(OrderingToken::new(2) > OrderingToken::new(1));
        assert_eq!(OrderingToken::default(), OrderingToken::MIN);
        assert_eq!(OrderingToken::new(42).to_string(), "42");
    }
}
