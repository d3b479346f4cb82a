//! Tick cache keys and the quote view built from cached ticks.

use serde::{Deserialize, Serialize};

use crate::protocol::TickType;

/// Field codes must stay below this to be packed into a [`TickKey`].
pub const TICK_FIELD_LIMIT: i32 = 100;

/// Composite `(ticker_id, field)` key packed as `ticker_id * 100 + field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickKey(i64);

impl TickKey {
    /// Packs a key, or `None` when `field` would spill into the next ticker's
    /// range.
    pub fn new(ticker_id: i32, field: i32) -> Option<Self> {
        if !(0..TICK_FIELD_LIMIT).contains(&field) {
            return None;
        }
        Some(Self(
            i64::from(ticker_id) * i64::from(TICK_FIELD_LIMIT) + i64::from(field),
        ))
    }

    pub fn ticker_id(self) -> i32 {
        self.0.div_euclid(i64::from(TICK_FIELD_LIMIT)) as i32
    }

    pub fn field(self) -> i32 {
        self.0.rem_euclid(i64::from(TICK_FIELD_LIMIT)) as i32
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

/// Top of book for one subscribed instrument.
///
/// Each side prefers the real-time field and falls back to the delayed one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub ticker_id: i32,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
}

impl Quote {
    /// Builds a quote from a price lookup for `ticker_id`.
    pub fn from_lookup(ticker_id: i32, lookup: impl Fn(TickType) -> Option<f64>) -> Self {
        let pick = |live: TickType, delayed: TickType| {
            let positive = |p: &f64| *p > 0.0;
            lookup(live)
                .filter(positive)
                .or_else(|| lookup(delayed).filter(positive))
        };
        Self {
            ticker_id,
            bid: pick(TickType::Bid, TickType::DelayedBid),
            ask: pick(TickType::Ask, TickType::DelayedAsk),
            last: pick(TickType::Last, TickType::DelayedLast),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bid.is_none() && self.ask.is_none() && self.last.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bid_and_ask_for_same_ticker_do_not_collide() {
        let bid = TickKey::new(1, 1).unwrap();
        let ask = TickKey::new(1, 2).unwrap();
        assert_ne!(bid, ask);
        assert_eq!(bid.raw(), 101);
        assert_eq!(ask.raw(), 102);
        assert_eq!(ask.ticker_id(), 1);
        assert_eq!(ask.field(), 2);
    }

    #[test]
    fn fields_past_the_limit_are_refused() {
        assert!(TickKey::new(1, 100).is_none());
        assert!(TickKey::new(1, -1).is_none());
        assert!(TickKey::new(1, 99).is_some());
    }

    #[test]
    fn quote_falls_back_to_delayed_fields() {
        let q = Quote::from_lookup(1, |tt| match tt {
            TickType::Bid => Some(10.0),
            TickType::DelayedAsk => Some(10.5),
            TickType::Last => Some(-1.0),
            _ => None,
        });
        assert_eq!(q.bid, Some(10.0));
        assert_eq!(q.ask, Some(10.5));
        assert_eq!(q.last, None);
        assert!(!q.is_empty());
    }
}
