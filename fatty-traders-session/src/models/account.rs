//! Account summary rows and position rows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::contract::Contract;

/// One `(account, tag)` value from an account-summary refresh.
///
/// `value` stays string-encoded: the gateway mixes numbers with tags such as
/// `AccountType` whose values are words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummaryItem {
    pub account: String,
    pub tag: String,
    pub value: String,
    pub currency: String,
}

/// One holding reported by a positions refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionItem {
    pub account: String,
    pub contract: Contract,
    pub position: Decimal,
    pub avg_cost: f64,
}

impl PositionItem {
    /// Cost basis of the holding (`position * avg_cost`).
    pub fn cost_basis(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.position.to_f64().unwrap_or(0.0) * self.avg_cost
    }
}
