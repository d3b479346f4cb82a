//! Order parameters, order state, and the cached per-order record.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::contract::Contract;

// ============================================================================
// Enums
// ============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[default]
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Action {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "LMT")]
    Limit,
    #[serde(rename = "STP")]
    Stop,
    #[serde(rename = "STP LMT")]
    StopLimit,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MKT"),
            Self::Limit => write!(f, "LMT"),
            Self::Stop => write!(f, "STP"),
            Self::StopLimit => write!(f, "STP LMT"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for OrderType {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "MKT" => Self::Market,
            "LMT" => Self::Limit,
            "STP" => Self::Stop,
            "STP LMT" => Self::StopLimit,
            _ => Self::Other(s.to_string()),
        })
    }
}

/// Time in force.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[default]
    #[serde(rename = "DAY")]
    Day,
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    #[serde(untagged)]
    Other(String),
}

// ============================================================================
// Order
// ============================================================================

/// Order parameters handed to `place_order`.
///
/// Prices are `None` when unset; the gateway ignores them for order types
/// that do not use them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: i64,
    pub action: Action,
    pub order_type: OrderType,
    pub total_quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lmt_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux_price: Option<f64>,
    pub tif: TimeInForce,
    pub account: String,
    pub transmit: bool,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            order_id: 0,
            action: Action::Buy,
            order_type: OrderType::Market,
            total_quantity: Decimal::ZERO,
            lmt_price: None,
            aux_price: None,
            tif: TimeInForce::Day,
            account: String::new(),
            transmit: true,
        }
    }
}

impl Order {
    pub fn market(action: Action, quantity: Decimal) -> Self {
        Self {
            action,
            order_type: OrderType::Market,
            total_quantity: quantity,
            ..Self::default()
        }
    }

    pub fn limit(action: Action, quantity: Decimal, limit_price: f64) -> Self {
        Self {
            action,
            order_type: OrderType::Limit,
            total_quantity: quantity,
            lmt_price: Some(limit_price),
            ..Self::default()
        }
    }
}

// ============================================================================
// OrderState
// ============================================================================

/// Gateway-side state attached to an open-order callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderState {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission: Option<f64>,
    pub commission_currency: String,
    pub warning_text: String,
}

// ============================================================================
// Order status callback payload
// ============================================================================

/// Incremental status report for one order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdate {
    pub order_id: i64,
    pub status: String,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: f64,
    pub perm_id: i64,
    pub parent_id: i64,
    pub last_fill_price: f64,
    pub client_id: i32,
    pub why_held: String,
}

// ============================================================================
// OrderInfo (cache record)
// ============================================================================

/// Latest known view of one order, keyed by `order_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    pub order_id: i64,
    pub contract: Contract,
    pub order: Order,
    pub order_state: OrderState,
    pub status: String,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: f64,
}

impl OrderInfo {
    /// Applies a status report in place.
    pub fn apply_status(&mut self, update: &OrderStatusUpdate) {
        self.status = update.status.clone();
        self.filled = update.filled;
        self.remaining = update.remaining;
        self.avg_fill_price = update.avg_fill_price;
    }
}
