//! Response types for the status API.
//!
//! Session data (summary rows, positions, orders, quotes, log lines) is
//! serialized as-is from `fatty_traders_session`; the types here are the
//! views that only exist at the HTTP edge.

use fatty_traders_session::{ConnectionState, Endpoint, TickKey};
use serde::{Deserialize, Serialize};

// ============================================================================
// Status
// ============================================================================

/// Everything the connection-status panel shows at a glance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub state: ConnectionState,
    pub connected: bool,
    pub endpoint: Endpoint,
    pub next_order_id: i64,
    pub managed_accounts: Vec<String>,
    /// Sequence number of the newest log line; poll `/api/log?since=` with it.
    pub log_seq: u64,
}

// ============================================================================
// Market Data
// ============================================================================

/// One cached tick value, flattened for tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRow {
    pub ticker_id: i32,
    pub field: i32,
    pub field_name: String,
    pub value: f64,
}

impl TickRow {
    pub fn new(key: TickKey, value: f64) -> Self {
        Self {
            ticker_id: key.ticker_id(),
            field: key.field(),
            field_name: fatty_traders_session::protocol::tick_field_name(key.field()),
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickTable {
    pub prices: Vec<TickRow>,
    pub sizes: Vec<TickRow>,
}

// ============================================================================
// API Response Wrappers
// ============================================================================

/// Generic JSON API response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error_code: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn success_msg(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>, code: i32) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_code: Some(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_omits_data() {
        let json = serde_json::to_value(ApiResponse::error("Not connected", 503)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], 503);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn tick_row_names_known_fields() {
        let key = TickKey::new(1, 66).unwrap();
        let row = TickRow::new(key, 189.99);
        assert_eq!(row.ticker_id, 1);
        assert_eq!(row.field_name, "DELAYED_BID");
    }
}
