//! Gateway constants the session depends on: tick field codes, market data
//! types, error codes, and the account-summary tag list.

use serde::{Deserialize, Serialize};

// ============================================================================
// Error codes
// ============================================================================

/// Couldn't connect to TWS.
pub const ERR_CONNECT_FAIL: i32 = 502;
/// The TWS is out of date and must be upgraded.
pub const ERR_UPDATE_TWS: i32 = 503;
/// Not connected.
pub const ERR_NOT_CONNECTED: i32 = 504;
/// Order id to cancel was not found.
pub const ERR_CANCEL_UNKNOWN_ORDER: i32 = 10147;

/// Error codes after which the socket link must be treated as broken.
pub const CONNECTION_LOSS_CODES: [i32; 3] = [ERR_CONNECT_FAIL, ERR_UPDATE_TWS, ERR_NOT_CONNECTED];

pub fn is_connection_loss(code: i32) -> bool {
    CONNECTION_LOSS_CODES.contains(&code)
}

// ============================================================================
// Account summary
// ============================================================================

/// Account group covering every account the login can see.
pub const ALL_ACCOUNTS_GROUP: &str = "All";

/// Tags requested on every account-summary refresh.
pub const ACCOUNT_SUMMARY_TAGS: &str = "NetLiquidation,TotalCashValue,SettledCash,AccruedCash,\
BuyingPower,EquityWithLoanValue,PreviousEquityWithLoanValue,GrossPositionValue";

/// Tags worth a diagnostic line when they arrive.
pub const HIGHLIGHTED_SUMMARY_TAGS: [&str; 5] = [
    "NetLiquidation",
    "TotalCashValue",
    "BuyingPower",
    "AvailableFunds",
    "GrossPositionValue",
];

// ============================================================================
// Market data type
// ============================================================================

/// Market data feed selected with `req_market_data_type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum MarketDataType {
    Realtime = 1,
    Frozen = 2,
    /// Free 15-20 minute delayed quotes.
    #[default]
    Delayed = 3,
    DelayedFrozen = 4,
}

impl MarketDataType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

// ============================================================================
// TickType
// ============================================================================

/// Tick field codes the session knows by name.
///
/// Field codes are carried as raw `i32` through the callback interface so that
/// codes missing here are still cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TickType {
    BidSize = 0,
    Bid = 1,
    Ask = 2,
    AskSize = 3,
    Last = 4,
    LastSize = 5,
    High = 6,
    Low = 7,
    Volume = 8,
    Close = 9,
    Open = 14,
    MarkPrice = 37,
    LastTimestamp = 45,
    Halted = 49,
    DelayedBid = 66,
    DelayedAsk = 67,
    DelayedLast = 68,
    DelayedBidSize = 69,
    DelayedAskSize = 70,
    DelayedLastSize = 71,
    DelayedHigh = 72,
    DelayedLow = 73,
    DelayedVolume = 74,
    DelayedClose = 75,
    DelayedOpen = 76,
}

impl TickType {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Short upper-case label used in diagnostic lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::BidSize => "BID_SIZE",
            Self::Bid => "BID",
            Self::Ask => "ASK",
            Self::AskSize => "ASK_SIZE",
            Self::Last => "LAST",
            Self::LastSize => "LAST_SIZE",
            Self::High => "HIGH",
            Self::Low => "LOW",
            Self::Volume => "VOLUME",
            Self::Close => "CLOSE",
            Self::Open => "OPEN",
            Self::MarkPrice => "MARK_PRICE",
            Self::LastTimestamp => "LAST_TIMESTAMP",
            Self::Halted => "HALTED",
            Self::DelayedBid => "DELAYED_BID",
            Self::DelayedAsk => "DELAYED_ASK",
            Self::DelayedLast => "DELAYED_LAST",
            Self::DelayedBidSize => "DELAYED_BID_SIZE",
            Self::DelayedAskSize => "DELAYED_ASK_SIZE",
            Self::DelayedLastSize => "DELAYED_LAST_SIZE",
            Self::DelayedHigh => "DELAYED_HIGH",
            Self::DelayedLow => "DELAYED_LOW",
            Self::DelayedVolume => "DELAYED_VOLUME",
            Self::DelayedClose => "DELAYED_CLOSE",
            Self::DelayedOpen => "DELAYED_OPEN",
        }
    }

    /// True for bid/ask/last, live or delayed.
    pub fn is_top_of_book(self) -> bool {
        matches!(
            self,
            Self::Bid
                | Self::Ask
                | Self::Last
                | Self::DelayedBid
                | Self::DelayedAsk
                | Self::DelayedLast
        )
    }
}

impl TryFrom<i32> for TickType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::BidSize),
            1 => Ok(Self::Bid),
            2 => Ok(Self::Ask),
            3 => Ok(Self::AskSize),
            4 => Ok(Self::Last),
            5 => Ok(Self::LastSize),
            6 => Ok(Self::High),
            7 => Ok(Self::Low),
            8 => Ok(Self::Volume),
            9 => Ok(Self::Close),
            14 => Ok(Self::Open),
            37 => Ok(Self::MarkPrice),
            45 => Ok(Self::LastTimestamp),
            49 => Ok(Self::Halted),
            66 => Ok(Self::DelayedBid),
            67 => Ok(Self::DelayedAsk),
            68 => Ok(Self::DelayedLast),
            69 => Ok(Self::DelayedBidSize),
            70 => Ok(Self::DelayedAskSize),
            71 => Ok(Self::DelayedLastSize),
            72 => Ok(Self::DelayedHigh),
            73 => Ok(Self::DelayedLow),
            74 => Ok(Self::DelayedVolume),
            75 => Ok(Self::DelayedClose),
            76 => Ok(Self::DelayedOpen),
            other => Err(other),
        }
    }
}

impl From<TickType> for i32 {
    fn from(tt: TickType) -> i32 {
        tt as i32
    }
}

/// Display name for a raw field code, `FIELD_<n>` when unknown.
pub fn tick_field_name(field: i32) -> String {
    match TickType::try_from(field) {
        Ok(tt) => tt.label().to_string(),
        Err(code) => format!("FIELD_{code}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_type_round_trips_known_codes() {
        for code in [0, 1, 2, 4, 9, 14, 66, 68, 76] {
            let tt = TickType::try_from(code).unwrap();
            assert_eq!(i32::from(tt), code);
        }
        assert_eq!(TickType::try_from(58), Err(58));
    }

    #[test]
    fn unknown_fields_get_numbered_names() {
        assert_eq!(tick_field_name(1), "BID");
        assert_eq!(tick_field_name(58), "FIELD_58");
    }

    #[test]
    fn only_socket_errors_count_as_connection_loss() {
        assert!(is_connection_loss(502));
        assert!(is_connection_loss(504));
        assert!(!is_connection_loss(2104));
        assert!(!is_connection_loss(ERR_CANCEL_UNKNOWN_ORDER));
    }

    #[test]
    fn delayed_is_the_default_feed() {
        assert_eq!(MarketDataType::default().code(), 3);
    }
}
