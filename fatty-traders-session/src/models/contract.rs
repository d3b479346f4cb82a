//! Instrument descriptors passed to market-data and order requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SecType
// ============================================================================

/// Security type carried in `Contract::sec_type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecType {
    #[default]
    #[serde(rename = "STK")]
    Stock,
    #[serde(rename = "OPT")]
    Option,
    #[serde(rename = "FUT")]
    Future,
    #[serde(rename = "CASH")]
    Forex,
    #[serde(rename = "IND")]
    Index,
    #[serde(rename = "FOP")]
    FutureOption,
    #[serde(rename = "BOND")]
    Bond,
    #[serde(rename = "CRYPTO")]
    Crypto,
    /// Anything the gateway reports that is not listed above.
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for SecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stock => write!(f, "STK"),
            Self::Option => write!(f, "OPT"),
            Self::Future => write!(f, "FUT"),
            Self::Forex => write!(f, "CASH"),
            Self::Index => write!(f, "IND"),
            Self::FutureOption => write!(f, "FOP"),
            Self::Bond => write!(f, "BOND"),
            Self::Crypto => write!(f, "CRYPTO"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for SecType {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "STK" => Self::Stock,
            "OPT" => Self::Option,
            "FUT" => Self::Future,
            "CASH" => Self::Forex,
            "IND" => Self::Index,
            "FOP" => Self::FutureOption,
            "BOND" => Self::Bond,
            "CRYPTO" => Self::Crypto,
            _ => Self::Other(s.to_string()),
        })
    }
}

// ============================================================================
// Contract
// ============================================================================

/// A tradable instrument as the gateway identifies it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub con_id: i64,
    pub symbol: String,
    pub sec_type: SecType,
    pub exchange: String,
    pub primary_exchange: String,
    pub currency: String,
    pub local_symbol: String,
}

impl Contract {
    /// SMART-routed stock quoted in USD.
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self::stock_on(symbol, "SMART")
    }

    /// USD stock routed to a specific exchange.
    pub fn stock_on(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: SecType::Stock,
            exchange: exchange.into(),
            currency: "USD".to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_helper_fills_routing_defaults() {
        let c = Contract::stock("AAPL");
        assert_eq!(c.symbol, "AAPL");
        assert_eq!(c.sec_type, SecType::Stock);
        assert_eq!(c.exchange, "SMART");
        assert_eq!(c.currency, "USD");
    }

    #[test]
    fn sec_type_parses_case_insensitively_and_keeps_unknowns() {
        assert_eq!("opt".parse::<SecType>().unwrap(), SecType::Option);
        assert_eq!("CASH".parse::<SecType>().unwrap(), SecType::Forex);
        assert_eq!(
            "WAR".parse::<SecType>().unwrap(),
            SecType::Other("WAR".to_string())
        );
        assert_eq!(SecType::Other("WAR".into()).to_string(), "WAR");
    }

    #[test]
    fn contract_serializes_wire_sec_type() {
        let json = serde_json::to_value(Contract::stock("MSFT")).unwrap();
        assert_eq!(json["secType"], "STK");
        assert_eq!(json["symbol"], "MSFT");
    }
}
