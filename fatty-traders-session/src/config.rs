//! Session configuration.
//!
//! Defaults reproduce the stock behaviour: IB Gateway live port on localhost,
//! a ten second handshake wait, and a delayed AAPL quote subscribed on
//! connect.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::contract::Contract;
use crate::protocol::{MarketDataType, ACCOUNT_SUMMARY_TAGS, ALL_ACCOUNTS_GROUP};

/// Instrument subscribed automatically after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultInstrument {
    pub ticker_id: i32,
    pub contract: Contract,
}

impl Default for DefaultInstrument {
    fn default() -> Self {
        Self {
            ticker_id: 1,
            contract: Contract::stock("AAPL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,

    /// How long `connect` waits for the next-valid-id acknowledgment.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Upper bound of one reader-signal wait on the pump thread.
    #[serde(with = "duration_ms")]
    pub signal_timeout: Duration,
    /// Sleep between pump iterations.
    #[serde(with = "duration_ms")]
    pub pump_interval: Duration,
    /// How long `disconnect` waits for the pump thread before detaching it.
    #[serde(with = "duration_ms")]
    pub join_timeout: Duration,

    pub account_group: String,
    pub account_summary_tags: String,
    pub market_data_type: MarketDataType,
    /// `None` skips the automatic market data subscription.
    pub default_instrument: Option<DefaultInstrument>,

    /// Lines kept by the diagnostic log.
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4001,
            client_id: 1,
            handshake_timeout: Duration::from_secs(10),
            signal_timeout: Duration::from_millis(2000),
            pump_interval: Duration::from_millis(1),
            join_timeout: Duration::from_secs(3),
            account_group: ALL_ACCOUNTS_GROUP.to_string(),
            account_summary_tags: ACCOUNT_SUMMARY_TAGS.to_string(),
            market_data_type: MarketDataType::Delayed,
            default_instrument: Some(DefaultInstrument::default()),
            log_capacity: 1000,
        }
    }
}

impl SessionConfig {
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16, client_id: i32) -> Self {
        self.host = host.into();
        self.port = port;
        self.client_id = client_id;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_gateway_conventions() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.port, 4001);
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(10));
        assert_eq!(cfg.market_data_type, MarketDataType::Delayed);
        let inst = cfg.default_instrument.unwrap();
        assert_eq!(inst.ticker_id, 1);
        assert_eq!(inst.contract.symbol, "AAPL");
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"port": 7497, "handshakeTimeout": 250}"#).unwrap();
        assert_eq!(cfg.port, 7497);
        assert_eq!(cfg.handshake_timeout, Duration::from_millis(250));
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.join_timeout, Duration::from_secs(3));
    }
}
