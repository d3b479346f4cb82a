//! fatty-traders-session -- session core for an Interactive Brokers TWS/Gateway
//! client.
//!
//! The crate does not speak the IB wire protocol itself. A [`Transport`]
//! carries requests out and hands server messages back through the
//! [`EventHandler`] callbacks; the [`Session`] drives the connection state
//! machine, runs the message pump thread, and keeps the latest account,
//! position, order and tick data in lock-protected caches.
//!
//! ## Modules
//!
//! - [`models`] -- Contract, Order, account and market-data types
//! - [`protocol`] -- Error codes, tick field codes, account-summary tags
//! - [`errors`] -- Transport and connect error types
//! - [`transport`] -- The request-side transport trait
//! - [`wrapper`] -- EventHandler callbacks and the IBEvent enum
//! - [`reader`] -- Message pump thread
//! - [`cache`] -- Callback-fed data caches
//! - [`diagnostics`] -- Timestamped session log
//! - [`config`] -- SessionConfig
//! - [`session`] -- Session (main entry point)
//! - [`paper`] -- Simulated gateway implementing Transport

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod models;
pub mod paper;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod transport;
pub mod wrapper;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use config::{DefaultInstrument, SessionConfig};
pub use diagnostics::{DiagnosticLog, LogLine};
pub use errors::{ConnectError, TransportError};
pub use session::{ConnectionState, Endpoint, Session};
pub use transport::Transport;
pub use wrapper::{EventHandler, IBEvent};

pub use paper::{PaperConfig, PaperGateway};

// Models
pub use models::account::{AccountSummaryItem, PositionItem};
pub use models::contract::{Contract, SecType};
pub use models::market_data::{Quote, TickKey};
pub use models::order::{
    Action, Order, OrderInfo, OrderState, OrderStatusUpdate, OrderType, TimeInForce,
};

pub use protocol::{MarketDataType, TickType};
