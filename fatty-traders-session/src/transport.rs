//! The request side of the gateway boundary.
//!
//! A [`Transport`] owns the socket to TWS/Gateway. The session core treats it
//! as opaque: requests go out through the methods below, and answers come
//! back later when the pump thread calls [`Transport::process_messages`] with
//! an [`EventHandler`].
//!
//! Implementations must be shareable between the caller thread and the pump
//! thread, so every method takes `&self`.

use std::time::Duration;

use crate::errors::Result;
use crate::models::contract::Contract;
use crate::models::order::Order;
use crate::protocol::MarketDataType;
use crate::wrapper::EventHandler;

pub trait Transport: Send + Sync + 'static {
    // ------------------------------------------------------------------
    // Socket lifecycle
    // ------------------------------------------------------------------

    /// Opens the socket. The handshake acknowledgment arrives later through
    /// [`EventHandler::next_valid_id`].
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<()>;

    /// Closes the socket. Must wake a pending [`wait_for_signal`](Self::wait_for_signal).
    fn disconnect(&self);

    /// The transport's own view of the socket.
    fn is_connected(&self) -> bool;

    // ------------------------------------------------------------------
    // Reader signal
    // ------------------------------------------------------------------

    /// Blocks until messages are pending or `timeout` elapses. Returns whether
    /// anything is pending.
    fn wait_for_signal(&self, timeout: Duration) -> bool;

    /// Dispatches every pending message to `handler`, in arrival order.
    fn process_messages(&self, handler: &dyn EventHandler);

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    fn req_managed_accounts(&self) -> Result<()>;

    fn req_account_summary(&self, req_id: i32, group: &str, tags: &str) -> Result<()>;

    fn cancel_account_summary(&self, req_id: i32) -> Result<()>;

    fn req_positions(&self) -> Result<()>;

    fn req_market_data_type(&self, market_data_type: MarketDataType) -> Result<()>;

    fn req_mkt_data(&self, ticker_id: i32, contract: &Contract) -> Result<()>;

    fn cancel_mkt_data(&self, ticker_id: i32) -> Result<()>;

    fn place_order(&self, order_id: i64, contract: &Contract, order: &Order) -> Result<()>;

    fn cancel_order(&self, order_id: i64) -> Result<()>;

    fn req_all_open_orders(&self) -> Result<()>;
}
