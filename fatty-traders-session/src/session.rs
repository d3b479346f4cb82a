//! Session core: connection lifecycle, handshake wait, and request guards.
//!
//! A [`Session`] owns one transport. `connect` opens it, starts the message
//! pump, and blocks until the gateway hands out the first valid order id.
//! Everything the gateway sends afterwards lands in the [`DataCache`] through
//! [`CallbackAdapter`], which runs on the pump thread.
//!
//! Lock layout:
//! - `lifecycle` serializes connect/disconnect and owns the pump handle;
//! - the handshake flag has its own mutex + condvar;
//! - all caches share the single data lock inside [`DataCache`];
//! - connection state and order/request ids are atomics, so
//!   [`Session::is_connected`] never blocks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::cache::{DataCache, Upsert};
use crate::config::SessionConfig;
use crate::diagnostics::{DiagnosticLog, LogLine};
use crate::errors::{ConnectError, TransportError};
use crate::models::account::{AccountSummaryItem, PositionItem};
use crate::models::contract::Contract;
use crate::models::market_data::{Quote, TickKey};
use crate::models::order::{Order, OrderInfo, OrderState, OrderStatusUpdate};
use crate::protocol::{self, TickType, HIGHLIGHTED_SUMMARY_TAGS};
use crate::reader::{MessagePump, PumpExit};
use crate::transport::Transport;
use crate::wrapper::EventHandler;

// ============================================================================
// Connection state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Where the session last tried to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
}

// ============================================================================
// Shared state (session + pump thread)
// ============================================================================

struct Shared {
    state: AtomicU8,
    next_order_id: AtomicI64,
    next_req_id: AtomicI32,
    // Held from id allocation until the new subscription is sent.
    summary_request: Mutex<()>,
    handshake: Mutex<bool>,
    handshake_cv: Condvar,
    cache: DataCache,
    log: DiagnosticLog,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn log(&self, message: impl Into<String>) {
        self.log.push(message);
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    endpoint: Mutex<Endpoint>,
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<MessagePump>>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let endpoint = Endpoint {
            host: config.host.clone(),
            port: config.port,
            client_id: config.client_id,
        };
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            next_order_id: AtomicI64::new(0),
            next_req_id: AtomicI32::new(1),
            summary_request: Mutex::new(()),
            handshake: Mutex::new(false),
            handshake_cv: Condvar::new(),
            cache: DataCache::new(),
            log: DiagnosticLog::new(config.log_capacity),
        });
        shared.log("Session initialized");

        Self {
            transport: Arc::new(transport),
            config,
            endpoint: Mutex::new(endpoint),
            shared,
            lifecycle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.lock().clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects to the configured host, port and client id.
    pub fn connect_default(&self) -> Result<(), ConnectError> {
        let (host, port, client_id) = (
            self.config.host.clone(),
            self.config.port,
            self.config.client_id,
        );
        self.connect(&host, port, client_id)
    }

    /// Opens the transport and blocks until the handshake is acknowledged or
    /// the handshake timeout elapses.
    ///
    /// Returns immediately with `Ok` when already connected. A transport
    /// failure is returned as is, without retry.
    pub fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), ConnectError> {
        let mut pump = self.lifecycle.lock();
        self.shared.log(format!(
            "Attempting to connect to {host}:{port} with client ID {client_id}"
        ));

        if self.is_connected() {
            self.shared.log("Already connected");
            return Ok(());
        }

        // A drop the gateway never reported leaves the old pump behind.
        if pump.is_some() || self.shared.state() != ConnectionState::Disconnected {
            tracing::debug!("tearing down stale session before reconnecting");
            self.teardown(&mut pump);
        }

        *self.endpoint.lock() = Endpoint {
            host: host.to_string(),
            port,
            client_id,
        };
        *self.shared.handshake.lock() = false;
        self.shared.set_state(ConnectionState::Connecting);

        if let Err(e) = self.transport.connect(host, port, client_id) {
            self.shared.log("Failed to establish socket connection");
            tracing::warn!("transport connect failed: {e}");
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }

        let handler: Arc<dyn EventHandler> = Arc::new(CallbackAdapter {
            shared: Arc::clone(&self.shared),
        });
        match MessagePump::spawn(
            Arc::clone(&self.transport),
            handler,
            self.config.signal_timeout,
            self.config.pump_interval,
        ) {
            Ok(started) => *pump = Some(started),
            Err(e) => {
                self.transport.disconnect();
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(TransportError::Io(e).into());
            }
        }

        if !self.wait_for_handshake() {
            if self.shared.state() != ConnectionState::Connecting {
                self.shared.log("Connection lost during handshake");
                self.teardown(&mut pump);
                return Err(ConnectError::LostDuringHandshake);
            }
            self.shared.log("Connection timeout");
            self.teardown(&mut pump);
            return Err(ConnectError::HandshakeTimeout(self.config.handshake_timeout));
        }

        // A connection-loss callback may have raced the acknowledgment.
        let promoted = self.shared.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Connected as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if promoted.is_err() {
            self.teardown(&mut pump);
            return Err(ConnectError::LostDuringHandshake);
        }

        self.shared.log("Successfully connected to IB");
        drop(pump);
        self.send_initial_requests();
        Ok(())
    }

    /// Waits for the acknowledgment. Gives up early once a loss callback has
    /// moved the state off `Connecting`.
    fn wait_for_handshake(&self) -> bool {
        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut acknowledged = self.shared.handshake.lock();
        while !*acknowledged && self.shared.state() == ConnectionState::Connecting {
            if self
                .shared
                .handshake_cv
                .wait_until(&mut acknowledged, deadline)
                .timed_out()
            {
                break;
            }
        }
        *acknowledged
    }

    fn send_initial_requests(&self) {
        let transport = &self.transport;
        self.issue(transport.req_managed_accounts(), "Requested managed accounts");
        self.request_account_summary();
        self.request_positions();

        let kind = self.config.market_data_type;
        self.issue(
            transport.req_market_data_type(kind),
            format!("Requested market data type {}", kind.code()),
        );

        if let Some(inst) = &self.config.default_instrument {
            self.request_market_data(inst.ticker_id, &inst.contract);
        }
    }

    /// Stops the pump, closes the transport and clears every cache.
    ///
    /// Does nothing when the session is already down with no pump running. A
    /// drop reported by the gateway still leaves the pump and caches in place,
    /// so this call tears them down.
    pub fn disconnect(&self) {
        let mut pump = self.lifecycle.lock();
        self.teardown(&mut pump);
    }

    fn teardown(&self, pump: &mut Option<MessagePump>) {
        if pump.is_none() && self.shared.state() == ConnectionState::Disconnected {
            return;
        }
        self.shared.log("Disconnecting from IB");
        self.shared.set_state(ConnectionState::Disconnected);

        let running = pump.take();
        if let Some(p) = &running {
            p.request_stop();
        }
        self.transport.disconnect();
        if let Some(p) = running {
            if p.shutdown(self.config.join_timeout) == PumpExit::Detached {
                self.shared.log(format!(
                    "Message pump did not stop within {:?}, detached",
                    self.config.join_timeout
                ));
            }
        }

        *self.shared.handshake.lock() = false;
        self.shared.cache.clear_all();
        self.shared.log("Disconnected from IB");
    }

    /// Session state is `Connected` and the transport agrees.
    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected && self.transport.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether a pump thread is currently held by the session.
    pub fn pump_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn guard(&self, what: &str) -> bool {
        if self.is_connected() {
            return true;
        }
        self.shared.log(format!("Not connected - cannot {what}"));
        false
    }

    /// Logs the outcome of one transport call. Returns whether it went out.
    fn issue(&self, result: Result<(), TransportError>, done: impl Into<String>) -> bool {
        match result {
            Ok(()) => {
                self.shared.log(done);
                true
            }
            Err(e) => {
                self.shared.log(format!("Request failed: {e}"));
                false
            }
        }
    }

    /// Clears the summary cache and subscribes again under a fresh request id.
    ///
    /// Concurrent callers are serialized, so every subscription is sent
    /// before the call that replaces it cancels it.
    pub fn request_account_summary(&self) -> bool {
        if !self.guard("request account summary") {
            return false;
        }
        let _serial = self.shared.summary_request.lock();
        let req_id = self.shared.next_req_id.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.shared.cache.begin_account_summary(req_id) {
            if let Err(e) = self.transport.cancel_account_summary(previous) {
                tracing::warn!("cancel of account summary {previous} failed: {e}");
            }
        }
        self.issue(
            self.transport.req_account_summary(
                req_id,
                &self.config.account_group,
                &self.config.account_summary_tags,
            ),
            "Requested account summary",
        )
    }

    pub fn request_positions(&self) -> bool {
        if !self.guard("request positions") {
            return false;
        }
        self.shared.cache.begin_positions();
        self.issue(self.transport.req_positions(), "Requested positions")
    }

    pub fn request_market_data(&self, ticker_id: i32, contract: &Contract) -> bool {
        if !self.guard("request market data") {
            return false;
        }
        self.issue(
            self.transport.req_mkt_data(ticker_id, contract),
            format!(
                "Requested market data for {} (ID: {ticker_id})",
                contract.symbol
            ),
        )
    }

    pub fn cancel_market_data(&self, ticker_id: i32) -> bool {
        if !self.guard("cancel market data") {
            return false;
        }
        self.issue(
            self.transport.cancel_mkt_data(ticker_id),
            format!("Cancelled market data for ID: {ticker_id}"),
        )
    }

    /// Clears the order cache and asks for every open order again.
    pub fn request_all_open_orders(&self) -> bool {
        if !self.guard("request open orders") {
            return false;
        }
        self.shared.cache.begin_open_orders();
        self.issue(
            self.transport.req_all_open_orders(),
            "Requested all open orders",
        )
    }

    // ========================================================================
    // Orders
    // ========================================================================

    pub fn place_order(&self, order_id: i64, contract: &Contract, order: &Order) -> bool {
        if !self.guard("place order") {
            return false;
        }
        self.issue(
            self.transport.place_order(order_id, contract, order),
            format!("Placed order {order_id} for {}", contract.symbol),
        )
    }

    pub fn cancel_order(&self, order_id: i64) -> bool {
        if !self.guard("cancel order") {
            return false;
        }
        self.issue(
            self.transport.cancel_order(order_id),
            format!("Cancelled order {order_id}"),
        )
    }

    /// The next order id the gateway will accept. Does not reserve it.
    pub fn next_order_id(&self) -> i64 {
        self.shared.next_order_id.load(Ordering::SeqCst)
    }

    /// Reserves the next order id.
    pub fn allocate_order_id(&self) -> i64 {
        self.shared.next_order_id.fetch_add(1, Ordering::SeqCst)
    }

    // ========================================================================
    // Cache accessors
    // ========================================================================

    pub fn managed_accounts(&self) -> Vec<String> {
        self.shared.cache.managed_accounts()
    }

    pub fn account_summary(&self) -> Vec<AccountSummaryItem> {
        self.shared.cache.account_summary()
    }

    pub fn positions(&self) -> Vec<PositionItem> {
        self.shared.cache.positions()
    }

    pub fn open_orders(&self) -> Vec<OrderInfo> {
        self.shared.cache.open_orders()
    }

    pub fn order(&self, order_id: i64) -> Option<OrderInfo> {
        self.shared.cache.order(order_id)
    }

    pub fn tick_prices(&self) -> BTreeMap<TickKey, f64> {
        self.shared.cache.tick_prices()
    }

    pub fn tick_sizes(&self) -> BTreeMap<TickKey, Decimal> {
        self.shared.cache.tick_sizes()
    }

    pub fn tick_price(&self, ticker_id: i32, field: TickType) -> Option<f64> {
        self.shared.cache.tick_price(ticker_id, field)
    }

    pub fn quote(&self, ticker_id: i32) -> Quote {
        self.shared.cache.quote(ticker_id)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn log_lines(&self) -> Vec<LogLine> {
        self.shared.log.snapshot()
    }

    pub fn log_lines_since(&self, after: u64) -> Vec<LogLine> {
        self.shared.log.lines_since(after)
    }

    /// Sequence number of the newest log line, 0 before any.
    pub fn last_log_seq(&self) -> u64 {
        self.shared.log.last_seq()
    }

    /// Appends a line to the session log.
    pub fn note(&self, message: impl Into<String>) -> u64 {
        self.shared.log.push(message)
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// CallbackAdapter
// ============================================================================

/// Feeds gateway callbacks into the shared caches. Owned by the pump thread.
struct CallbackAdapter {
    shared: Arc<Shared>,
}

impl CallbackAdapter {
    fn mark_lost(&self) {
        let previous = self
            .shared
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        if previous != ConnectionState::Disconnected as u8 {
            tracing::warn!("gateway connection lost");
        }
        // Wake a connect still waiting on the handshake.
        let _acknowledged = self.shared.handshake.lock();
        self.shared.handshake_cv.notify_all();
    }
}

impl EventHandler for CallbackAdapter {
    fn next_valid_id(&self, order_id: i64) {
        self.shared.next_order_id.store(order_id, Ordering::SeqCst);
        self.shared.log(format!("Next valid order ID: {order_id}"));

        let mut acknowledged = self.shared.handshake.lock();
        *acknowledged = true;
        self.shared.handshake_cv.notify_all();
    }

    fn connect_ack(&self) {
        self.shared.log("Connection acknowledged by TWS/Gateway");
    }

    fn connection_closed(&self) {
        self.shared.log("Connection closed by TWS/Gateway");
        self.mark_lost();
    }

    fn error(&self, id: i64, code: i32, message: &str) {
        let mut line = format!("Error {code}: {message}");
        if id != -1 {
            line.push_str(&format!(" (ID: {id})"));
        }
        self.shared.log(line);

        if protocol::is_connection_loss(code) {
            self.shared.log("Connection error detected");
            self.mark_lost();
        }
    }

    fn managed_accounts(&self, accounts_list: &str) {
        self.shared.cache.set_managed_accounts(accounts_list);
        self.shared.log(format!("Managed accounts: {accounts_list}"));
    }

    fn account_summary(&self, req_id: i32, account: &str, tag: &str, value: &str, currency: &str) {
        let accepted = self.shared.cache.push_account_summary(
            req_id,
            AccountSummaryItem {
                account: account.to_string(),
                tag: tag.to_string(),
                value: value.to_string(),
                currency: currency.to_string(),
            },
        );
        if !accepted {
            tracing::debug!("dropping account summary row from stale request {req_id}");
            return;
        }
        if HIGHLIGHTED_SUMMARY_TAGS.contains(&tag) {
            self.shared.log(format!("Account {account} - {tag}: ${value}"));
        }
    }

    fn account_summary_end(&self, req_id: i32) {
        if self.shared.cache.live_summary_req_id() == Some(req_id) {
            self.shared.log("Account summary complete");
        }
    }

    fn position(&self, account: &str, contract: &Contract, position: Decimal, avg_cost: f64) {
        self.shared.cache.push_position(PositionItem {
            account: account.to_string(),
            contract: contract.clone(),
            position,
            avg_cost,
        });
        self.shared.log(format!(
            "Position: {account} {} {position} @ {avg_cost:.2}",
            contract.symbol
        ));
    }

    fn position_end(&self) {
        self.shared.log("Positions complete");
    }

    fn tick_price(&self, ticker_id: i32, field: i32, price: f64) {
        if !self.shared.cache.set_tick_price(ticker_id, field, price) {
            self.shared.log(format!(
                "Ignoring price tick field {field} for ticker {ticker_id}"
            ));
            return;
        }
        if let Ok(tt) = TickType::try_from(field) {
            if tt.is_top_of_book() {
                self.shared
                    .log(format!("Ticker {ticker_id} {}: ${price:.2}", tt.label()));
            }
        }
    }

    fn tick_size(&self, ticker_id: i32, field: i32, size: Decimal) {
        if !self.shared.cache.set_tick_size(ticker_id, field, size) {
            self.shared.log(format!(
                "Ignoring size tick field {field} for ticker {ticker_id}"
            ));
        }
    }

    fn tick_string(&self, ticker_id: i32, field: i32, value: &str) {
        tracing::trace!(
            "tick string {ticker_id} {}: {value}",
            protocol::tick_field_name(field)
        );
    }

    fn open_order(&self, order_id: i64, contract: &Contract, order: &Order, state: &OrderState) {
        self.shared
            .cache
            .upsert_open_order(order_id, contract, order, state);
        self.shared.log(format!(
            "Open order: {order_id} {} {} {}",
            contract.symbol, order.action, order.total_quantity
        ));
    }

    fn open_order_end(&self) {
        self.shared.log("Open orders complete");
    }

    fn order_status(&self, update: &OrderStatusUpdate) {
        if self.shared.cache.upsert_order_status(update) == Upsert::Inserted {
            tracing::debug!("status for order {} arrived before its open order", update.order_id);
        }
        self.shared.log(format!(
            "Order status: {} {} filled: {} remaining: {} avg price: {:.2}",
            update.order_id, update.status, update.filled, update.remaining, update.avg_fill_price
        ));
    }
}
