//! Session lifecycle and cache behaviour, driven through scripted transports.
//!
//! `Scripted` records every request and replays whatever events a test
//! injects. The paper gateway tests at the bottom run the full request and
//! callback round trip.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fatty_traders_session::{
    Action, ConnectError, ConnectionState, Contract, EventHandler, IBEvent, MarketDataType,
    Order, OrderState, OrderStatusUpdate, PaperConfig, PaperGateway, Session, SessionConfig,
    TickType, Transport, TransportError,
};
use parking_lot::{Condvar, Mutex};
use rust_decimal::Decimal;

// ============================================================================
// Helpers
// ============================================================================

/// Holds a `cancel_account_summary` call for one request id until released.
#[derive(Default)]
struct CancelGate {
    req_id: Mutex<Option<i32>>,
    entered: AtomicBool,
    released: Mutex<bool>,
    opened: Condvar,
}

impl CancelGate {
    fn arm(&self, req_id: i32) {
        *self.req_id.lock() = Some(req_id);
    }

    fn release(&self) {
        *self.released.lock() = true;
        self.opened.notify_all();
    }

    fn pass(&self, req_id: i32) {
        if *self.req_id.lock() != Some(req_id) {
            return;
        }
        self.entered.store(true, Ordering::SeqCst);
        let mut released = self.released.lock();
        while !*released {
            self.opened.wait(&mut released);
        }
    }
}

#[derive(Default)]
struct Scripted {
    refuse: bool,
    silent: bool,
    /// Sent in place of the handshake acknowledgment.
    on_connect: Option<IBEvent>,
    cancel_gate: CancelGate,
    connected: AtomicBool,
    calls: Mutex<Vec<String>>,
    queue: Mutex<VecDeque<IBEvent>>,
    signal: Condvar,
}

impl Scripted {
    fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Accepts the socket, never acknowledges the handshake.
    fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Accepts the socket, then reports `event` instead of a valid id.
    fn failing_handshake(event: IBEvent) -> Self {
        Self {
            on_connect: Some(event),
            ..Self::default()
        }
    }

    fn inject(&self, event: IBEvent) {
        self.queue.lock().push_back(event);
        self.signal.notify_all();
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> fatty_traders_session::errors::Result<()> {
        self.calls.lock().push(call);
        Ok(())
    }
}

impl Transport for Scripted {
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), TransportError> {
        if self.refuse {
            return Err(TransportError::Refused {
                host: host.to_string(),
                port,
                reason: "scripted refusal".into(),
            });
        }
        self.calls.lock().push(format!("connect {host}:{port} {client_id}"));
        self.connected.store(true, Ordering::SeqCst);
        if let Some(event) = &self.on_connect {
            self.inject(event.clone());
        } else if !self.silent {
            self.inject(IBEvent::NextValidId { order_id: 100 });
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.calls.lock().push("disconnect".into());
        self.connected.store(false, Ordering::SeqCst);
        self.signal.notify_all();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn wait_for_signal(&self, timeout: Duration) -> bool {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.signal.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }

    fn process_messages(&self, handler: &dyn EventHandler) {
        let batch: Vec<IBEvent> = self.queue.lock().drain(..).collect();
        for event in batch {
            event.dispatch(handler);
        }
    }

    fn req_managed_accounts(&self) -> Result<(), TransportError> {
        self.record("req_managed_accounts".into())
    }

    fn req_account_summary(
        &self,
        req_id: i32,
        group: &str,
        _tags: &str,
    ) -> Result<(), TransportError> {
        self.record(format!("req_account_summary {req_id} {group}"))
    }

    fn cancel_account_summary(&self, req_id: i32) -> Result<(), TransportError> {
        self.record(format!("cancel_account_summary {req_id}"))?;
        self.cancel_gate.pass(req_id);
        Ok(())
    }

    fn req_positions(&self) -> Result<(), TransportError> {
        self.record("req_positions".into())
    }

    fn req_market_data_type(&self, market_data_type: MarketDataType) -> Result<(), TransportError> {
        self.record(format!("req_market_data_type {}", market_data_type.code()))
    }

    fn req_mkt_data(&self, ticker_id: i32, contract: &Contract) -> Result<(), TransportError> {
        self.record(format!("req_mkt_data {ticker_id} {}", contract.symbol))
    }

    fn cancel_mkt_data(&self, ticker_id: i32) -> Result<(), TransportError> {
        self.record(format!("cancel_mkt_data {ticker_id}"))
    }

    fn place_order(
        &self,
        order_id: i64,
        contract: &Contract,
        _order: &Order,
    ) -> Result<(), TransportError> {
        self.record(format!("place_order {order_id} {}", contract.symbol))
    }

    fn cancel_order(&self, order_id: i64) -> Result<(), TransportError> {
        self.record(format!("cancel_order {order_id}"))
    }

    fn req_all_open_orders(&self) -> Result<(), TransportError> {
        self.record("req_all_open_orders".into())
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        handshake_timeout: Duration::from_secs(2),
        signal_timeout: Duration::from_millis(20),
        pump_interval: Duration::from_millis(1),
        join_timeout: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

fn connected_session() -> Session<Scripted> {
    let session = Session::new(Scripted::default(), fast_config());
    session.connect_default().expect("scripted connect");
    session
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn logged<T: Transport>(session: &Session<T>, needle: &str) -> bool {
    session.log_lines().iter().any(|l| l.message.contains(needle))
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn connect_sends_initial_requests_after_handshake() {
    let session = connected_session();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.is_connected());
    assert_eq!(session.next_order_id(), 100);
    assert_eq!(
        session.transport().calls(),
        vec![
            "connect 127.0.0.1:4001 1",
            "req_managed_accounts",
            "req_account_summary 1 All",
            "req_positions",
            "req_market_data_type 3",
            "req_mkt_data 1 AAPL",
        ]
    );
    assert!(logged(&session, "Successfully connected to IB"));
}

#[test]
fn connect_while_connected_is_a_no_op() {
    let session = connected_session();
    session.connect("10.0.0.1", 7497, 9).unwrap();

    let connects = session
        .transport()
        .calls()
        .iter()
        .filter(|c| c.starts_with("connect"))
        .count();
    assert_eq!(connects, 1);
    assert_eq!(session.endpoint().port, 4001);
    assert!(logged(&session, "Already connected"));
}

#[test]
fn refused_connect_fails_fast_without_pump() {
    let session = Session::new(Scripted::refusing(), fast_config());
    let started = Instant::now();

    let err = session.connect("127.0.0.1", 4001, 1).unwrap_err();

    assert!(matches!(err, ConnectError::Transport(TransportError::Refused { .. })));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.pump_running());
    assert!(logged(&session, "Failed to establish socket connection"));
}

#[test]
fn missing_handshake_times_out_and_tears_down() {
    let config = SessionConfig {
        handshake_timeout: Duration::from_millis(150),
        ..fast_config()
    };
    let session = Session::new(Scripted::silent(), config);
    let started = Instant::now();

    let err = session.connect_default().unwrap_err();

    assert!(matches!(err, ConnectError::HandshakeTimeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.pump_running());
    assert!(!session.transport().is_connected());
    assert!(logged(&session, "Connection timeout"));
}

#[test]
fn loss_before_acknowledgment_ends_handshake_wait_early() {
    let losses = [
        IBEvent::ConnectionClosed,
        IBEvent::Error {
            id: -1,
            code: 504,
            message: "Not connected".into(),
        },
    ];
    for loss in losses {
        let config = SessionConfig {
            handshake_timeout: Duration::from_secs(10),
            ..fast_config()
        };
        let session = Session::new(Scripted::failing_handshake(loss), config);
        let started = Instant::now();

        let err = session.connect_default().unwrap_err();

        assert!(matches!(err, ConnectError::LostDuringHandshake));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.pump_running());
        assert!(!logged(&session, "Connection timeout"));
    }
}

#[test]
fn disconnect_on_idle_session_does_nothing() {
    let session = Session::new(Scripted::default(), fast_config());
    session.disconnect();
    session.disconnect();
    assert!(session.transport().calls().is_empty());
}

#[test]
fn disconnect_stops_pump_and_clears_caches() {
    let session = connected_session();
    session.transport().inject(IBEvent::TickPrice {
        ticker_id: 1,
        field: TickType::Bid.code(),
        price: 187.25,
    });
    assert!(wait_until(Duration::from_secs(2), || !session.tick_prices().is_empty()));

    session.disconnect();

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.pump_running());
    assert!(session.tick_prices().is_empty());
    assert!(session.managed_accounts().is_empty());
    assert_eq!(session.transport().calls().last().map(String::as_str), Some("disconnect"));
}

#[test]
fn connection_loss_error_flips_state_but_keeps_caches() {
    let session = connected_session();
    session.transport().inject(IBEvent::ManagedAccounts {
        accounts: "DU1,DU2".into(),
    });
    session.transport().inject(IBEvent::Error {
        id: -1,
        code: 504,
        message: "Not connected".into(),
    });

    assert!(wait_until(Duration::from_secs(2), || !session.is_connected()));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.transport().is_connected());
    assert_eq!(session.managed_accounts(), vec!["DU1", "DU2"]);
    assert!(logged(&session, "Error 504: Not connected"));
    assert!(logged(&session, "Connection error detected"));

    // A reported drop still leaves teardown to disconnect().
    assert!(session.pump_running());
    session.disconnect();
    assert!(!session.pump_running());
    assert!(session.managed_accounts().is_empty());
}

#[test]
fn connection_closed_callback_marks_session_down() {
    let session = connected_session();
    session.transport().inject(IBEvent::ConnectionClosed);
    assert!(wait_until(Duration::from_secs(2), || session.state()
        == ConnectionState::Disconnected));
    assert!(logged(&session, "Connection closed by TWS/Gateway"));
}

#[test]
fn reconnect_after_drop_replaces_stale_pump() {
    let session = connected_session();
    session.transport().inject(IBEvent::Error {
        id: -1,
        code: 502,
        message: "Couldn't connect to TWS".into(),
    });
    assert!(wait_until(Duration::from_secs(2), || !session.is_connected()));

    session.connect_default().unwrap();

    assert!(session.is_connected());
    let calls = session.transport().calls();
    let connects = calls.iter().filter(|c| c.starts_with("connect")).count();
    assert_eq!(connects, 2);
    assert!(calls.contains(&"disconnect".to_string()));
}

// ============================================================================
// Request guards
// ============================================================================

#[test]
fn requests_while_disconnected_log_and_skip_transport() {
    let session = Session::new(Scripted::default(), fast_config());

    assert!(!session.request_account_summary());
    assert!(!session.request_positions());
    assert!(!session.request_market_data(1, &Contract::stock("AAPL")));
    assert!(!session.request_all_open_orders());
    assert!(!session.place_order(1, &Contract::stock("AAPL"), &Order::default()));
    assert!(!session.cancel_order(1));

    assert!(session.transport().calls().is_empty());
    assert!(logged(&session, "Not connected - cannot request positions"));
    assert!(logged(&session, "Not connected - cannot place order"));
}

#[test]
fn order_calls_pass_straight_through() {
    let session = connected_session();
    let id = session.allocate_order_id();
    let order = Order::limit(Action::Buy, Decimal::from(1), 100.0);

    assert!(session.place_order(id, &Contract::stock("AAPL"), &order));
    assert!(session.cancel_order(id));

    let calls = session.transport().calls();
    assert!(calls.contains(&"place_order 100 AAPL".to_string()));
    assert!(calls.contains(&"cancel_order 100".to_string()));
    assert_eq!(session.next_order_id(), 101);
}

#[test]
fn allocated_order_ids_never_repeat() {
    let session = Arc::new(connected_session());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let s = Arc::clone(&session);
            thread::spawn(move || (0..50).map(|_| s.allocate_order_id()).collect::<Vec<_>>())
        })
        .collect();

    let mut ids: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 200);
    assert_eq!(ids[0], 100);
}

// ============================================================================
// Caches
// ============================================================================

#[test]
fn account_summary_refresh_drops_stale_rows() {
    let session = connected_session();
    // The connect sequence already issued request 1; two more back to back.
    assert!(session.request_account_summary());
    assert!(session.request_account_summary());
    let calls = session.transport().calls();
    assert!(calls.contains(&"cancel_account_summary 1".to_string()));
    assert!(calls.contains(&"cancel_account_summary 2".to_string()));

    let row = |req_id: i32, value: &str| IBEvent::AccountSummary {
        req_id,
        account: "DU1".into(),
        tag: "NetLiquidation".into(),
        value: value.into(),
        currency: "USD".into(),
    };
    session.transport().inject(row(2, "1.00"));
    session.transport().inject(row(3, "3.00"));
    session.transport().inject(row(2, "2.00"));
    session.transport().inject(IBEvent::AccountSummaryEnd { req_id: 2 });
    session.transport().inject(IBEvent::AccountSummaryEnd { req_id: 3 });

    assert!(wait_until(Duration::from_secs(2), || logged(
        &session,
        "Account summary complete"
    )));
    let rows = session.account_summary();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, "3.00");
}

#[test]
fn concurrent_summary_refreshes_send_before_cancel() {
    let session = connected_session();
    session.transport().cancel_gate.arm(1);

    thread::scope(|scope| {
        // Takes request 2 and parks while cancelling request 1.
        let first = scope.spawn(|| session.request_account_summary());
        assert!(wait_until(Duration::from_secs(2), || session
            .transport()
            .cancel_gate
            .entered
            .load(Ordering::SeqCst)));

        let second = scope.spawn(|| session.request_account_summary());
        thread::sleep(Duration::from_millis(50));
        session.transport().cancel_gate.release();

        assert!(first.join().unwrap());
        assert!(second.join().unwrap());
    });

    let calls: Vec<String> = session
        .transport()
        .calls()
        .into_iter()
        .filter(|c| c.contains("account_summary"))
        .collect();
    assert_eq!(
        calls,
        vec![
            "req_account_summary 1 All",
            "cancel_account_summary 1",
            "req_account_summary 2 All",
            "cancel_account_summary 2",
            "req_account_summary 3 All",
        ]
    );
}

#[test]
fn positions_rebuild_on_each_request() {
    let session = connected_session();
    let position = |account: &str, symbol: &str| IBEvent::Position {
        account: account.into(),
        contract: Contract::stock(symbol),
        position: Decimal::from(5),
        avg_cost: 10.0,
    };
    session.transport().inject(position("U0", "SPY"));
    assert!(wait_until(Duration::from_secs(2), || session.positions().len() == 1));

    assert!(session.request_positions());
    assert!(session.positions().is_empty());
    session.transport().inject(position("U1", "AAPL"));
    session.transport().inject(position("U2", "MSFT"));
    session.transport().inject(IBEvent::PositionEnd);
    assert!(wait_until(Duration::from_secs(2), || logged(&session, "Positions complete")));

    let accounts: Vec<String> = session.positions().into_iter().map(|p| p.account).collect();
    assert_eq!(accounts, vec!["U1", "U2"]);
}

#[test]
fn orders_upsert_by_id() {
    let session = connected_session();
    let order = Order::limit(Action::Buy, Decimal::from(3), 50.0);
    session.transport().inject(IBEvent::OpenOrder {
        order_id: 7,
        contract: Contract::stock("AAPL"),
        order: order.clone(),
        state: OrderState {
            status: "PreSubmitted".into(),
            ..OrderState::default()
        },
    });
    session.transport().inject(IBEvent::OrderStatus(OrderStatusUpdate {
        order_id: 7,
        status: "Submitted".into(),
        remaining: Decimal::from(3),
        ..OrderStatusUpdate::default()
    }));
    session.transport().inject(IBEvent::OpenOrder {
        order_id: 7,
        contract: Contract::stock("AAPL"),
        order,
        state: OrderState {
            status: "Submitted".into(),
            ..OrderState::default()
        },
    });
    session.transport().inject(IBEvent::OpenOrderEnd);
    assert!(wait_until(Duration::from_secs(2), || logged(&session, "Open orders complete")));

    let orders = session.open_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, "Submitted");
    assert_eq!(orders[0].order_state.status, "Submitted");

    assert!(session.request_all_open_orders());
    assert!(session.open_orders().is_empty());
}

#[test]
fn ticks_are_keyed_per_ticker_and_field() {
    let session = connected_session();
    for (ticker_id, field, price) in [(1, 1, 10.0), (1, 2, 10.5), (2, 1, 20.0), (1, 1, 10.1)] {
        session.transport().inject(IBEvent::TickPrice {
            ticker_id,
            field,
            price,
        });
    }
    session.transport().inject(IBEvent::TickPrice {
        ticker_id: 1,
        field: 101,
        price: 1.0,
    });
    session.transport().inject(IBEvent::TickSize {
        ticker_id: 1,
        field: 0,
        size: Decimal::from(300),
    });

    assert!(wait_until(Duration::from_secs(2), || !session.tick_sizes().is_empty()));
    assert_eq!(session.tick_prices().len(), 3);
    assert_eq!(session.tick_price(1, TickType::Bid), Some(10.1));
    assert_eq!(session.tick_price(1, TickType::Ask), Some(10.5));
    assert_eq!(session.tick_price(2, TickType::Bid), Some(20.0));
    assert!(logged(&session, "Ignoring price tick field 101 for ticker 1"));
}

// ============================================================================
// Paper gateway round trip
// ============================================================================

fn paper_session(config: PaperConfig) -> Session<PaperGateway> {
    Session::new(PaperGateway::new(config), fast_config())
}

#[test]
fn paper_session_fills_initial_caches() {
    let session = paper_session(PaperConfig::default());
    session.connect_default().unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !session.account_summary().is_empty()
            && !session.positions().is_empty()
            && !session.quote(1).is_empty()
    }));
    assert_eq!(session.managed_accounts(), vec!["DU1234567"]);
    assert_eq!(session.next_order_id(), 1);

    let quote = session.quote(1);
    assert!(quote.bid.is_some() && quote.ask.is_some() && quote.last.is_some());
    assert!(session.tick_price(1, TickType::DelayedLast).is_some());
    assert!(session.tick_price(1, TickType::Last).is_none());
}

#[test]
fn paper_market_order_reports_fill() {
    let session = paper_session(PaperConfig::default());
    session.connect_default().unwrap();

    let id = session.allocate_order_id();
    let order = Order::market(Action::Buy, Decimal::from(2));
    assert!(session.place_order(id, &Contract::stock("MSFT"), &order));

    assert!(wait_until(Duration::from_secs(2), || session
        .order(id)
        .is_some_and(|o| o.status == "Filled")));
    let info = session.order(id).unwrap();
    assert_eq!(info.filled, Decimal::from(2));
    assert_eq!(info.remaining, Decimal::ZERO);
    assert_eq!(info.contract.symbol, "MSFT");
}

#[test]
fn paper_cancel_of_unknown_order_is_logged() {
    let session = paper_session(PaperConfig::default());
    session.connect_default().unwrap();
    assert!(session.cancel_order(999));
    assert!(wait_until(Duration::from_secs(2), || logged(&session, "Error 10147")));
}

#[test]
fn paper_without_handshake_times_out() {
    let config = SessionConfig {
        handshake_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let session = Session::new(PaperGateway::new(PaperConfig::without_handshake()), config);
    assert!(matches!(
        session.connect_default(),
        Err(ConnectError::HandshakeTimeout(_))
    ));
    assert!(!session.transport().is_connected());
}

#[test]
fn paper_connection_loss_is_observed() {
    let session = paper_session(PaperConfig::default());
    session.connect_default().unwrap();
    session.transport().simulate_connection_loss();

    assert!(wait_until(Duration::from_secs(2), || !session.is_connected()));
    assert!(!session.transport().is_connected());
    assert!(!session.request_positions());
}
