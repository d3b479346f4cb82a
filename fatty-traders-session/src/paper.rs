//! In-process simulated gateway.
//!
//! [`PaperGateway`] implements [`Transport`] against a small in-memory ledger
//! instead of a socket. Requests queue [`IBEvent`]s; the queue's condvar is
//! the reader signal the pump waits on. Prices move by a fixed cycle of
//! offsets every time a signal wait comes back empty, so runs are
//! reproducible.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::{Result, TransportError};
use crate::models::account::PositionItem;
use crate::models::contract::Contract;
use crate::models::order::{Action, Order, OrderState, OrderStatusUpdate, OrderType};
use crate::protocol::{MarketDataType, TickType, ERR_CANCEL_UNKNOWN_ORDER};
use crate::transport::Transport;
use crate::wrapper::{EventHandler, IBEvent};

/// Price used for symbols the ledger has never seen.
const FALLBACK_PRICE: f64 = 100.0;
const HALF_SPREAD: f64 = 0.01;
/// Per-step drift, in dollars.
const DRIFT_CYCLE: [f64; 6] = [0.05, -0.03, 0.04, -0.06, 0.02, -0.02];

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub accounts: Vec<String>,
    /// Id handed out with the handshake acknowledgment.
    pub first_order_id: i64,
    pub cash: f64,
    /// Last prices by symbol.
    pub prices: BTreeMap<String, f64>,
    pub positions: Vec<PositionItem>,
    /// Fail every `connect` with a refusal.
    pub refuse_connections: bool,
    /// Send next-valid-id on connect. Off simulates a gateway that accepts the
    /// socket but never finishes the handshake.
    pub acknowledge_handshake: bool,
}

impl Default for PaperConfig {
    fn default() -> Self {
        let account = "DU1234567".to_string();
        let prices = [("AAPL", 190.0), ("MSFT", 410.0), ("SPY", 520.0)]
            .into_iter()
            .map(|(s, p)| (s.to_string(), p))
            .collect();
        Self {
            positions: vec![PositionItem {
                account: account.clone(),
                contract: Contract::stock("AAPL"),
                position: Decimal::from(10),
                avg_cost: 180.0,
            }],
            accounts: vec![account],
            first_order_id: 1,
            cash: 100_000.0,
            prices,
            refuse_connections: false,
            acknowledge_handshake: true,
        }
    }
}

impl PaperConfig {
    pub fn refusing() -> Self {
        Self {
            refuse_connections: true,
            ..Self::default()
        }
    }

    pub fn without_handshake() -> Self {
        Self {
            acknowledge_handshake: false,
            ..Self::default()
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone)]
struct WorkingOrder {
    contract: Contract,
    order: Order,
}

#[derive(Debug)]
struct Ledger {
    cash: f64,
    prices: BTreeMap<String, f64>,
    positions: Vec<PositionItem>,
    subscriptions: BTreeMap<i32, Contract>,
    working: BTreeMap<i64, WorkingOrder>,
    market_data_type: MarketDataType,
    step: usize,
}

impl Ledger {
    fn price(&mut self, symbol: &str) -> f64 {
        *self
            .prices
            .entry(symbol.to_string())
            .or_insert(FALLBACK_PRICE)
    }

    fn position_value(&self, gross: bool) -> f64 {
        self.positions
            .iter()
            .map(|p| {
                let last = self
                    .prices
                    .get(&p.contract.symbol)
                    .copied()
                    .unwrap_or(p.avg_cost);
                let qty = p.position.to_f64().unwrap_or(0.0);
                if gross {
                    qty.abs() * last
                } else {
                    qty * last
                }
            })
            .sum()
    }

    fn summary_value(&self, tag: &str) -> Option<f64> {
        let net_liq = self.cash + self.position_value(false);
        let value = match tag {
            "NetLiquidation" | "EquityWithLoanValue" | "PreviousEquityWithLoanValue" => net_liq,
            "TotalCashValue" | "SettledCash" | "AvailableFunds" => self.cash,
            "AccruedCash" => 0.0,
            "BuyingPower" => self.cash * 4.0,
            "GrossPositionValue" => self.position_value(true),
            _ => return None,
        };
        Some(value)
    }

    fn is_delayed(&self) -> bool {
        matches!(
            self.market_data_type,
            MarketDataType::Delayed | MarketDataType::DelayedFrozen
        )
    }

    fn quote_ticks(&mut self, ticker_id: i32, symbol: &str, out: &mut Vec<IBEvent>) {
        let last = self.price(symbol);
        let (bid, ask, last_code) = if self.is_delayed() {
            (TickType::DelayedBid, TickType::DelayedAsk, TickType::DelayedLast)
        } else {
            (TickType::Bid, TickType::Ask, TickType::Last)
        };
        for (field, price) in [
            (bid, last - HALF_SPREAD),
            (ask, last + HALF_SPREAD),
            (last_code, last),
        ] {
            out.push(IBEvent::TickPrice {
                ticker_id,
                field: field.code(),
                price: round_cents(price),
            });
        }
    }

    fn size_ticks(&self, ticker_id: i32, out: &mut Vec<IBEvent>) {
        let (bid_size, ask_size) = if self.is_delayed() {
            (TickType::DelayedBidSize, TickType::DelayedAskSize)
        } else {
            (TickType::BidSize, TickType::AskSize)
        };
        for field in [bid_size, ask_size] {
            out.push(IBEvent::TickSize {
                ticker_id,
                field: field.code(),
                size: Decimal::from(100),
            });
        }
    }

    /// Fill price if the order is marketable right now.
    fn marketable_price(&mut self, contract: &Contract, order: &Order) -> Option<f64> {
        let last = self.price(&contract.symbol);
        let (bid, ask) = (last - HALF_SPREAD, last + HALF_SPREAD);
        let touch = match order.action {
            Action::Buy => ask,
            Action::Sell => bid,
        };
        match (&order.order_type, order.lmt_price) {
            (OrderType::Market, _) => Some(touch),
            (OrderType::Limit, Some(limit)) => match order.action {
                Action::Buy if limit >= ask => Some(ask),
                Action::Sell if limit <= bid => Some(bid),
                _ => None,
            },
            _ => None,
        }
    }

    fn book_fill(
        &mut self,
        account: &str,
        contract: &Contract,
        action: Action,
        qty: Decimal,
        price: f64,
    ) {
        let signed = match action {
            Action::Buy => qty,
            Action::Sell => -qty,
        };
        self.cash -= signed.to_f64().unwrap_or(0.0) * price;

        if let Some(pos) = self
            .positions
            .iter_mut()
            .find(|p| p.account == account && p.contract.symbol == contract.symbol)
        {
            let old = pos.position.to_f64().unwrap_or(0.0);
            let new = pos.position + signed;
            if action == Action::Buy && !new.is_zero() {
                let added = signed.to_f64().unwrap_or(0.0);
                let total = new.to_f64().unwrap_or(1.0);
                pos.avg_cost = (old * pos.avg_cost + added * price) / total;
            }
            pos.position = new;
            return;
        }
        self.positions.push(PositionItem {
            account: account.to_string(),
            contract: contract.clone(),
            position: signed,
            avg_cost: price,
        });
    }

    fn drift(&mut self) -> Vec<IBEvent> {
        if self.subscriptions.is_empty() {
            return Vec::new();
        }
        let delta = DRIFT_CYCLE[self.step % DRIFT_CYCLE.len()];
        self.step += 1;

        let subs: Vec<(i32, String)> = self
            .subscriptions
            .iter()
            .map(|(id, c)| (*id, c.symbol.clone()))
            .collect();
        let mut moved = Vec::new();
        for (_, symbol) in &subs {
            if !moved.contains(symbol) {
                let last = self.price(symbol);
                self.prices.insert(symbol.clone(), round_cents(last + delta));
                moved.push(symbol.clone());
            }
        }

        let mut events = Vec::new();
        for (ticker_id, symbol) in subs {
            self.quote_ticks(ticker_id, &symbol, &mut events);
        }
        events
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// PaperGateway
// ============================================================================

/// Simulated TWS/Gateway.
pub struct PaperGateway {
    config: PaperConfig,
    connected: AtomicBool,
    queue: Mutex<VecDeque<IBEvent>>,
    signal: Condvar,
    ledger: Mutex<Ledger>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new(PaperConfig::default())
    }
}

impl PaperGateway {
    pub fn new(config: PaperConfig) -> Self {
        let ledger = Ledger {
            cash: config.cash,
            prices: config.prices.clone(),
            positions: config.positions.clone(),
            subscriptions: BTreeMap::new(),
            working: BTreeMap::new(),
            market_data_type: MarketDataType::default(),
            step: 0,
        };
        Self {
            config,
            connected: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            ledger: Mutex::new(ledger),
        }
    }

    /// Queues a connection-closed callback. The gateway reports itself
    /// disconnected once that callback has been delivered.
    pub fn simulate_connection_loss(&self) {
        tracing::info!("paper gateway: simulating connection loss");
        self.enqueue([IBEvent::ConnectionClosed]);
    }

    /// Queues an arbitrary server message.
    pub fn inject(&self, event: IBEvent) {
        self.enqueue([event]);
    }

    /// Messages waiting for the next dispatch round.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Current simulated last price for `symbol`.
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.ledger.lock().prices.get(symbol).copied()
    }

    fn enqueue(&self, events: impl IntoIterator<Item = IBEvent>) {
        let mut queue = self.queue.lock();
        queue.extend(events);
        self.signal.notify_all();
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn default_account(&self) -> String {
        self.config.accounts.first().cloned().unwrap_or_default()
    }
}

impl Transport for PaperGateway {
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<()> {
        if self.config.refuse_connections {
            return Err(TransportError::Refused {
                host: host.to_string(),
                port,
                reason: "paper gateway is refusing connections".to_string(),
            });
        }
        tracing::info!("paper gateway: client {client_id} connected as {host}:{port}");

        self.queue.lock().clear();
        self.connected.store(true, Ordering::Release);

        let mut events = vec![
            IBEvent::ConnectAck,
            IBEvent::ManagedAccounts {
                accounts: self.config.accounts.join(","),
            },
        ];
        if self.config.acknowledge_handshake {
            events.push(IBEvent::NextValidId {
                order_id: self.config.first_order_id,
            });
        }
        self.enqueue(events);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let mut queue = self.queue.lock();
        queue.clear();
        self.signal.notify_all();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn wait_for_signal(&self, timeout: Duration) -> bool {
        {
            let mut queue = self.queue.lock();
            if !queue.is_empty() {
                return true;
            }
            self.signal.wait_for(&mut queue, timeout);
            if !queue.is_empty() {
                return true;
            }
        }
        if !self.is_connected() {
            return false;
        }

        let ticks = self.ledger.lock().drift();
        if ticks.is_empty() {
            return false;
        }
        self.enqueue(ticks);
        true
    }

    fn process_messages(&self, handler: &dyn EventHandler) {
        let batch: Vec<IBEvent> = self.queue.lock().drain(..).collect();
        for event in batch {
            event.dispatch(handler);
            if event == IBEvent::ConnectionClosed {
                self.connected.store(false, Ordering::Release);
                self.queue.lock().clear();
                break;
            }
        }
    }

    fn req_managed_accounts(&self) -> Result<()> {
        self.ensure_connected()?;
        self.enqueue([IBEvent::ManagedAccounts {
            accounts: self.config.accounts.join(","),
        }]);
        Ok(())
    }

    fn req_account_summary(&self, req_id: i32, _group: &str, tags: &str) -> Result<()> {
        self.ensure_connected()?;
        let mut events = Vec::new();
        {
            let ledger = self.ledger.lock();
            for account in &self.config.accounts {
                for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    if let Some(value) = ledger.summary_value(tag) {
                        events.push(IBEvent::AccountSummary {
                            req_id,
                            account: account.clone(),
                            tag: tag.to_string(),
                            value: format!("{value:.2}"),
                            currency: "USD".to_string(),
                        });
                    }
                }
            }
        }
        events.push(IBEvent::AccountSummaryEnd { req_id });
        self.enqueue(events);
        Ok(())
    }

    fn cancel_account_summary(&self, req_id: i32) -> Result<()> {
        self.ensure_connected()?;
        tracing::debug!("paper gateway: account summary {req_id} cancelled");
        Ok(())
    }

    fn req_positions(&self) -> Result<()> {
        self.ensure_connected()?;
        let mut events: Vec<IBEvent> = self
            .ledger
            .lock()
            .positions
            .iter()
            .map(|p| IBEvent::Position {
                account: p.account.clone(),
                contract: p.contract.clone(),
                position: p.position,
                avg_cost: p.avg_cost,
            })
            .collect();
        events.push(IBEvent::PositionEnd);
        self.enqueue(events);
        Ok(())
    }

    fn req_market_data_type(&self, market_data_type: MarketDataType) -> Result<()> {
        self.ensure_connected()?;
        self.ledger.lock().market_data_type = market_data_type;
        Ok(())
    }

    fn req_mkt_data(&self, ticker_id: i32, contract: &Contract) -> Result<()> {
        self.ensure_connected()?;
        let mut events = Vec::new();
        {
            let mut ledger = self.ledger.lock();
            ledger.subscriptions.insert(ticker_id, contract.clone());
            ledger.quote_ticks(ticker_id, &contract.symbol, &mut events);
            ledger.size_ticks(ticker_id, &mut events);
        }
        self.enqueue(events);
        Ok(())
    }

    fn cancel_mkt_data(&self, ticker_id: i32) -> Result<()> {
        self.ensure_connected()?;
        self.ledger.lock().subscriptions.remove(&ticker_id);
        Ok(())
    }

    fn place_order(&self, order_id: i64, contract: &Contract, order: &Order) -> Result<()> {
        self.ensure_connected()?;
        let mut order = order.clone();
        order.order_id = order_id;
        if order.account.is_empty() {
            order.account = self.default_account();
        }

        let submitted = OrderState {
            status: "Submitted".to_string(),
            ..OrderState::default()
        };
        let mut events = vec![
            IBEvent::OpenOrder {
                order_id,
                contract: contract.clone(),
                order: order.clone(),
                state: submitted,
            },
            IBEvent::OrderStatus(OrderStatusUpdate {
                order_id,
                status: "Submitted".to_string(),
                remaining: order.total_quantity,
                ..OrderStatusUpdate::default()
            }),
        ];

        {
            let mut ledger = self.ledger.lock();
            match ledger.marketable_price(contract, &order) {
                Some(price) => {
                    let price = round_cents(price);
                    ledger.book_fill(
                        &order.account,
                        contract,
                        order.action,
                        order.total_quantity,
                        price,
                    );
                    events.push(IBEvent::OrderStatus(OrderStatusUpdate {
                        order_id,
                        status: "Filled".to_string(),
                        filled: order.total_quantity,
                        remaining: Decimal::ZERO,
                        avg_fill_price: price,
                        last_fill_price: price,
                        ..OrderStatusUpdate::default()
                    }));
                }
                None => {
                    ledger.working.insert(
                        order_id,
                        WorkingOrder {
                            contract: contract.clone(),
                            order,
                        },
                    );
                }
            }
        }
        self.enqueue(events);
        Ok(())
    }

    fn cancel_order(&self, order_id: i64) -> Result<()> {
        self.ensure_connected()?;
        let removed = self.ledger.lock().working.remove(&order_id);
        let event = match removed {
            Some(w) => IBEvent::OrderStatus(OrderStatusUpdate {
                order_id,
                status: "Cancelled".to_string(),
                remaining: w.order.total_quantity,
                ..OrderStatusUpdate::default()
            }),
            None => IBEvent::Error {
                id: order_id,
                code: ERR_CANCEL_UNKNOWN_ORDER,
                message: format!("OrderId {order_id} that needs to be cancelled is not found."),
            },
        };
        self.enqueue([event]);
        Ok(())
    }

    fn req_all_open_orders(&self) -> Result<()> {
        self.ensure_connected()?;
        let mut events = Vec::new();
        for (order_id, w) in self.ledger.lock().working.iter() {
            events.push(IBEvent::OpenOrder {
                order_id: *order_id,
                contract: w.contract.clone(),
                order: w.order.clone(),
                state: OrderState {
                    status: "Submitted".to_string(),
                    ..OrderState::default()
                },
            });
            events.push(IBEvent::OrderStatus(OrderStatusUpdate {
                order_id: *order_id,
                status: "Submitted".to_string(),
                remaining: w.order.total_quantity,
                ..OrderStatusUpdate::default()
            }));
        }
        events.push(IBEvent::OpenOrderEnd);
        self.enqueue(events);
        Ok(())
    }
}
