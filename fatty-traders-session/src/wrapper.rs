//! Gateway callback interface.
//!
//! [`EventHandler`] is the capability a transport needs from its consumer:
//! one method per server message the session cares about, each with a no-op
//! default so implementors only override what they use. The session core
//! implements it on a small adapter rather than on `Session` itself.
//!
//! [`IBEvent`] is the same surface as data. Transports that buffer server
//! messages queue `IBEvent`s and replay them with [`IBEvent::dispatch`] on the
//! pump thread.

use rust_decimal::Decimal;

use crate::models::contract::Contract;
use crate::models::order::{Order, OrderState, OrderStatusUpdate};

// ============================================================================
// EventHandler
// ============================================================================

/// Callbacks delivered by a transport, always on the pump thread and in
/// delivery order.
#[allow(unused_variables)]
pub trait EventHandler: Send + Sync {
    // -- Connection --

    /// Handshake acknowledgment: the first valid order id for this session.
    fn next_valid_id(&self, order_id: i64) {}

    fn connect_ack(&self) {}

    fn connection_closed(&self) {}

    /// `id` is the request or order id the error refers to, `-1` if none.
    fn error(&self, id: i64, code: i32, message: &str) {}

    // -- Account --

    /// Comma-separated list of account codes.
    fn managed_accounts(&self, accounts_list: &str) {}

    fn account_summary(&self, req_id: i32, account: &str, tag: &str, value: &str, currency: &str) {
    }

    fn account_summary_end(&self, req_id: i32) {}

    fn position(&self, account: &str, contract: &Contract, position: Decimal, avg_cost: f64) {}

    fn position_end(&self) {}

    // -- Market data --

    fn tick_price(&self, ticker_id: i32, field: i32, price: f64) {}

    fn tick_size(&self, ticker_id: i32, field: i32, size: Decimal) {}

    fn tick_string(&self, ticker_id: i32, field: i32, value: &str) {}

    // -- Orders --

    fn open_order(&self, order_id: i64, contract: &Contract, order: &Order, state: &OrderState) {}

    fn open_order_end(&self) {}

    fn order_status(&self, update: &OrderStatusUpdate) {}
}

// ============================================================================
// IBEvent
// ============================================================================

/// One buffered server message.
#[derive(Debug, Clone, PartialEq)]
pub enum IBEvent {
    NextValidId {
        order_id: i64,
    },
    ConnectAck,
    ConnectionClosed,
    Error {
        id: i64,
        code: i32,
        message: String,
    },
    ManagedAccounts {
        accounts: String,
    },
    AccountSummary {
        req_id: i32,
        account: String,
        tag: String,
        value: String,
        currency: String,
    },
    AccountSummaryEnd {
        req_id: i32,
    },
    Position {
        account: String,
        contract: Contract,
        position: Decimal,
        avg_cost: f64,
    },
    PositionEnd,
    TickPrice {
        ticker_id: i32,
        field: i32,
        price: f64,
    },
    TickSize {
        ticker_id: i32,
        field: i32,
        size: Decimal,
    },
    TickString {
        ticker_id: i32,
        field: i32,
        value: String,
    },
    OpenOrder {
        order_id: i64,
        contract: Contract,
        order: Order,
        state: OrderState,
    },
    OpenOrderEnd,
    OrderStatus(OrderStatusUpdate),
}

impl IBEvent {
    /// Replays this event into `handler`.
    pub fn dispatch(&self, handler: &dyn EventHandler) {
        match self {
            Self::NextValidId { order_id } => handler.next_valid_id(*order_id),
            Self::ConnectAck => handler.connect_ack(),
            Self::ConnectionClosed => handler.connection_closed(),
            Self::Error { id, code, message } => handler.error(*id, *code, message),
            Self::ManagedAccounts { accounts } => handler.managed_accounts(accounts),
            Self::AccountSummary {
                req_id,
                account,
                tag,
                value,
                currency,
            } => handler.account_summary(*req_id, account, tag, value, currency),
            Self::AccountSummaryEnd { req_id } => handler.account_summary_end(*req_id),
            Self::Position {
                account,
                contract,
                position,
                avg_cost,
            } => handler.position(account, contract, *position, *avg_cost),
            Self::PositionEnd => handler.position_end(),
            Self::TickPrice {
                ticker_id,
                field,
                price,
            } => handler.tick_price(*ticker_id, *field, *price),
            Self::TickSize {
                ticker_id,
                field,
                size,
            } => handler.tick_size(*ticker_id, *field, *size),
            Self::TickString {
                ticker_id,
                field,
                value,
            } => handler.tick_string(*ticker_id, *field, value),
            Self::OpenOrder {
                order_id,
                contract,
                order,
                state,
            } => handler.open_order(*order_id, contract, order, state),
            Self::OpenOrderEnd => handler.open_order_end(),
            Self::OrderStatus(update) => handler.order_status(update),
        }
    }
}
