//! Callback-fed caches behind a single data lock.
//!
//! Writers are the callback adapter on the pump thread and the request
//! methods that reset a cache before re-requesting it. Readers get owned
//! copies, never references into the lock.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::models::account::{AccountSummaryItem, PositionItem};
use crate::models::contract::Contract;
use crate::models::market_data::{Quote, TickKey};
use crate::models::order::{Order, OrderInfo, OrderState, OrderStatusUpdate};
use crate::protocol::TickType;

#[derive(Debug, Default)]
struct CacheData {
    managed_accounts: Vec<String>,
    account_summary: Vec<AccountSummaryItem>,
    /// Request id whose summary rows are currently accepted.
    summary_req_id: Option<i32>,
    positions: Vec<PositionItem>,
    /// Insertion-ordered, unique by `order_id`.
    orders: Vec<OrderInfo>,
    tick_prices: BTreeMap<TickKey, f64>,
    tick_sizes: BTreeMap<TickKey, Decimal>,
}

/// Outcome of an order upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Default)]
pub struct DataCache {
    data: Mutex<CacheData>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Managed accounts
    // ========================================================================

    /// Replaces the account list from a comma-separated string. Blank entries
    /// are dropped.
    pub fn set_managed_accounts(&self, accounts_list: &str) -> Vec<String> {
        let list: Vec<String> = accounts_list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self.data.lock().managed_accounts = list.clone();
        list
    }

    pub fn managed_accounts(&self) -> Vec<String> {
        self.data.lock().managed_accounts.clone()
    }

    // ========================================================================
    // Account summary
    // ========================================================================

    /// Clears the summary and makes `req_id` the only accepted request.
    /// Returns the request id it replaces.
    pub fn begin_account_summary(&self, req_id: i32) -> Option<i32> {
        let mut data = self.data.lock();
        data.account_summary.clear();
        data.summary_req_id.replace(req_id)
    }

    /// Appends a row if it belongs to the live request. Rows from an older
    /// request are dropped and `false` is returned.
    pub fn push_account_summary(&self, req_id: i32, item: AccountSummaryItem) -> bool {
        let mut data = self.data.lock();
        if data.summary_req_id != Some(req_id) {
            return false;
        }
        data.account_summary.push(item);
        true
    }

    pub fn live_summary_req_id(&self) -> Option<i32> {
        self.data.lock().summary_req_id
    }

    pub fn account_summary(&self) -> Vec<AccountSummaryItem> {
        self.data.lock().account_summary.clone()
    }

    // ========================================================================
    // Positions
    // ========================================================================

    pub fn begin_positions(&self) {
        self.data.lock().positions.clear();
    }

    pub fn push_position(&self, item: PositionItem) {
        self.data.lock().positions.push(item);
    }

    pub fn positions(&self) -> Vec<PositionItem> {
        self.data.lock().positions.clone()
    }

    // ========================================================================
    // Orders
    // ========================================================================

    pub fn begin_open_orders(&self) {
        self.data.lock().orders.clear();
    }

    /// Inserts or replaces the order details. A non-empty `state.status`
    /// becomes the order's status in both cases.
    pub fn upsert_open_order(
        &self,
        order_id: i64,
        contract: &Contract,
        order: &Order,
        state: &OrderState,
    ) -> Upsert {
        let mut data = self.data.lock();
        if let Some(info) = data.orders.iter_mut().find(|o| o.order_id == order_id) {
            info.contract = contract.clone();
            info.order = order.clone();
            info.order_state = state.clone();
            if !state.status.is_empty() {
                info.status = state.status.clone();
            }
            return Upsert::Updated;
        }
        data.orders.push(OrderInfo {
            order_id,
            contract: contract.clone(),
            order: order.clone(),
            order_state: state.clone(),
            status: state.status.clone(),
            remaining: order.total_quantity,
            ..OrderInfo::default()
        });
        Upsert::Inserted
    }

    /// Applies a status report. An unknown id gets a skeleton record so the
    /// status is not lost when it beats its open-order callback.
    pub fn upsert_order_status(&self, update: &OrderStatusUpdate) -> Upsert {
        let mut data = self.data.lock();
        if let Some(info) = data
            .orders
            .iter_mut()
            .find(|o| o.order_id == update.order_id)
        {
            info.apply_status(update);
            return Upsert::Updated;
        }
        let mut info = OrderInfo {
            order_id: update.order_id,
            ..OrderInfo::default()
        };
        info.order.order_id = update.order_id;
        info.apply_status(update);
        data.orders.push(info);
        Upsert::Inserted
    }

    pub fn open_orders(&self) -> Vec<OrderInfo> {
        self.data.lock().orders.clone()
    }

    pub fn order(&self, order_id: i64) -> Option<OrderInfo> {
        self.data
            .lock()
            .orders
            .iter()
            .find(|o| o.order_id == order_id)
            .cloned()
    }

    // ========================================================================
    // Ticks
    // ========================================================================

    /// Stores the latest price. Returns `false` if `field` cannot be keyed.
    pub fn set_tick_price(&self, ticker_id: i32, field: i32, price: f64) -> bool {
        match TickKey::new(ticker_id, field) {
            Some(key) => {
                self.data.lock().tick_prices.insert(key, price);
                true
            }
            None => false,
        }
    }

    /// Stores the latest size. Returns `false` if `field` cannot be keyed.
    pub fn set_tick_size(&self, ticker_id: i32, field: i32, size: Decimal) -> bool {
        match TickKey::new(ticker_id, field) {
            Some(key) => {
                self.data.lock().tick_sizes.insert(key, size);
                true
            }
            None => false,
        }
    }

    pub fn tick_prices(&self) -> BTreeMap<TickKey, f64> {
        self.data.lock().tick_prices.clone()
    }

    pub fn tick_sizes(&self) -> BTreeMap<TickKey, Decimal> {
        self.data.lock().tick_sizes.clone()
    }

    pub fn tick_price(&self, ticker_id: i32, field: TickType) -> Option<f64> {
        let key = TickKey::new(ticker_id, field.code())?;
        self.data.lock().tick_prices.get(&key).copied()
    }

    /// Bid/ask/last for one ticker, read under a single lock.
    pub fn quote(&self, ticker_id: i32) -> Quote {
        let data = self.data.lock();
        Quote::from_lookup(ticker_id, |tt| {
            TickKey::new(ticker_id, tt.code()).and_then(|k| data.tick_prices.get(&k).copied())
        })
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    pub fn clear_all(&self) {
        let mut data = self.data.lock();
        *data = CacheData::default();
    }
}
