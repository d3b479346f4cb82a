//! FattyTraders status API -- REST endpoints built with axum.
//!
//! A polling front end for one [`Session`]: connection status and log pane,
//! account tables, quote panel, and order entry. Reads are served from the
//! session caches; refresh endpoints fire the matching request and return
//! immediately, the data shows up on a later poll.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use fatty_traders_session::{
    Action, Contract, Order, OrderType, SecType, Session, TimeInForce, Transport,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::models::*;

// ============================================================================
// App State
// ============================================================================

pub type SharedSession<T> = Arc<Session<T>>;

// ============================================================================
// Router
// ============================================================================

pub fn create_router<T: Transport>(session: SharedSession<T>) -> Router {
    Router::new()
        // Health / status
        .route("/health", get(handle_health::<T>))
        .route("/api/status", get(handle_status::<T>))
        .route("/api/log", get(handle_log::<T>))
        .route("/api/connect", post(handle_connect::<T>))
        .route("/api/disconnect", post(handle_disconnect::<T>))
        // Account
        .route("/api/account/summary", get(handle_account_summary::<T>))
        .route(
            "/api/account/summary/refresh",
            post(handle_refresh_account_summary::<T>),
        )
        .route("/api/account/positions", get(handle_positions::<T>))
        .route(
            "/api/account/positions/refresh",
            post(handle_refresh_positions::<T>),
        )
        // Market Data
        .route("/api/market/quote/{ticker_id}", get(handle_quote::<T>))
        .route("/api/market/ticks", get(handle_ticks::<T>))
        .route("/api/market/subscribe", post(handle_subscribe::<T>))
        .route("/api/market/unsubscribe", post(handle_unsubscribe::<T>))
        // Orders
        .route("/api/order/list", get(handle_get_orders::<T>))
        .route("/api/order/refresh", post(handle_refresh_orders::<T>))
        .route("/api/order/place", post(handle_place_order::<T>))
        .route("/api/order/cancel", post(handle_cancel_order::<T>))
        .layer(CorsLayer::permissive())
        .with_state(session)
}

// ============================================================================
// Query / Body parameter types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub since: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountQuery {
    pub account: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeQuery {
    pub ticker_id: Option<i32>,
    pub symbol: Option<String>,
    pub sec_type: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeQuery {
    pub ticker_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderBody {
    pub symbol: Option<String>,
    pub sec_type: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub action: Option<String>,
    pub quantity: Option<f64>,
    pub order_type: Option<String>,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub tif: Option<String>,
    pub account: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderBody {
    pub order_id: Option<i64>,
}

// ============================================================================
// Helpers
// ============================================================================

fn ok_json<T: serde::Serialize>(msg: &str, data: T) -> Response {
    Json(ApiResponse::success(msg, data)).into_response()
}

fn ok_msg(msg: &str) -> Response {
    Json(ApiResponse::<()>::success_msg(msg)).into_response()
}

fn err_json(msg: &str, code: i32) -> Response {
    let status = match code {
        404 => StatusCode::NOT_FOUND,
        500 => StatusCode::INTERNAL_SERVER_ERROR,
        503 => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(ApiResponse::error(msg, code))).into_response()
}

fn not_connected() -> Response {
    err_json("Not connected to IB", 503)
}

fn status_view<T: Transport>(session: &Session<T>) -> StatusView {
    StatusView {
        state: session.state(),
        connected: session.is_connected(),
        endpoint: session.endpoint(),
        next_order_id: session.next_order_id(),
        managed_accounts: session.managed_accounts(),
        log_seq: session.last_log_seq(),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

fn to_contract(
    symbol: String,
    sec_type: Option<&str>,
    exchange: Option<&str>,
    currency: Option<&str>,
) -> Contract {
    Contract {
        symbol,
        sec_type: sec_type
            .and_then(|s| s.parse().ok())
            .unwrap_or(SecType::Stock),
        exchange: exchange.unwrap_or("SMART").to_string(),
        currency: currency.unwrap_or("USD").to_string(),
        ..Contract::default()
    }
}

/// Validates an order body into a contract and order. Errors are ready to
/// return as the response.
fn build_order(body: &PlaceOrderBody) -> Result<(Contract, Order), Response> {
    let symbol = non_empty(&body.symbol)
        .ok_or_else(|| err_json("Missing required parameter: symbol", 400))?;
    let action: Action = body
        .action
        .as_deref()
        .ok_or_else(|| err_json("Missing required parameter: action (BUY/SELL)", 400))?
        .parse()
        .map_err(|e: String| err_json(&e, 400))?;
    let quantity = body
        .quantity
        .filter(|q| *q > 0.0)
        .and_then(Decimal::from_f64)
        .ok_or_else(|| err_json("Missing required parameter: quantity", 400))?;

    let order_type = body
        .order_type
        .as_deref()
        .unwrap_or("MKT")
        .parse::<OrderType>()
        .unwrap_or(OrderType::Market);

    let mut order = match order_type {
        OrderType::Market => Order::market(action, quantity),
        OrderType::Limit => {
            let price = body.limit_price.ok_or_else(|| {
                err_json("Missing required parameter for limit order: limitPrice", 400)
            })?;
            Order::limit(action, quantity, price)
        }
        OrderType::Stop => {
            let price = body.stop_price.ok_or_else(|| {
                err_json("Missing required parameter for stop order: stopPrice", 400)
            })?;
            Order {
                action,
                order_type: OrderType::Stop,
                total_quantity: quantity,
                aux_price: Some(price),
                ..Order::default()
            }
        }
        _ => return Err(err_json("Invalid order type. Supported: MKT, LMT, STP", 400)),
    };
    order.tif = match body.tif.as_deref().map(str::to_ascii_uppercase).as_deref() {
        None | Some("DAY") => TimeInForce::Day,
        Some("GTC") => TimeInForce::GoodTilCancelled,
        Some("IOC") => TimeInForce::ImmediateOrCancel,
        Some(other) => TimeInForce::Other(other.to_string()),
    };
    if let Some(account) = non_empty(&body.account) {
        order.account = account;
    }

    let contract = to_contract(
        symbol,
        body.sec_type.as_deref(),
        body.exchange.as_deref(),
        body.currency.as_deref(),
    );
    Ok((contract, order))
}

// ============================================================================
// Route Handlers -- status
// ============================================================================

async fn handle_health<T: Transport>(State(session): State<SharedSession<T>>) -> Response {
    let connected = session.is_connected();
    Json(serde_json::json!({
        "status": if connected { "healthy" } else { "disconnected" },
        "ibConnected": connected,
        "server": "FattyTraders Session Server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn handle_status<T: Transport>(State(session): State<SharedSession<T>>) -> Response {
    ok_json("Status retrieved", status_view(&session))
}

async fn handle_log<T: Transport>(
    State(session): State<SharedSession<T>>,
    Query(q): Query<LogQuery>,
) -> Response {
    let lines = session.log_lines_since(q.since.unwrap_or(0));
    ok_json("Log retrieved", lines)
}

async fn handle_connect<T: Transport>(
    State(session): State<SharedSession<T>>,
    Query(q): Query<ConnectQuery>,
) -> Response {
    let config = session.config();
    let host = q.host.unwrap_or_else(|| config.host.clone());
    let port = q.port.unwrap_or(config.port);
    let client_id = q.client_id.unwrap_or(config.client_id);

    // connect blocks for up to the handshake timeout.
    let worker = Arc::clone(&session);
    let joined =
        tokio::task::spawn_blocking(move || worker.connect(&host, port, client_id)).await;

    match joined {
        Ok(Ok(())) => ok_json("Connected", status_view(&session)),
        Ok(Err(e)) => err_json(&format!("Connection failed: {e}"), 503),
        Err(e) => err_json(&format!("Connect task failed: {e}"), 500),
    }
}

async fn handle_disconnect<T: Transport>(State(session): State<SharedSession<T>>) -> Response {
    let worker = Arc::clone(&session);
    match tokio::task::spawn_blocking(move || worker.disconnect()).await {
        Ok(()) => ok_msg("Disconnected"),
        Err(e) => err_json(&format!("Disconnect task failed: {e}"), 500),
    }
}

// ============================================================================
// Route Handlers -- account
// ============================================================================

async fn handle_account_summary<T: Transport>(
    State(session): State<SharedSession<T>>,
    Query(q): Query<AccountQuery>,
) -> Response {
    let mut rows = session.account_summary();
    if let Some(account) = non_empty(&q.account) {
        rows.retain(|r| r.account == account);
    }
    ok_json("Account summary retrieved", rows)
}

async fn handle_refresh_account_summary<T: Transport>(
    State(session): State<SharedSession<T>>,
) -> Response {
    if session.request_account_summary() {
        ok_msg("Account summary requested")
    } else {
        not_connected()
    }
}

async fn handle_positions<T: Transport>(
    State(session): State<SharedSession<T>>,
    Query(q): Query<AccountQuery>,
) -> Response {
    let mut positions = session.positions();
    if let Some(account) = non_empty(&q.account) {
        positions.retain(|p| p.account == account);
    }
    ok_json("Positions retrieved", positions)
}

async fn handle_refresh_positions<T: Transport>(
    State(session): State<SharedSession<T>>,
) -> Response {
    if session.request_positions() {
        ok_msg("Positions requested")
    } else {
        not_connected()
    }
}

// ============================================================================
// Route Handlers -- market data
// ============================================================================

async fn handle_quote<T: Transport>(
    State(session): State<SharedSession<T>>,
    Path(ticker_id): Path<i32>,
) -> Response {
    let quote = session.quote(ticker_id);
    if quote.is_empty() {
        return err_json(&format!("No market data for ticker {ticker_id}"), 404);
    }
    ok_json("Quote retrieved", quote)
}

async fn handle_ticks<T: Transport>(State(session): State<SharedSession<T>>) -> Response {
    use rust_decimal::prelude::ToPrimitive;

    let prices = session
        .tick_prices()
        .into_iter()
        .map(|(key, value)| TickRow::new(key, value))
        .collect();
    let sizes = session
        .tick_sizes()
        .into_iter()
        .map(|(key, size)| TickRow::new(key, size.to_f64().unwrap_or_default()))
        .collect();
    ok_json("Ticks retrieved", TickTable { prices, sizes })
}

async fn handle_subscribe<T: Transport>(
    State(session): State<SharedSession<T>>,
    Query(q): Query<SubscribeQuery>,
) -> Response {
    let Some(ticker_id) = q.ticker_id else {
        return err_json("Missing required parameter: tickerId", 400);
    };
    let Some(symbol) = non_empty(&q.symbol) else {
        return err_json("Missing required parameter: symbol", 400);
    };
    let contract = to_contract(
        symbol,
        q.sec_type.as_deref(),
        q.exchange.as_deref(),
        q.currency.as_deref(),
    );

    if !session.request_market_data(ticker_id, &contract) {
        return not_connected();
    }
    ok_json(
        "Market data subscription created",
        serde_json::json!({
            "tickerId": ticker_id,
            "symbol": contract.symbol,
            "secType": contract.sec_type.to_string(),
        }),
    )
}

async fn handle_unsubscribe<T: Transport>(
    State(session): State<SharedSession<T>>,
    Query(q): Query<UnsubscribeQuery>,
) -> Response {
    let Some(ticker_id) = q.ticker_id else {
        return err_json("Missing required parameter: tickerId", 400);
    };
    if session.cancel_market_data(ticker_id) {
        ok_msg("Market data subscription cancelled")
    } else {
        not_connected()
    }
}

// ============================================================================
// Route Handlers -- orders
// ============================================================================

async fn handle_get_orders<T: Transport>(
    State(session): State<SharedSession<T>>,
    Query(q): Query<OrderListQuery>,
) -> Response {
    let mut orders = session.open_orders();
    if let Some(status) = non_empty(&q.status) {
        orders.retain(|o| o.status.eq_ignore_ascii_case(&status));
    }
    ok_json("Orders retrieved", orders)
}

async fn handle_refresh_orders<T: Transport>(State(session): State<SharedSession<T>>) -> Response {
    if session.request_all_open_orders() {
        ok_msg("Open orders requested")
    } else {
        not_connected()
    }
}

async fn handle_place_order<T: Transport>(
    State(session): State<SharedSession<T>>,
    Json(body): Json<PlaceOrderBody>,
) -> Response {
    let (contract, mut order) = match build_order(&body) {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };
    if !session.is_connected() {
        return not_connected();
    }

    let order_id = session.allocate_order_id();
    order.order_id = order_id;
    if !session.place_order(order_id, &contract, &order) {
        return err_json("Order could not be sent", 500);
    }
    ok_json(
        "Order placed successfully",
        serde_json::json!({
            "orderId": order_id,
            "symbol": contract.symbol,
            "action": order.action.to_string(),
            "quantity": order.total_quantity,
            "orderType": order.order_type.to_string(),
        }),
    )
}

async fn handle_cancel_order<T: Transport>(
    State(session): State<SharedSession<T>>,
    Json(body): Json<CancelOrderBody>,
) -> Response {
    let Some(order_id) = body.order_id else {
        return err_json("Missing required parameter: orderId", 400);
    };
    if session.cancel_order(order_id) {
        ok_msg("Order cancellation requested")
    } else {
        not_connected()
    }
}
