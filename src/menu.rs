//! Blocking text menu over a [`Session`].
//!
//! Each data option fires its request, waits a short settle period for the
//! callbacks to land, then prints whatever the caches hold.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use fatty_traders_session::{Action, Contract, Order, Session, Transport};
use rust_decimal::Decimal;

/// Ticker id used by the "market data" option.
const MENU_TICKER_ID: i32 = 1001;

pub struct Menu<'a, T: Transport, R, W> {
    session: &'a Session<T>,
    input: R,
    output: W,
    settle: Duration,
}

impl<'a, T: Transport, R: BufRead, W: Write> Menu<'a, T, R, W> {
    pub fn new(session: &'a Session<T>, input: R, output: W) -> Self {
        Self {
            session,
            input,
            output,
            settle: Duration::from_secs(2),
        }
    }

    /// How long to wait for callbacks after a request.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Runs until `0` or end of input.
    pub fn run(&mut self) -> io::Result<()> {
        writeln!(self.output, "FattyTraders - Interactive Brokers session client")?;
        writeln!(self.output, "=================================================")?;

        loop {
            self.print_menu()?;
            let Some(choice) = self.read_line()? else {
                break;
            };
            match choice.as_str() {
                "1" => self.connect()?,
                "2" => self.account_summary()?,
                "3" => self.positions()?,
                "4" => self.market_data()?,
                "5" => self.test_order()?,
                "6" => self.open_orders()?,
                "7" => self.disconnect()?,
                "0" => break,
                _ => writeln!(self.output, "Invalid choice. Please try again.")?,
            }
        }

        if self.session.is_connected() {
            writeln!(self.output, "Disconnecting...")?;
        }
        self.session.disconnect();
        writeln!(self.output, "Goodbye!")?;
        Ok(())
    }

    fn print_menu(&mut self) -> io::Result<()> {
        let out = &mut self.output;
        writeln!(out)?;
        writeln!(out, "=== FattyTraders IB Session ===")?;
        writeln!(out, "1. Connect to IB")?;
        writeln!(out, "2. Get Account Summary")?;
        writeln!(out, "3. Get Positions")?;
        writeln!(out, "4. Get Market Data (AAPL)")?;
        writeln!(out, "5. Place Test Order (Paper trading only!)")?;
        writeln!(out, "6. Get Open Orders")?;
        writeln!(out, "7. Disconnect")?;
        writeln!(out, "0. Exit")?;
        write!(out, "Choice: ")?;
        out.flush()
    }

    /// Next trimmed input line, `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn prompt(&mut self, label: &str, default: &str) -> io::Result<String> {
        write!(self.output, "{label} ({default}): ")?;
        self.output.flush()?;
        Ok(self
            .read_line()?
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    fn require_connection(&mut self) -> io::Result<bool> {
        if self.session.is_connected() {
            return Ok(true);
        }
        writeln!(self.output, "Not connected! Connect first.")?;
        Ok(false)
    }

    // ========================================================================
    // Options
    // ========================================================================

    fn connect(&mut self) -> io::Result<()> {
        if self.session.is_connected() {
            return writeln!(self.output, "Already connected!");
        }
        let config = self.session.config();
        let (default_host, default_port, default_client) = (
            config.host.clone(),
            config.port.to_string(),
            config.client_id.to_string(),
        );

        let host = self.prompt("Enter host", &default_host)?;
        let port = self.prompt(
            "Enter port (4001 Gateway live, 4002 Gateway paper, 7497 TWS paper)",
            &default_port,
        )?;
        let client_id = self.prompt("Enter client ID", &default_client)?;

        let (Ok(port), Ok(client_id)) = (port.parse::<u16>(), client_id.parse::<i32>()) else {
            return writeln!(self.output, "Invalid port or client ID.");
        };

        writeln!(
            self.output,
            "Connecting to {host}:{port} with client ID {client_id}..."
        )?;
        match self.session.connect(&host, port, client_id) {
            Ok(()) => {
                writeln!(self.output, "Connected successfully!")?;
                thread::sleep(self.settle);
                let accounts = self.session.managed_accounts();
                writeln!(self.output, "Managed accounts: {}", accounts.join(" "))
            }
            Err(e) => writeln!(self.output, "Connection failed: {e}"),
        }
    }

    fn account_summary(&mut self) -> io::Result<()> {
        if !self.require_connection()? {
            return Ok(());
        }
        writeln!(self.output, "Requesting account summary...")?;
        self.session.request_account_summary();
        thread::sleep(self.settle);

        let summary = self.session.account_summary();
        writeln!(self.output, "\nAccount Summary:")?;
        writeln!(self.output, "=================")?;
        for item in &summary {
            writeln!(
                self.output,
                "{} | {}: {} {}",
                item.account, item.tag, item.value, item.currency
            )?;
        }
        if summary.is_empty() {
            writeln!(self.output, "No account summary data received.")?;
        }
        Ok(())
    }

    fn positions(&mut self) -> io::Result<()> {
        if !self.require_connection()? {
            return Ok(());
        }
        writeln!(self.output, "Requesting positions...")?;
        self.session.request_positions();
        thread::sleep(self.settle);

        let positions = self.session.positions();
        writeln!(self.output, "\nPositions:")?;
        writeln!(self.output, "==========")?;
        for pos in &positions {
            writeln!(
                self.output,
                "{} | {} ({}): {} @ ${:.2}",
                pos.account, pos.contract.symbol, pos.contract.sec_type, pos.position, pos.avg_cost
            )?;
        }
        if positions.is_empty() {
            writeln!(self.output, "No positions found.")?;
        }
        Ok(())
    }

    fn market_data(&mut self) -> io::Result<()> {
        if !self.require_connection()? {
            return Ok(());
        }
        writeln!(self.output, "Requesting market data for AAPL...")?;
        self.session
            .request_market_data(MENU_TICKER_ID, &Contract::stock("AAPL"));
        thread::sleep(self.settle);

        let quote = self.session.quote(MENU_TICKER_ID);
        if quote.is_empty() {
            writeln!(self.output, "No quote yet. A market data subscription may be required.")?;
            return Ok(());
        }
        let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |p| format!("{p:.2}"));
        writeln!(
            self.output,
            "AAPL  bid {}  ask {}  last {}",
            show(quote.bid),
            show(quote.ask),
            show(quote.last)
        )
    }

    fn test_order(&mut self) -> io::Result<()> {
        if !self.require_connection()? {
            return Ok(());
        }
        writeln!(self.output, "WARNING: This will place a real order!")?;
        writeln!(self.output, "Only use this with paper trading accounts!")?;
        write!(self.output, "Continue? (y/N): ")?;
        self.output.flush()?;

        let confirmed = self
            .read_line()?
            .is_some_and(|s| s.eq_ignore_ascii_case("y"));
        if !confirmed {
            return writeln!(self.output, "Order cancelled.");
        }

        let order_id = self.session.allocate_order_id();
        let order = Order::limit(Action::Buy, Decimal::ONE, 100.0);
        writeln!(
            self.output,
            "Placing test order: BUY 1 AAPL @ $100.00 (Order ID: {order_id})"
        )?;
        if self
            .session
            .place_order(order_id, &Contract::stock("AAPL"), &order)
        {
            writeln!(self.output, "Order placed! Check TWS/Gateway for confirmation.")?;
        }
        Ok(())
    }

    fn open_orders(&mut self) -> io::Result<()> {
        if !self.require_connection()? {
            return Ok(());
        }
        writeln!(self.output, "Requesting open orders...")?;
        self.session.request_all_open_orders();
        thread::sleep(self.settle);

        let orders = self.session.open_orders();
        writeln!(self.output, "\nOpen Orders:")?;
        writeln!(self.output, "============")?;
        for info in &orders {
            let price = info
                .order
                .lmt_price
                .map_or_else(|| info.order.order_type.to_string(), |p| format!("{p:.2}"));
            writeln!(
                self.output,
                "Order {}: {} {} {} @ {} ({})",
                info.order_id,
                info.order.action,
                info.order.total_quantity,
                info.contract.symbol,
                price,
                info.status
            )?;
        }
        if orders.is_empty() {
            writeln!(self.output, "No open orders found.")?;
        }
        Ok(())
    }

    /// Always tears down, so a pump left behind by a reported drop is stopped.
    fn disconnect(&mut self) -> io::Result<()> {
        if !self.session.is_connected() {
            self.session.disconnect();
            return writeln!(self.output, "Not connected.");
        }
        writeln!(self.output, "Disconnecting...")?;
        self.session.disconnect();
        writeln!(self.output, "Disconnected.")
    }
}
