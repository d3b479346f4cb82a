//! Message pump thread.
//!
//! One pump runs per connection. It waits on the transport's reader signal
//! (bounded), dispatches whatever arrived to the callback handler, and sleeps
//! briefly between iterations. The stop flag is checked only at the top of
//! the loop, so a dispatch in progress always runs to completion.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::transport::Transport;
use crate::wrapper::EventHandler;

const JOIN_POLL: Duration = Duration::from_millis(5);

/// How a pump shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    Joined,
    /// The thread did not finish within the join timeout and was left to exit
    /// on its own.
    Detached,
}

/// Handle to a running pump thread.
pub struct MessagePump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MessagePump {
    /// Starts the pump thread.
    pub fn spawn<T: Transport>(
        transport: Arc<T>,
        handler: Arc<dyn EventHandler>,
        signal_timeout: Duration,
        interval: Duration,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("ib-message-pump".to_string())
            .spawn(move || {
                run(
                    transport.as_ref(),
                    handler.as_ref(),
                    &thread_stop,
                    signal_timeout,
                    interval,
                )
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Asks the loop to exit at its next iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stops the pump and waits up to `timeout` for the thread to exit.
    pub fn shutdown(mut self, timeout: Duration) -> PumpExit {
        self.request_stop();
        let Some(handle) = self.handle.take() else {
            return PumpExit::Joined;
        };

        if handle.thread().id() == thread::current().id() {
            tracing::debug!("pump shutdown requested from the pump thread, detaching");
            return PumpExit::Detached;
        }

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    "message pump did not stop within {timeout:?}, detaching thread"
                );
                return PumpExit::Detached;
            }
            thread::sleep(JOIN_POLL);
        }

        if handle.join().is_err() {
            tracing::error!("message pump thread panicked");
        }
        PumpExit::Joined
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        // Dropping without shutdown detaches; the loop still sees the flag.
        self.stop.store(true, Ordering::Release);
    }
}

fn run(
    transport: &dyn Transport,
    handler: &dyn EventHandler,
    stop: &AtomicBool,
    signal_timeout: Duration,
    interval: Duration,
) {
    tracing::debug!("message pump started");
    while !stop.load(Ordering::Acquire) {
        if transport.is_connected() && transport.wait_for_signal(signal_timeout) {
            transport.process_messages(handler);
        }
        thread::sleep(interval);
    }
    tracing::debug!("message pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::models::contract::Contract;
    use crate::models::order::Order;
    use crate::protocol::MarketDataType;
    use parking_lot::{Condvar, Mutex};
    use std::sync::atomic::AtomicUsize;

    /// Signals once per `kick`, counts dispatch rounds.
    #[derive(Default)]
    struct Kicker {
        pending: Mutex<usize>,
        cv: Condvar,
        rounds: AtomicUsize,
    }

    impl Kicker {
        fn kick(&self) {
            *self.pending.lock() += 1;
            self.cv.notify_all();
        }
    }

    impl Transport for Kicker {
        fn connect(&self, _: &str, _: u16, _: i32) -> Result<()> {
            Ok(())
        }
        fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn wait_for_signal(&self, timeout: Duration) -> bool {
            let mut pending = self.pending.lock();
            if *pending == 0 {
                self.cv.wait_for(&mut pending, timeout);
            }
            *pending > 0
        }
        fn process_messages(&self, _: &dyn EventHandler) {
            *self.pending.lock() = 0;
            self.rounds.fetch_add(1, Ordering::SeqCst);
        }
        fn req_managed_accounts(&self) -> Result<()> {
            Ok(())
        }
        fn req_account_summary(&self, _: i32, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn cancel_account_summary(&self, _: i32) -> Result<()> {
            Ok(())
        }
        fn req_positions(&self) -> Result<()> {
            Ok(())
        }
        fn req_market_data_type(&self, _: MarketDataType) -> Result<()> {
            Ok(())
        }
        fn req_mkt_data(&self, _: i32, _: &Contract) -> Result<()> {
            Ok(())
        }
        fn cancel_mkt_data(&self, _: i32) -> Result<()> {
            Ok(())
        }
        fn place_order(&self, _: i64, _: &Contract, _: &Order) -> Result<()> {
            Ok(())
        }
        fn cancel_order(&self, _: i64) -> Result<()> {
            Ok(())
        }
        fn req_all_open_orders(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Nop;
    impl EventHandler for Nop {}

    #[test]
    fn pump_dispatches_when_signalled_and_joins() {
        let transport = Arc::new(Kicker::default());
        let pump = MessagePump::spawn(
            Arc::clone(&transport),
            Arc::new(Nop),
            Duration::from_millis(50),
            Duration::from_millis(1),
        )
        .unwrap();

        transport.kick();
        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.rounds.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(transport.rounds.load(Ordering::SeqCst) >= 1);

        assert_eq!(pump.shutdown(Duration::from_secs(1)), PumpExit::Joined);
    }

    #[test]
    fn slow_loop_is_detached_after_timeout() {
        let transport = Arc::new(Kicker::default());
        // A long sleep between iterations keeps the thread alive past the join timeout.
        let pump = MessagePump::spawn(
            transport,
            Arc::new(Nop),
            Duration::from_millis(1),
            Duration::from_millis(500),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(pump.shutdown(Duration::from_millis(20)), PumpExit::Detached);
    }
}
