//! Testing utilities for code that drives the arbitration engine.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! arbiter = { path = "../arbiter", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use arbiter::testing::{RecordingTransport, recv_until};
//!
//! let transport = Arc::new(RecordingTransport::new());
//! let (handle, _task) = Engine::builder(transport.clone()).build()?.start();
//! let mut events = handle.subscribe();
//!
//! let knob = handle.submit(Demand::input(InputDevice::Joystick))?;
//! recv_until(&mut events, |e| matches!(e, LifecycleEvent::Admitted { .. })).await;
//! transport
//!     .wait_for_command(|c| c.mode == DeviceMode::InputDevice)
//!     .await;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use crate::composer::DeviceCommand;
use crate::event::{EventEnvelope, LifecycleEvent};
use crate::transport::Transport;

/// Default bound on how long test helpers wait.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport that records every command it is asked to apply.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    commands: Mutex<Vec<DeviceCommand>>,
    fail_next: AtomicUsize,
    notify: Notify,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `apply` fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Successfully applied commands, oldest first.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<DeviceCommand> {
        self.commands.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    /// Wait until at least `count` commands were applied.
    ///
    /// # Panics
    ///
    /// Panics after [`WAIT_TIMEOUT`].
    pub async fn wait_for(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| panic!("transport saw {} commands, expected {}", self.count(), count));
    }

    /// Wait until the latest applied command matches `predicate` and return it.
    ///
    /// Superseded commands may never reach the transport, so tests should
    /// wait for a state rather than a command count.
    ///
    /// # Panics
    ///
    /// Panics after [`WAIT_TIMEOUT`].
    pub async fn wait_for_command<F>(&self, predicate: F) -> DeviceCommand
    where
        F: Fn(&DeviceCommand) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if let Some(last) = self.last().filter(|c| predicate(c)) {
                    return last;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(WAIT_TIMEOUT, wait).await {
            Ok(command) => command,
            Err(_) => panic!("no matching device command; last was {:?}", self.last()),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn apply(&self, command: DeviceCommand) -> anyhow::Result<()> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("injected failure for revision {}", command.revision);
        }

        self.commands.lock().unwrap().push(command);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Receive lifecycle events until one matches `stop`, returning all of them
/// (the matching one last).
///
/// # Panics
///
/// Panics if the bus closes, lags, or nothing matches within [`WAIT_TIMEOUT`].
pub async fn recv_until<F>(receiver: &mut broadcast::Receiver<EventEnvelope>, mut stop: F) -> Vec<LifecycleEvent>
where
    F: FnMut(&LifecycleEvent) -> bool,
{
    let mut seen = Vec::new();
    let collect = async {
        loop {
            let envelope = receiver.recv().await.expect("lifecycle bus closed or lagged");
            let done = stop(&envelope.event);
            seen.push(envelope.event);
            if done {
                return;
            }
        }
    };
    if tokio::time::timeout(WAIT_TIMEOUT, collect).await.is_err() {
        panic!("no matching lifecycle event; saw {:?}", seen);
    }
    seen
}
