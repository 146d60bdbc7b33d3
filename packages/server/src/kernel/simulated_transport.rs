//! Simulated robotic ball.
//!
//! Logs every composed command instead of driving hardware, and drains a
//! simulated battery while the device is doing something so the low and
//! critical battery paths can be exercised without a real ball.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbiter::{DeviceCommand, DeviceMode, EngineHandle, Feedback, Transport};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Battery percentage lost per drain tick while busy.
pub const DRAIN_PER_TICK: f32 = 0.5;

#[derive(Debug, Default)]
pub struct SimulatedTransport {
    busy: Arc<AtomicBool>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last applied command left the device doing something.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start draining the simulated battery, reporting whole-percent changes
    /// to the engine. Stops when the engine does.
    pub fn spawn_battery_drain(&self, engine: EngineHandle, interval: Duration) -> JoinHandle<()> {
        let busy = self.busy.clone();
        tokio::spawn(async move {
            let mut drain = BatteryDrain::new(100.0);
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(level) = drain.tick(busy.load(Ordering::SeqCst)) else {
                    continue;
                };
                debug!(battery = level, "simulated battery drained");
                if engine.feedback(Feedback::battery(level)).is_err() {
                    break;
                }
            }
            info!("simulated battery drain stopped");
        })
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn apply(&self, command: DeviceCommand) -> anyhow::Result<()> {
        info!(
            revision = command.revision,
            mode = ?command.mode,
            led = ?command.led,
            matrix = ?command.matrix,
            motor = ?command.motor,
            "simulated device command"
        );
        self.busy
            .store(command.mode != DeviceMode::Idle, Ordering::SeqCst);
        Ok(())
    }
}

/// Fractional battery level that reports only whole-percent changes.
#[derive(Debug, Clone, Copy)]
struct BatteryDrain {
    level: f32,
}

impl BatteryDrain {
    fn new(level: f32) -> Self {
        Self { level }
    }

    fn reported(&self) -> u8 {
        self.level as u8
    }

    /// Drain one tick if busy. Returns the new level when the reported
    /// percentage changed.
    fn tick(&mut self, busy: bool) -> Option<u8> {
        if !busy {
            return None;
        }
        let before = self.reported();
        self.level = (self.level - DRAIN_PER_TICK).max(0.0);
        let after = self.reported();
        (after != before).then_some(after)
    }
}
