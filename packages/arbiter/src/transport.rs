//! Transport seam: how composed commands reach the device.
//!
//! The loop never awaits the transport. Commands go to a dispatcher task,
//! which applies them in order and reports each result back to the loop as
//! an inbound event.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::composer::DeviceCommand;

/// Something that can put a [`DeviceCommand`] on the wire.
///
/// # Errors
///
/// Return an error when the command could not be applied. The loop reports
/// it as a `dispatch_failed` lifecycle event and may re-send the latest
/// command; it never retries inside the transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn apply(&self, command: DeviceCommand) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn apply(&self, command: DeviceCommand) -> anyhow::Result<()> {
        (**self).apply(command).await
    }
}

/// Outcome of one dispatch, fed back to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DispatchResult {
    pub revision: u64,
    pub result: Result<(), String>,
}

/// Apply commands as they come, skipping any that were superseded while the
/// transport was busy: only the newest composed state matters.
pub(crate) async fn run_dispatcher(
    transport: Arc<dyn Transport>,
    mut commands: mpsc::UnboundedReceiver<DeviceCommand>,
    results: mpsc::UnboundedSender<DispatchResult>,
) {
    while let Some(mut command) = commands.recv().await {
        while let Ok(newer) = commands.try_recv() {
            debug!(
                skipped = command.revision,
                latest = newer.revision,
                "superseded command dropped"
            );
            command = newer;
        }

        let revision = command.revision;
        let result = transport
            .apply(command)
            .await
            .map_err(|e| format!("{:#}", e));
        if results.send(DispatchResult { revision, result }).is_err() {
            break;
        }
    }
    info!("dispatcher stopped");
}
