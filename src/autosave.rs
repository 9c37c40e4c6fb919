use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::Context;

/// Background task that periodically flushes the table until `shutdown`
/// is cancelled. Failures are logged and retried on the next tick.
pub async fn run_autosave(ctx: Arc<Context>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        match ctx.save("autosave").await {
            Ok(()) => debug!("autosave complete"),
            Err(e) => warn!("autosave failed: {e}"),
        }
    }
}
