use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::runtime::BotRuntime;
use crate::telegram::TelegramClient;

const POLL_TIMEOUT_SECS: u64 = 30;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay before the next attempt after `failures` consecutive errors.
fn backoff(failures: u32) -> Duration {
    let secs = 1u64 << failures.min(6);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Long-poll `getUpdates` forever, handling updates in arrival order.
pub async fn run_polling(client: &TelegramClient, runtime: Arc<BotRuntime>) -> Result<()> {
    // getUpdates is refused while a webhook is registered
    client
        .delete_webhook()
        .await
        .context("Failed to remove the registered webhook")?;
    info!("polling Telegram for updates");

    let mut offset = 0;
    let mut failures = 0u32;
    loop {
        match client.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => {
                failures = 0;
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    runtime.process(&update).await;
                }
            }
            Err(e) => {
                let delay = backoff(failures);
                failures = failures.saturating_add(1);
                warn!(
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "getUpdates failed: {e:#}"
                );
                tokio::time::sleep(delay).await;
            }
        }
        debug!(offset, "poll cycle complete");
    }
}
