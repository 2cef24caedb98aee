// Operator bot: long-poll the Bot API and dispatch each update on its own
// task.

pub mod handlers;
pub mod operator;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub use handlers::{ChatIds, Handlers};

use crate::telegram::TelegramClient;

/// Pause after a failed getUpdates before polling again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Poll forever. Handler errors are logged; they never stop the loop.
pub async fn run_polling(client: Arc<TelegramClient>, handlers: Arc<Handlers>) -> Result<()> {
    client
        .delete_webhook()
        .await
        .context("Failed to delete webhook before polling")?;
    let me = client.get_me().await.context("Bot token rejected")?;
    info!(username = ?me.username, "Bot started polling");

    let mut offset = None;
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let handlers = handlers.clone();
            tokio::spawn(async move {
                let update_id = update.update_id;
                if let Err(e) = handlers.handle(update).await {
                    warn!(update_id = update_id, error = %e, "Update handler failed");
                }
            });
        }
    }
}
