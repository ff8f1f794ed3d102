use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::{
    configuration::{AppState, State},
    error::Error,
    types::Ledger_Event,
};

fn send(event: &Ledger_Event) {
    match event.user_id() {
        Some(user_id) => info!("Push to user {}: {}", user_id, event),
        None => info!("Push to price feed: {}", event),
    }
}

/// Drains ledger events for the push layer until the notifier closes.
pub async fn notification_task(app_state: AppState<State>) -> Result<(), Error> {
    let mut receiver = app_state.notifier.subscribe();

    loop {
        match receiver.recv().await {
            Ok(event) => send(&event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Notification consumer lagged, {} events dropped", skipped);
            },
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
