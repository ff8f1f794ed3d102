use tokio::sync::broadcast;
use tracing::debug;

use crate::types::Ledger_Event;

/// Fan-out of ledger events to whatever push layer is listening. Emitting
/// never blocks and never fails the operation that triggered it.
#[derive(Debug)]
pub struct Notifier {
    sender: broadcast::Sender<Ledger_Event>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: Ledger_Event) {
        if let Err(error) = self.sender.send(event) {
            debug!("No subscriber for ledger event {}", error.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Ledger_Event> {
        self.sender.subscribe()
    }
}
