pub mod deposit;
pub mod oracle;
pub mod reconciliation;
pub mod reward;
pub mod scheduler;
pub mod send_notification;
pub mod trade;
pub mod withdrawal;
