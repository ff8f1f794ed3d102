pub use self::{database::DatabasePool, notifier::Notifier};

mod database;
mod notifier;
