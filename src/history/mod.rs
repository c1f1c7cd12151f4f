pub mod routes;
pub mod store;

pub use store::{Attachment, HistoryError, HistoryStore, NewMessage, StoredMessage};
