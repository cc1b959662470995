// Adapters layer: concrete implementations for external systems (database, file storage, fixtures).

pub mod import;
pub mod local_storage;
pub mod sqlite;

pub use local_storage::LocalStorage;
pub use sqlite::{Ledger, LedgerTransaction, NewBatch};
