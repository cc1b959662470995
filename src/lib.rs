pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{Ledger, LocalStorage};
pub use config::ExportConfig;
pub use core::detector::KeywordDetector;
pub use core::encoder::{RecordEncoder, RecordLayout};
pub use core::export::{ExportOrchestrator, ExportOutcome, ExportRequest};
pub use core::tariff::{BillingScheme, TariffResolver};
pub use utils::error::{ExportError, Result};
