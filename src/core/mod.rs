pub mod detector;
pub mod encoder;
pub mod export;
pub mod tariff;

pub use crate::domain::ports::Storage;
pub use crate::utils::error::Result;
