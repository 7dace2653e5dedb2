// Core modules
pub mod api;
pub mod bot;
pub mod decision;
pub mod discovery;
pub mod error;
pub mod execution;
pub mod models;
pub mod settings;

// Re-export commonly used types
pub use bot::{CycleReport, TradingBot};
pub use error::BotError;
pub use models::*;
pub use settings::{Credentials, Settings};

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
