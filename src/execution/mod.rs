// Order execution, position tracking and reconciliation
pub mod executor;
pub mod ledger;
pub mod monitor;

pub use executor::{bracket_prices, ExecutionOutcome, TradeExecutor};
pub use ledger::{approximate_pnl, lock_ledger, SessionLedger, SessionStats, SharedLedger};
pub use monitor::TradeMonitor;
