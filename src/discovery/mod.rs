// Candidate discovery across the futures universe
pub mod scanner;

pub use scanner::{rank_tickers, MarketScanner};
