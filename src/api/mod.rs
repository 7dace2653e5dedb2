pub mod binance;
pub mod gemini;
pub mod precision;

pub use binance::{BinanceFuturesClient, OpenOrder, OrderResponse, Ticker24h};
pub use gemini::{GeminiClient, OracleReply};
