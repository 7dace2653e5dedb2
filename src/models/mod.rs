use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use uuid::Uuid;

/// OHLCV candlestick bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Order direction on the venue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Side that reduces a position opened on `self`
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading signal returned by the oracle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn parse(raw: &str) -> Option<Signal> {
        match raw.trim() {
            "BUY" => Some(Signal::Buy),
            "SELL" => Some(Signal::Sell),
            "HOLD" => Some(Signal::Hold),
            _ => None,
        }
    }

    /// Order side for actionable signals, `None` for HOLD
    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Buy => Some(Side::Buy),
            Signal::Sell => Some(Side::Sell),
            Signal::Hold => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Unknown tiers are treated as the most conservative one
    pub fn parse(raw: &str) -> Confidence {
        match raw.trim().to_uppercase().as_str() {
            "HIGH" => Confidence::High,
            "MEDIUM" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Validated trade decision. Only the decision engine constructs these,
/// so every numeric field is already inside its legal range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub signal: Signal,
    pub confidence: Confidence,
    pub investment: f64,
    pub leverage: u32,
    pub tp_percentage: f64,
    pub reasoning: String,
    /// True when produced by the volatility fallback instead of the oracle
    pub synthesized: bool,
}

/// Per-instrument trading constraints from exchange metadata.
/// Any field may be missing; callers fall back to the defaults below.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolFilters {
    pub tick_size: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub min_qty: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

impl SymbolFilters {
    pub const DEFAULT_TICK_SIZE: Decimal = dec!(0.000001);
    pub const DEFAULT_STEP_SIZE: Decimal = dec!(0.001);
    pub const DEFAULT_MIN_QTY: Decimal = dec!(0.001);

    pub fn is_empty(&self) -> bool {
        self.tick_size.is_none()
            && self.step_size.is_none()
            && self.min_qty.is_none()
            && self.min_notional.is_none()
    }

    pub fn tick_size_or_default(&self) -> Decimal {
        self.tick_size.unwrap_or(Self::DEFAULT_TICK_SIZE)
    }

    pub fn step_size_or_default(&self) -> Decimal {
        self.step_size.unwrap_or(Self::DEFAULT_STEP_SIZE)
    }

    pub fn min_qty_or_default(&self) -> Decimal {
        self.min_qty.unwrap_or(Self::DEFAULT_MIN_QTY)
    }

    /// True when the venue publishes a minimum notional and
    /// `quantity * price` falls under it
    pub fn below_min_notional(&self, quantity: Decimal, price: Decimal) -> bool {
        match self.min_notional {
            Some(min) => quantity * price < min,
            None => false,
        }
    }
}

/// Instrument that passed the scanner filter
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume: f64,
    /// Signed 24h percentage change
    pub price_change_pct: f64,
    /// quote volume x |24h change|
    pub score: f64,
}

/// Everything the oracle sees about one symbol
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: f64,
    pub short: Vec<Candle>,
    pub medium: Vec<Candle>,
    pub long: Vec<Candle>,
    pub quote_volume: f64,
    pub price_change_pct: f64,
}

impl MarketSnapshot {
    /// All three timeframes must have data before we ask the oracle
    pub fn is_complete(&self) -> bool {
        !self.short.is_empty() && !self.medium.is_empty() && !self.long.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    TakeProfitMarket,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BracketKind {
    TakeProfit,
    StopLoss,
}

/// One acknowledged exit order protecting a position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BracketLeg {
    pub kind: BracketKind,
    pub order_id: i64,
    pub trigger_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Open futures position guarded by a TP/SL bracket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub investment: f64,
    pub tp_percentage: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub entry_order_id: i64,
    pub legs: Vec<BracketLeg>,
    pub entry_time: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    pub fn is_fully_bracketed(&self) -> bool {
        self.legs.iter().any(|l| l.kind == BracketKind::TakeProfit)
            && self.legs.iter().any(|l| l.kind == BracketKind::StopLoss)
    }
}

/// Closed position with its realized result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub position: Position,
    pub pnl: f64,
    pub exit_time: DateTime<Utc>,
    /// Leg that disappeared from the book, when exactly one did
    pub filled_leg: Option<BracketKind>,
}

impl CompletedTrade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn holding_minutes(&self) -> i64 {
        (self.exit_time - self.position.entry_time).num_minutes()
    }
}
