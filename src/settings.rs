use crate::error::BotError;
use crate::Result;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "scalpbot";
const ENV_PREFIX: &str = "SCALPBOT";

/// Leverage any decision may carry, whatever the configuration says
pub const LEVERAGE_LIMITS: (u32, u32) = (5, 15);

/// Runtime configuration for the whole bot.
///
/// Layering (lowest to highest priority):
/// 1. Built-in defaults below
/// 2. `scalpbot.toml` (or the file passed with `--config`)
/// 3. `SCALPBOT__SECTION__KEY` environment variables
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub oracle: OracleSettings,
    pub strategy: StrategySettings,
    pub scanner: ScannerSettings,
    pub market_data: MarketDataSettings,
    pub execution: ExecutionSettings,
    pub schedule: ScheduleSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub quote_asset: String,
    pub request_timeout_secs: u64,
    pub clock_sync_attempts: u32,
    pub clock_sync_backoff_ms: u64,
    /// Leverage is never halved below this value
    pub leverage_floor: u32,
    pub leverage_retry_budget: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            quote_asset: "USDT".to_string(),
            request_timeout_secs: 10,
            clock_sync_attempts: 3,
            clock_sync_backoff_ms: 1000,
            leverage_floor: 5,
            leverage_retry_budget: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            request_timeout_secs: 30,
            requests_per_minute: 30,
        }
    }
}

/// Hard bounds the decision engine enforces on every oracle answer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub sl_percentage: f64,
    pub tp_min: f64,
    pub tp_max: f64,
    pub default_tp_percentage: f64,
    pub min_investment: f64,
    pub max_investment: f64,
    pub min_leverage: u32,
    pub max_leverage: u32,
    pub default_leverage: u32,
    pub fallback: FallbackSettings,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            sl_percentage: 0.8,
            tp_min: 0.5,
            tp_max: 2.0,
            default_tp_percentage: 1.0,
            min_investment: 0.10,
            max_investment: 5.00,
            min_leverage: 5,
            max_leverage: 15,
            default_leverage: 10,
            fallback: FallbackSettings::default(),
        }
    }
}

/// Turns an oracle HOLD into a trade when the 24h move is extreme
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub enabled: bool,
    pub min_abs_change_pct: f64,
    pub min_quote_volume: f64,
    pub leverage: u32,
    pub tp_percentage: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_abs_change_pct: 2.0,
            min_quote_volume: 2_000_000.0,
            leverage: 10,
            tp_percentage: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub min_price: f64,
    pub max_price: f64,
    pub min_quote_volume: f64,
    pub min_abs_change_pct: f64,
    pub candidates_per_cycle: usize,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            min_price: 0.0001,
            max_price: 10.0,
            min_quote_volume: 1_000_000.0,
            min_abs_change_pct: 0.5,
            candidates_per_cycle: 5,
        }
    }
}

/// One kline series fetched per candidate
#[derive(Debug, Clone, Deserialize)]
pub struct Timeframe {
    pub interval: String,
    pub limit: u32,
    /// Trailing bars quoted in the oracle prompt
    pub prompt_bars: usize,
}

impl Timeframe {
    fn new(interval: &str, limit: u32, prompt_bars: usize) -> Self {
        Self {
            interval: interval.to_string(),
            limit,
            prompt_bars,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketDataSettings {
    pub short: Timeframe,
    pub medium: Timeframe,
    pub long: Timeframe,
}

impl Default for MarketDataSettings {
    fn default() -> Self {
        Self {
            short: Timeframe::new("5m", 50, 15),
            medium: Timeframe::new("15m", 30, 10),
            long: Timeframe::new("1h", 20, 6),
        }
    }
}

/// What to do when the entry filled but the venue accepted only part of the bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncompleteBracketPolicy {
    /// Record the degraded position and monitor whatever legs exist
    Keep,
    /// Cancel the symbol's orders and close the entry at market
    Flatten,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub settle_delay_ms: u64,
    pub incomplete_bracket: IncompleteBracketPolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2000,
            incomplete_bracket: IncompleteBracketPolicy::Keep,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub active_interval_secs: u64,
    pub idle_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub stats_every_cycles: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            active_interval_secs: 20,
            idle_interval_secs: 40,
            error_backoff_secs: 10,
            stats_every_cycles: 10,
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations that would break the decision invariants
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;

        if s.sl_percentage <= 0.0 {
            return Err(BotError::Config("sl_percentage must be positive".into()));
        }
        if s.tp_min <= 0.0 || s.tp_min > s.tp_max {
            return Err(BotError::Config(format!(
                "take-profit range [{}, {}] is invalid",
                s.tp_min, s.tp_max
            )));
        }
        if s.min_investment <= 0.0 || s.min_investment > s.max_investment {
            return Err(BotError::Config(format!(
                "investment range [{}, {}] is invalid",
                s.min_investment, s.max_investment
            )));
        }
        if s.min_leverage < LEVERAGE_LIMITS.0
            || s.max_leverage > LEVERAGE_LIMITS.1
            || s.min_leverage > s.max_leverage
        {
            return Err(BotError::Config(format!(
                "leverage range [{}, {}] must lie within [{}, {}]",
                s.min_leverage, s.max_leverage, LEVERAGE_LIMITS.0, LEVERAGE_LIMITS.1
            )));
        }
        if self.exchange.leverage_floor == 0 || self.exchange.leverage_floor > s.min_leverage {
            return Err(BotError::Config(format!(
                "leverage_floor {} must be between 1 and min_leverage {}",
                self.exchange.leverage_floor, s.min_leverage
            )));
        }
        if self.exchange.clock_sync_attempts == 0 {
            return Err(BotError::Config("clock_sync_attempts must be at least 1".into()));
        }
        if self.scanner.min_price >= self.scanner.max_price {
            return Err(BotError::Config("scanner price window is empty".into()));
        }

        Ok(())
    }
}

/// API secrets, read from the environment only
#[derive(Clone)]
pub struct Credentials {
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub gemini_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            binance_api_key: require_env("BINANCE_API_KEY")?,
            binance_api_secret: require_env("BINANCE_API_SECRET")?,
            gemini_api_key: require_env("GEMINI_API_KEY")?,
        })
    }
}

// Keys must never reach the logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("binance_api_key", &"<redacted>")
            .field("binance_api_secret", &"<redacted>")
            .field("gemini_api_key", &"<redacted>")
            .finish()
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(BotError::Config(format!("{} not found in environment", name))),
    }
}
