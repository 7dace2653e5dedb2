use crate::api::{GeminiClient, OracleReply};
use crate::decision::prompt::render_prompt;
use crate::error::BotError;
use crate::models::{Confidence, Decision, MarketSnapshot, Signal};
use crate::settings::{MarketDataSettings, StrategySettings};
use crate::Result;
use serde_json::Value;

/// Outcome of analysing one symbol
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Actionable BUY/SELL decision, already clamped
    Trade(Decision),
    /// Oracle said HOLD and the volatility fallback did not fire
    Hold,
    /// Oracle output unusable; the symbol is skipped this cycle
    NoDecision(String),
}

/// Slice from the first `{` to the last `}`, if any
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Position size in quote currency for a confidence tier
pub fn investment_for(confidence: Confidence, balance: f64, strategy: &StrategySettings) -> f64 {
    let raw = match confidence {
        Confidence::High => balance,
        Confidence::Medium => balance / 2.0,
        Confidence::Low => strategy.min_investment,
    };
    let raw = if raw.is_finite() { raw } else { strategy.min_investment };
    raw.clamp(strategy.min_investment, strategy.max_investment)
}

/// Parse oracle text into a bounded decision.
///
/// The signal must be exactly BUY, SELL or HOLD. Leverage and take-profit
/// fall back to their defaults when missing or non-numeric, and are always
/// clamped into the configured ranges. Investment is derived from the
/// confidence tier, never taken from the oracle.
pub fn parse_decision(text: &str, balance: f64, strategy: &StrategySettings) -> Result<Decision> {
    let json = extract_json(text).ok_or_else(|| BotError::validation("No JSON in response"))?;
    let parsed: Value = serde_json::from_str(json)
        .map_err(|e| BotError::validation(format!("malformed JSON: {}", e)))?;

    let signal = parsed
        .get("signal")
        .and_then(Value::as_str)
        .and_then(Signal::parse)
        .ok_or_else(|| BotError::validation(format!("Invalid signal: {}", parsed["signal"])))?;

    let confidence = parsed
        .get("confidence")
        .and_then(Value::as_str)
        .map(Confidence::parse)
        .unwrap_or(Confidence::Low);

    let leverage = parsed
        .get("leverage")
        .and_then(as_number)
        .map(|l| l.trunc().clamp(strategy.min_leverage as f64, strategy.max_leverage as f64) as u32)
        .unwrap_or(strategy.default_leverage)
        .clamp(strategy.min_leverage, strategy.max_leverage);

    let tp_percentage = parsed
        .get("tp_percentage")
        .and_then(as_number)
        .unwrap_or(strategy.default_tp_percentage)
        .clamp(strategy.tp_min, strategy.tp_max);

    let reasoning = parsed
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Decision {
        signal,
        confidence,
        investment: investment_for(confidence, balance, strategy),
        leverage,
        tp_percentage,
        reasoning,
        synthesized: false,
    })
}

/// Turn a HOLD into a trade when the 24h move is large on real volume.
///
/// Direction follows the sign of the move. Returns `None` when the fallback
/// is disabled or the thresholds are not met.
pub fn apply_fallback(
    price_change_pct: f64,
    quote_volume: f64,
    balance: f64,
    strategy: &StrategySettings,
) -> Option<Decision> {
    let fb = &strategy.fallback;
    if !fb.enabled
        || price_change_pct.abs() <= fb.min_abs_change_pct
        || quote_volume <= fb.min_quote_volume
    {
        return None;
    }

    let signal = if price_change_pct > 0.0 {
        Signal::Buy
    } else {
        Signal::Sell
    };

    Some(Decision {
        signal,
        confidence: Confidence::High,
        investment: investment_for(Confidence::Medium, balance, strategy),
        leverage: fb.leverage.clamp(strategy.min_leverage, strategy.max_leverage),
        tp_percentage: fb.tp_percentage.clamp(strategy.tp_min, strategy.tp_max),
        reasoning: format!(
            "High volatility fallback: {:.2}% 24h move on ${:.0} volume",
            price_change_pct, quote_volume
        ),
        synthesized: true,
    })
}

/// Asks the oracle about a snapshot and validates the answer
#[derive(Clone)]
pub struct DecisionEngine {
    oracle: GeminiClient,
    strategy: StrategySettings,
    market_data: MarketDataSettings,
}

impl DecisionEngine {
    pub fn new(
        oracle: GeminiClient,
        strategy: StrategySettings,
        market_data: MarketDataSettings,
    ) -> Self {
        Self {
            oracle,
            strategy,
            market_data,
        }
    }

    /// Analyse one symbol.
    ///
    /// Transport failures reaching the oracle are returned as `Err` so the
    /// caller can skip the symbol; everything else maps onto a `Verdict`.
    pub async fn analyze(
        &self,
        snapshot: &MarketSnapshot,
        balance: f64,
        win_rate: f64,
    ) -> Result<Verdict> {
        let prompt = render_prompt(snapshot, balance, win_rate, &self.strategy, &self.market_data);

        let text = match self.oracle.generate(&prompt).await? {
            OracleReply::Text(text) => text,
            OracleReply::Refused(reason) => return Ok(Verdict::NoDecision(reason)),
        };

        let decision = match parse_decision(&text, balance, &self.strategy) {
            Ok(d) => d,
            Err(e) => return Ok(Verdict::NoDecision(e.to_string())),
        };

        if decision.signal != Signal::Hold {
            return Ok(Verdict::Trade(decision));
        }

        let fallback = apply_fallback(
            snapshot.price_change_pct,
            snapshot.quote_volume,
            balance,
            &self.strategy,
        );
        match fallback {
            Some(synth) => {
                tracing::info!("🔥 {}: {}", snapshot.symbol, synth.reasoning);
                Ok(Verdict::Trade(synth))
            }
            None => Ok(Verdict::Hold),
        }
    }
}
