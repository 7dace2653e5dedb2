use crate::models::{Candle, MarketSnapshot};
use crate::settings::{MarketDataSettings, StrategySettings};
use std::fmt::Write;

fn tail(candles: &[Candle], bars: usize) -> &[Candle] {
    &candles[candles.len().saturating_sub(bars)..]
}

/// One line per bar: time, OHLC, volume
fn render_bars(candles: &[Candle]) -> String {
    let mut out = String::new();
    for c in candles {
        let _ = writeln!(
            out,
            "  {} O:{} H:{} L:{} C:{} V:{:.0}",
            c.open_time.format("%m-%d %H:%M"),
            c.open,
            c.high,
            c.low,
            c.close,
            c.volume
        );
    }
    if out.is_empty() {
        out.push_str("  (no data)\n");
    }
    out
}

/// Build the scalping prompt for one snapshot
pub fn render_prompt(
    snapshot: &MarketSnapshot,
    balance: f64,
    win_rate: f64,
    strategy: &StrategySettings,
    market_data: &MarketDataSettings,
) -> String {
    let short = tail(&snapshot.short, market_data.short.prompt_bars);
    let medium = tail(&snapshot.medium, market_data.medium.prompt_bars);
    let long = tail(&snapshot.long, market_data.long.prompt_bars);

    format!(
        r#"You are a scalping trading AI. Analyze market data for quick trades.

Symbol: {symbol} | Last price: {price}
Account: ${balance:.2} USDT | Win Rate: {win_rate:.1}%

Market Data (Short Timeframes for Scalping):
{short_iv} (last {short_n} bars):
{short_bars}
{medium_iv} (last {medium_n} bars):
{medium_bars}
{long_iv} (last {long_n} bars):
{long_bars}
24H Stats:
Volume: ${volume:.0}
Price Change: {change:.2}%

SCALPING RULES:
- SL: Fixed {sl}% loss
- TP: {tp_min}% to {tp_max}% gain
- Leverage: {lev_min} to {lev_max}
- Quick in/out (hold time: minutes to hours)
- Look for momentum signals even in minor trends
- Consider entering on strong breakouts or reversals

Return ONLY valid JSON:
{{
  "signal": "BUY" | "SELL" | "HOLD",
  "confidence": "HIGH" | "MEDIUM" | "LOW",
  "leverage": <integer {lev_min} to {lev_max}>,
  "tp_percentage": <number {tp_min} to {tp_max}>,
  "reasoning": "brief explanation"
}}

HIGH confidence = More investment
MEDIUM/LOW = Less investment
If you see any momentum, even minor, consider it a trading opportunity.
"#,
        symbol = snapshot.symbol,
        price = snapshot.last_price,
        balance = balance,
        win_rate = win_rate,
        short_iv = market_data.short.interval,
        short_n = short.len(),
        short_bars = render_bars(short),
        medium_iv = market_data.medium.interval,
        medium_n = medium.len(),
        medium_bars = render_bars(medium),
        long_iv = market_data.long.interval,
        long_n = long.len(),
        long_bars = render_bars(long),
        volume = snapshot.quote_volume,
        change = snapshot.price_change_pct,
        sl = strategy.sl_percentage,
        tp_min = strategy.tp_min,
        tp_max = strategy.tp_max,
        lev_min = strategy.min_leverage,
        lev_max = strategy.max_leverage,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(n: usize, start_close: f64) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle {
                open_time: t0 + Duration::minutes(5 * i as i64),
                open: start_close,
                high: start_close + 1.0,
                low: start_close - 1.0,
                close: start_close + i as f64,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_prompt_uses_trailing_bars_and_rules() {
        let snapshot = MarketSnapshot {
            symbol: "DOGEUSDT".to_string(),
            last_price: 149.0,
            short: candles(50, 100.0),
            medium: candles(30, 200.0),
            long: candles(20, 300.0),
            quote_volume: 3_000_000.0,
            price_change_pct: 2.5,
        };

        let prompt = render_prompt(
            &snapshot,
            4.2,
            50.0,
            &StrategySettings::default(),
            &MarketDataSettings::default(),
        );

        assert!(prompt.contains("DOGEUSDT"));
        assert!(prompt.contains("Account: $4.20 USDT | Win Rate: 50.0%"));
        assert!(prompt.contains("5m (last 15 bars)"));
        assert!(prompt.contains("15m (last 10 bars)"));
        assert!(prompt.contains("1h (last 6 bars)"));
        // Last short bar closes at 149, the 35th (index 34) would be 134
        assert!(prompt.contains("C:149 "));
        assert!(!prompt.contains("C:134 "));
        assert!(prompt.contains("SL: Fixed 0.8% loss"));
        assert!(prompt.contains("TP: 0.5% to 2% gain"));
        assert!(prompt.contains("Price Change: 2.50%"));
    }

    #[test]
    fn test_prompt_handles_empty_series() {
        let snapshot = MarketSnapshot {
            symbol: "X".to_string(),
            last_price: 1.0,
            short: vec![],
            medium: vec![],
            long: vec![],
            quote_volume: 0.0,
            price_change_pct: 0.0,
        };
        let prompt = render_prompt(
            &snapshot,
            0.0,
            0.0,
            &StrategySettings::default(),
            &MarketDataSettings::default(),
        );
        assert!(prompt.contains("(no data)"));
    }
}
