use crate::api::{BinanceFuturesClient, Ticker24h};
use crate::models::{MarketSnapshot, ScanCandidate};
use crate::settings::{MarketDataSettings, ScannerSettings};
use crate::Result;

/// Filter and rank 24h tickers for scalping
///
/// A ticker qualifies when:
/// 1. Its symbol is quoted in `quote_asset`
/// 2. Last price lies strictly inside (min_price, max_price)
/// 3. Quote volume exceeds `min_quote_volume`
/// 4. |24h change| exceeds `min_abs_change_pct`
///
/// Qualifying tickers are scored by volume x |change| and sorted best first.
pub fn rank_tickers(
    tickers: &[Ticker24h],
    quote_asset: &str,
    settings: &ScannerSettings,
) -> Vec<ScanCandidate> {
    let mut candidates: Vec<ScanCandidate> = tickers
        .iter()
        .filter(|t| t.symbol.ends_with(quote_asset))
        .filter(|t| {
            t.last_price.is_finite() && t.quote_volume.is_finite() && t.price_change_pct.is_finite()
        })
        .filter(|t| t.last_price > settings.min_price && t.last_price < settings.max_price)
        .filter(|t| t.quote_volume > settings.min_quote_volume)
        .filter(|t| t.price_change_pct.abs() > settings.min_abs_change_pct)
        .map(|t| ScanCandidate {
            symbol: t.symbol.clone(),
            last_price: t.last_price,
            quote_volume: t.quote_volume,
            price_change_pct: t.price_change_pct,
            score: t.quote_volume * t.price_change_pct.abs(),
        })
        .collect();

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

/// Finds tradeable instruments and gathers the market data the oracle needs
#[derive(Clone)]
pub struct MarketScanner {
    client: BinanceFuturesClient,
    quote_asset: String,
    settings: ScannerSettings,
    market_data: MarketDataSettings,
}

impl MarketScanner {
    pub fn new(
        client: BinanceFuturesClient,
        quote_asset: impl Into<String>,
        settings: ScannerSettings,
        market_data: MarketDataSettings,
    ) -> Self {
        Self {
            client,
            quote_asset: quote_asset.into(),
            settings,
            market_data,
        }
    }

    /// Ranked candidates; an unreachable venue yields an empty list
    pub async fn scan(&self) -> Vec<ScanCandidate> {
        match self.client.get_tickers_24h().await {
            Ok(tickers) => {
                let ranked = rank_tickers(&tickers, &self.quote_asset, &self.settings);
                tracing::debug!(
                    "Scanner kept {} of {} tickers",
                    ranked.len(),
                    tickers.len()
                );
                ranked
            }
            Err(e) => {
                tracing::error!("Error getting coins: {}", e);
                Vec::new()
            }
        }
    }

    /// At most `candidates_per_cycle` of the best candidates
    pub async fn top_candidates(&self) -> Vec<ScanCandidate> {
        let mut ranked = self.scan().await;
        ranked.truncate(self.settings.candidates_per_cycle);
        ranked
    }

    /// Pull the three kline series for a candidate
    pub async fn snapshot(&self, candidate: &ScanCandidate) -> Result<MarketSnapshot> {
        let md = &self.market_data;
        let symbol = candidate.symbol.as_str();

        let (short, medium, long) = tokio::try_join!(
            self.client.get_klines(symbol, &md.short.interval, md.short.limit),
            self.client.get_klines(symbol, &md.medium.interval, md.medium.limit),
            self.client.get_klines(symbol, &md.long.interval, md.long.limit),
        )?;

        let last_price = short
            .last()
            .map(|c| c.close)
            .unwrap_or(candidate.last_price);

        Ok(MarketSnapshot {
            symbol: candidate.symbol.clone(),
            last_price,
            short,
            medium,
            long,
            quote_volume: candidate.quote_volume,
            price_change_pct: candidate.price_change_pct,
        })
    }
}
