use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::precision::{floor_to_step, to_decimal, to_f64};
use crate::api::BinanceFuturesClient;
use crate::execution::ledger::{lock_ledger, SharedLedger};
use crate::models::{BracketLeg, Decision, OrderType, Position, PositionStatus, Side};
use crate::settings::{ExecutionSettings, IncompleteBracketPolicy, StrategySettings};
use crate::Result;

/// Result of trying to turn a decision into a position
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Opened(Position),
    Skipped(String),
    Failed(String),
}

impl ExecutionOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, ExecutionOutcome::Opened(_))
    }
}

/// Take-profit and stop-loss trigger prices around `entry`
pub fn bracket_prices(
    side: Side,
    entry: f64,
    tp_percentage: f64,
    sl_percentage: f64,
) -> (f64, f64) {
    match side {
        Side::Buy => (
            entry * (1.0 + tp_percentage / 100.0),
            entry * (1.0 - sl_percentage / 100.0),
        ),
        Side::Sell => (
            entry * (1.0 - tp_percentage / 100.0),
            entry * (1.0 + sl_percentage / 100.0),
        ),
    }
}

/// Opens positions: leverage, market entry, then the TP/SL bracket
pub struct TradeExecutor {
    client: BinanceFuturesClient,
    ledger: SharedLedger,
    strategy: StrategySettings,
    execution: ExecutionSettings,
}

impl TradeExecutor {
    pub fn new(
        client: BinanceFuturesClient,
        ledger: SharedLedger,
        strategy: StrategySettings,
        execution: ExecutionSettings,
    ) -> Self {
        Self {
            client,
            ledger,
            strategy,
            execution,
        }
    }

    /// Execute a decision for `symbol` at `current_price`.
    ///
    /// Never returns an error: transport failures and venue rejections are
    /// reported as `ExecutionOutcome::Failed`.
    pub async fn execute(
        &self,
        symbol: &str,
        decision: &Decision,
        current_price: f64,
    ) -> ExecutionOutcome {
        let Some(side) = decision.signal.side() else {
            return ExecutionOutcome::Skipped("HOLD signal".to_string());
        };

        if lock_ledger(&self.ledger).has_position(symbol) {
            return ExecutionOutcome::Skipped(format!("Already have open position for {}", symbol));
        }

        if !current_price.is_finite() || current_price <= 0.0 {
            return ExecutionOutcome::Failed(format!(
                "invalid price {} for {}",
                current_price, symbol
            ));
        }

        match self.open(symbol, decision, side, current_price).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Trade execution error for {}: {}", symbol, e);
                ExecutionOutcome::Failed(e.to_string())
            }
        }
    }

    async fn open(
        &self,
        symbol: &str,
        decision: &Decision,
        side: Side,
        price: f64,
    ) -> Result<ExecutionOutcome> {
        tracing::info!("🎯 Scalping {} {} @ ${:.6}", side, symbol, price);
        tracing::info!(
            "💰 Investment: ${:.2} | Leverage: {}x",
            decision.investment,
            decision.leverage
        );

        // Best effort: on rejection the venue keeps its current leverage
        let leverage = match self.client.set_leverage(symbol, decision.leverage).await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                tracing::warn!(
                    "⚠️ Could not set leverage for {}, using {}x for sizing",
                    symbol,
                    decision.leverage
                );
                decision.leverage
            }
            Err(e) => {
                tracing::warn!("⚠️ Leverage request failed for {}: {}", symbol, e);
                decision.leverage
            }
        };

        let filters = self.client.get_symbol_filters(symbol).await?;
        let notional = decision.investment * leverage as f64;
        let lots = floor_to_step(to_decimal(notional / price), filters.step_size_or_default())
            .max(filters.min_qty_or_default());
        if filters.below_min_notional(lots, to_decimal(price)) {
            tracing::warn!(
                "⚠️ {} order of {} is under the venue minimum notional, expect a rejection",
                symbol,
                lots
            );
        }
        let quantity = to_f64(lots);

        let (tp_price, sl_price) =
            bracket_prices(side, price, decision.tp_percentage, self.strategy.sl_percentage);
        tracing::info!("📈 TP: ${:.6} (+{:.2}%)", tp_price, decision.tp_percentage);
        tracing::info!("🛡️ SL: ${:.6} (-{}%)", sl_price, self.strategy.sl_percentage);

        let entry = self
            .client
            .place_order(symbol, side, OrderType::Market, quantity, None)
            .await?;
        let Some(entry_order_id) = entry.order_id else {
            tracing::error!("Entry failed for {}: {}", symbol, entry.raw);
            return Ok(ExecutionOutcome::Failed(format!(
                "entry not acknowledged: {}",
                entry.raw
            )));
        };
        tracing::info!("✅ Entry order filled! ID: {}", entry_order_id);

        tokio::time::sleep(Duration::from_millis(self.execution.settle_delay_ms)).await;

        let legs = match self
            .client
            .place_bracket(symbol, side, quantity, tp_price, sl_price)
            .await
        {
            Ok(legs) => legs,
            Err(e) => {
                tracing::error!("Bracket placement failed for {}: {}", symbol, e);
                Vec::new()
            }
        };

        if legs.len() < 2 {
            match self.execution.incomplete_bracket {
                IncompleteBracketPolicy::Keep => {
                    tracing::warn!(
                        "⚠️ {} opened with {} of 2 protective orders",
                        symbol,
                        legs.len()
                    );
                }
                IncompleteBracketPolicy::Flatten => {
                    self.flatten(symbol, side, quantity).await;
                    return Ok(ExecutionOutcome::Failed(format!(
                        "bracket incomplete ({} of 2 legs), position flattened",
                        legs.len()
                    )));
                }
            }
        }

        let position = self.build_position(
            symbol,
            side,
            price,
            quantity,
            leverage,
            decision,
            tp_price,
            sl_price,
            entry_order_id,
            legs,
        );

        if let Err(e) = lock_ledger(&self.ledger).record_open(position.clone()) {
            return Ok(ExecutionOutcome::Failed(e.to_string()));
        }

        tracing::info!("🚀 SCALP TRADE ACTIVE! {} {} x{}", position.side, symbol, position.quantity);
        Ok(ExecutionOutcome::Opened(position))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_position(
        &self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        leverage: u32,
        decision: &Decision,
        tp_price: f64,
        sl_price: f64,
        entry_order_id: i64,
        legs: Vec<BracketLeg>,
    ) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            quantity,
            leverage,
            investment: decision.investment,
            tp_percentage: decision.tp_percentage,
            tp_price,
            sl_price,
            entry_order_id,
            legs,
            entry_time: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    /// Cancel whatever rests for the symbol and close the entry at market
    async fn flatten(&self, symbol: &str, side: Side, quantity: f64) {
        tracing::warn!("⚠️ Flattening {} after incomplete bracket", symbol);

        if let Err(e) = self.client.cancel_all_orders(symbol).await {
            tracing::error!("Failed to cancel orders for {}: {}", symbol, e);
        }

        match self.client.close_position_market(symbol, side, quantity).await {
            Ok(resp) if resp.is_acknowledged() => {
                tracing::info!("Closed {} at market (id {:?})", symbol, resp.order_id);
            }
            Ok(resp) => {
                tracing::error!("Market close for {} not acknowledged: {}", symbol, resp.raw)
            }
            Err(e) => tracing::error!("Market close for {} failed: {}", symbol, e),
        }
    }
}
