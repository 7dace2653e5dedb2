use std::collections::HashSet;

use crate::api::BinanceFuturesClient;
use crate::execution::ledger::{approximate_pnl, lock_ledger, SharedLedger};
use crate::models::{BracketLeg, CompletedTrade};

/// Detects closed positions by watching their bracket orders disappear
pub struct TradeMonitor {
    client: BinanceFuturesClient,
    ledger: SharedLedger,
}

impl TradeMonitor {
    pub fn new(client: BinanceFuturesClient, ledger: SharedLedger) -> Self {
        Self { client, ledger }
    }

    /// One reconciliation pass over every tracked position.
    ///
    /// A position is closed once fewer of its recorded legs are still open
    /// than were recorded. Its remaining orders are cancelled and the result
    /// is booked with the approximate PnL.
    pub async fn reconcile(&self) -> Vec<CompletedTrade> {
        let tracked: Vec<(String, Vec<BracketLeg>)> = {
            let ledger = lock_ledger(&self.ledger);
            let snapshot = ledger
                .open_positions()
                .into_iter()
                .map(|p| (p.symbol.clone(), p.legs.clone()))
                .collect();
            snapshot
        };

        if tracked.is_empty() {
            return Vec::new();
        }

        let open_ids: HashSet<i64> = match self.client.get_open_orders().await {
            Ok(orders) => orders.into_iter().map(|o| o.order_id).collect(),
            Err(e) => {
                tracing::debug!("Open order query unusable, skipping reconciliation: {}", e);
                return Vec::new();
            }
        };

        let mut completed = Vec::new();

        for (symbol, legs) in tracked {
            if legs.is_empty() {
                tracing::debug!("{} has no protective orders on record, cannot reconcile", symbol);
                continue;
            }

            let missing: Vec<&BracketLeg> = legs
                .iter()
                .filter(|leg| !open_ids.contains(&leg.order_id))
                .collect();
            if missing.is_empty() {
                continue;
            }

            let filled_leg = match missing.as_slice() {
                [only] => Some(only.kind),
                _ => None,
            };

            if let Err(e) = self.client.cancel_all_orders(&symbol).await {
                tracing::warn!("Failed to cancel remaining orders for {}: {}", symbol, e);
            }

            let closed = {
                let mut ledger = lock_ledger(&self.ledger);
                let pnl = ledger.position(&symbol).map(approximate_pnl).unwrap_or(0.0);
                ledger.close_position(&symbol, pnl, filled_leg)
            };

            match closed {
                Ok(trade) => {
                    tracing::info!(
                        "✅ Scalp completed: {} | PnL: ${:.2} | exit: {:?}",
                        symbol,
                        trade.pnl,
                        trade.filled_leg
                    );
                    completed.push(trade);
                }
                Err(e) => tracing::warn!("Could not close {} in ledger: {}", symbol, e),
            }
        }

        if !completed.is_empty() {
            let total = lock_ledger(&self.ledger).total_pnl();
            tracing::info!("💰 Session P&L: ${:.2}", total);
        }

        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ledger::SessionLedger;
    use crate::models::{BracketKind, Position, PositionStatus, Side};
    use chrono::Utc;
    use mockito::{Matcher, ServerGuard};
    use std::time::Duration;
    use uuid::Uuid;

    fn leg(kind: BracketKind, order_id: i64) -> BracketLeg {
        BracketLeg {
            kind,
            order_id,
            trigger_price: 1.0,
        }
    }

    fn position(symbol: &str, legs: Vec<BracketLeg>) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: Side::Buy,
            entry_price: 1.0,
            quantity: 10.0,
            leverage: 10,
            investment: 2.0,
            tp_percentage: 1.5,
            tp_price: 1.015,
            sl_price: 0.992,
            entry_order_id: 1,
            legs,
            entry_time: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    async fn synced(server: &mut ServerGuard) -> BinanceFuturesClient {
        server
            .mock("GET", "/fapi/v1/time")
            .with_body(format!(r#"{{"serverTime": {}}}"#, Utc::now().timestamp_millis()))
            .create_async()
            .await;
        let client =
            BinanceFuturesClient::new(server.url(), "k", "s", Duration::from_secs(5)).unwrap();
        client.sync_clock().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_no_positions_skips_query() {
        let mut server = mockito::Server::new_async().await;
        let client = synced(&mut server).await;
        let query = server
            .mock("GET", "/fapi/v1/openOrders")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let monitor = TradeMonitor::new(client, SessionLedger::shared());
        assert!(monitor.reconcile().await.is_empty());
        query.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_leg_closes_position() {
        let mut server = mockito::Server::new_async().await;
        let client = synced(&mut server).await;
        // Only the stop of AUSDT is still resting; BUSDT is untouched
        server
            .mock("GET", "/fapi/v1/openOrders")
            .match_query(Matcher::Any)
            .with_body(
                r#"[{"orderId": 12, "symbol": "AUSDT", "type": "STOP_MARKET"},
                    {"orderId": 21, "symbol": "BUSDT", "type": "TAKE_PROFIT_MARKET"},
                    {"orderId": 22, "symbol": "BUSDT", "type": "STOP_MARKET"}]"#,
            )
            .create_async()
            .await;
        let cancel = server
            .mock("DELETE", "/fapi/v1/allOpenOrders")
            .match_query(Matcher::UrlEncoded("symbol".into(), "AUSDT".into()))
            .with_body(r#"{"code": 200, "msg": "done"}"#)
            .expect(1)
            .create_async()
            .await;

        let ledger = SessionLedger::shared();
        {
            let mut l = lock_ledger(&ledger);
            let a_legs = vec![leg(BracketKind::TakeProfit, 11), leg(BracketKind::StopLoss, 12)];
            let b_legs = vec![leg(BracketKind::TakeProfit, 21), leg(BracketKind::StopLoss, 22)];
            l.record_open(position("AUSDT", a_legs)).unwrap();
            l.record_open(position("BUSDT", b_legs)).unwrap();
        }

        let monitor = TradeMonitor::new(client, ledger.clone());
        let closed = monitor.reconcile().await;

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].position.symbol, "AUSDT");
        assert_eq!(closed[0].filled_leg, Some(BracketKind::TakeProfit));
        // 2 x 1.5% x 10
        assert!((closed[0].pnl - 0.3).abs() < 1e-9);

        let l = lock_ledger(&ledger);
        assert!(!l.has_position("AUSDT"));
        assert!(l.has_position("BUSDT"));
        assert!((l.total_pnl() - 0.3).abs() < 1e-9);
        drop(l);
        cancel.assert_async().await;
    }

    #[tokio::test]
    async fn test_single_leg_position_is_monitored() {
        let mut server = mockito::Server::new_async().await;
        let client = synced(&mut server).await;
        server
            .mock("GET", "/fapi/v1/openOrders")
            .match_query(Matcher::Any)
            .with_body("[]")
            .create_async()
            .await;
        server
            .mock("DELETE", "/fapi/v1/allOpenOrders")
            .match_query(Matcher::Any)
            .with_body(r#"{"code": 200, "msg": "done"}"#)
            .create_async()
            .await;

        let ledger = SessionLedger::shared();
        lock_ledger(&ledger)
            .record_open(position("AUSDT", vec![leg(BracketKind::TakeProfit, 11)]))
            .unwrap();
        lock_ledger(&ledger).record_open(position("NAKEDUSDT", vec![])).unwrap();

        let monitor = TradeMonitor::new(client, ledger.clone());
        let closed = monitor.reconcile().await;

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].filled_leg, Some(BracketKind::TakeProfit));
        // Without legs there is nothing to watch, so it stays open
        assert!(lock_ledger(&ledger).has_position("NAKEDUSDT"));
    }

    #[tokio::test]
    async fn test_non_list_response_aborts_quietly() {
        let mut server = mockito::Server::new_async().await;
        let client = synced(&mut server).await;
        server
            .mock("GET", "/fapi/v1/openOrders")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code": -1021, "msg": "Timestamp outside recvWindow"}"#)
            .create_async()
            .await;

        let ledger = SessionLedger::shared();
        lock_ledger(&ledger)
            .record_open(position("AUSDT", vec![leg(BracketKind::TakeProfit, 11)]))
            .unwrap();

        let monitor = TradeMonitor::new(client, ledger.clone());
        assert!(monitor.reconcile().await.is_empty());
        assert!(lock_ledger(&ledger).has_position("AUSDT"));
    }
}
