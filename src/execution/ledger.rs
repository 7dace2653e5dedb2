use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::{BracketKind, CompletedTrade, Position, PositionStatus};

/// Ledger shared between the trading loop and `status()` callers
pub type SharedLedger = Arc<Mutex<SessionLedger>>;

/// Lock the ledger, recovering the data if a holder panicked.
/// Never hold the guard across an `.await`.
pub fn lock_ledger(ledger: &SharedLedger) -> MutexGuard<'_, SessionLedger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Realized result credited when a bracket closes.
///
/// The venue is not asked for the fill price, so every close is booked as if
/// the take-profit was reached: investment x TP% x leverage.
pub fn approximate_pnl(position: &Position) -> f64 {
    position.investment * (position.tp_percentage / 100.0) * position.leverage as f64
}

/// Point-in-time summary of the session
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub open_positions: usize,
    pub open_symbols: Vec<String>,
    pub completed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
    pub win_rate: f64,
}

/// Open positions (at most one per symbol) and append-only trade history
pub struct SessionLedger {
    positions: HashMap<String, Position>,
    history: Vec<CompletedTrade>,
    total_pnl: f64,
    started_at: DateTime<Utc>,
}

impl Default for SessionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLedger {
    pub fn shared() -> SharedLedger {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            history: Vec::new(),
            total_pnl: 0.0,
            started_at: Utc::now(),
        }
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.values().collect()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Track a freshly opened position
    pub fn record_open(&mut self, position: Position) -> anyhow::Result<()> {
        if self.positions.contains_key(&position.symbol) {
            anyhow::bail!("Already have open position for {}", position.symbol);
        }
        if position.status != PositionStatus::Open {
            anyhow::bail!("Cannot record closed position {}", position.id);
        }

        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Move a position to history with its realized result
    pub fn close_position(
        &mut self,
        symbol: &str,
        pnl: f64,
        filled_leg: Option<BracketKind>,
    ) -> anyhow::Result<CompletedTrade> {
        let Some(mut position) = self.positions.remove(symbol) else {
            anyhow::bail!("No open position for {}", symbol);
        };

        position.status = PositionStatus::Closed;
        let trade = CompletedTrade {
            position,
            pnl,
            exit_time: Utc::now(),
            filled_leg,
        };

        self.total_pnl += pnl;
        self.history.push(trade.clone());
        Ok(trade)
    }

    pub fn history(&self) -> &[CompletedTrade] {
        &self.history
    }

    pub fn total_pnl(&self) -> f64 {
        self.total_pnl
    }

    /// Percentage of completed trades with positive PnL; 0 when none
    pub fn win_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let wins = self.history.iter().filter(|t| t.is_win()).count();
        wins as f64 / self.history.len() as f64 * 100.0
    }

    pub fn stats(&self) -> SessionStats {
        let wins = self.history.iter().filter(|t| t.is_win()).count();
        SessionStats {
            started_at: self.started_at,
            open_positions: self.positions.len(),
            open_symbols: self.open_symbols(),
            completed_trades: self.history.len(),
            wins,
            losses: self.history.len() - wins,
            total_pnl: self.total_pnl,
            win_rate: self.win_rate(),
        }
    }
}
