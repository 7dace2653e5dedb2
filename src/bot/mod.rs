use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::BinanceFuturesClient;
use crate::api::GeminiClient;
use crate::decision::{DecisionEngine, Verdict};
use crate::discovery::MarketScanner;
use crate::execution::{
    lock_ledger, ExecutionOutcome, SessionLedger, SessionStats, SharedLedger, TradeExecutor,
    TradeMonitor,
};
use crate::models::{CompletedTrade, Position};
use crate::settings::{Credentials, Settings};
use crate::Result;

/// What happened during one scheduling cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub closed: Vec<CompletedTrade>,
    pub opened: Option<Position>,
    pub open_positions: usize,
}

struct BotCore {
    settings: Settings,
    client: BinanceFuturesClient,
    scanner: MarketScanner,
    engine: DecisionEngine,
    executor: TradeExecutor,
    monitor: TradeMonitor,
    ledger: SharedLedger,
    stop_rx: watch::Receiver<bool>,
}

/// Scalping bot: one background task running monitor, scan, analyze, execute
pub struct TradingBot {
    core: Arc<BotCore>,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TradingBot {
    pub fn new(settings: Settings, credentials: &Credentials) -> Result<Self> {
        settings.validate()?;

        let client = BinanceFuturesClient::from_settings(&settings.exchange, credentials)?;
        let oracle = GeminiClient::new(&settings.oracle, credentials.gemini_api_key.clone())?;
        let ledger = SessionLedger::shared();

        let scanner = MarketScanner::new(
            client.clone(),
            settings.exchange.quote_asset.clone(),
            settings.scanner.clone(),
            settings.market_data.clone(),
        );
        let engine = DecisionEngine::new(
            oracle,
            settings.strategy.clone(),
            settings.market_data.clone(),
        );
        let executor = TradeExecutor::new(
            client.clone(),
            ledger.clone(),
            settings.strategy.clone(),
            settings.execution.clone(),
        );
        let monitor = TradeMonitor::new(client.clone(), ledger.clone());

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            core: Arc::new(BotCore {
                settings,
                client,
                scanner,
                engine,
                executor,
                monitor,
                ledger,
                stop_rx,
            }),
            stop_tx,
            handle: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Align the clock with the venue and check the credentials.
    ///
    /// Returns the wallet balance. Fails with `BotError::ClockSync` when the
    /// venue time endpoint stays unreachable for the whole retry budget.
    pub async fn initialize(&self) -> Result<f64> {
        let ex = &self.core.settings.exchange;
        self.core
            .client
            .sync_clock_with_retry(
                ex.clock_sync_attempts,
                Duration::from_millis(ex.clock_sync_backoff_ms),
            )
            .await?;

        let wallet = self.core.client.verify_account().await?;
        tracing::info!("✅ Account verified. Wallet balance: ${:.2}", wallet);
        Ok(wallet)
    }

    /// Initialize and spawn the trading loop
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::warn!("Bot already running");
            return Ok(());
        }

        self.initialize().await?;

        let strategy = &self.core.settings.strategy;
        tracing::info!("🚀 SCALPING BOT STARTED!");
        tracing::info!(
            "📊 SL: {}% | TP: {}%-{}% | Leverage: {}-{}x",
            strategy.sl_percentage,
            strategy.tp_min,
            strategy.tp_max,
            strategy.min_leverage,
            strategy.max_leverage
        );

        self.stop_tx.send_replace(false);
        let core = Arc::clone(&self.core);
        self.handle = Some(tokio::spawn(async move {
            core.run_loop().await;
        }));

        Ok(())
    }

    /// Request a cooperative stop, wait for the loop, then clean up
    pub async fn stop(&mut self) -> SessionStats {
        tracing::warn!("🛑 Bot stopping...");
        self.stop_tx.send_replace(true);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Trading loop ended abnormally: {}", e);
            }
        }

        self.core.shutdown().await
    }

    pub fn status(&self) -> SessionStats {
        lock_ledger(&self.core.ledger).stats()
    }

    /// Run a single cycle without the scheduler
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.core.run_cycle().await
    }
}

impl BotCore {
    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    async fn run_loop(&self) {
        let schedule = &self.settings.schedule;
        let mut stop_rx = self.stop_rx.clone();
        stop_rx.borrow_and_update();
        let mut cycle: u64 = 0;

        while !self.stop_requested() {
            cycle += 1;
            tracing::info!("🔄 Cycle #{}", cycle);

            let delay = match self.run_cycle().await {
                Ok(report) if report.open_positions > 0 => {
                    tracing::info!("📊 Active: {} trade(s)", report.open_positions);
                    Duration::from_secs(schedule.active_interval_secs)
                }
                Ok(_) => Duration::from_secs(schedule.idle_interval_secs),
                Err(e) => {
                    tracing::error!("Error: {}", e);
                    Duration::from_secs(schedule.error_backoff_secs)
                }
            };

            if schedule.stats_every_cycles > 0 && cycle % schedule.stats_every_cycles == 0 {
                self.log_stats("📈 SESSION STATS:").await;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Trading loop exited after {} cycles", cycle);
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport {
            closed: self.monitor.reconcile().await,
            ..CycleReport::default()
        };

        report.open_positions = lock_ledger(&self.ledger).open_count();
        if report.open_positions > 0 {
            return Ok(report);
        }

        report.opened = self.find_opportunity().await?;
        report.open_positions = lock_ledger(&self.ledger).open_count();
        Ok(report)
    }

    /// Scan, analyse and open at most one new position
    async fn find_opportunity(&self) -> Result<Option<Position>> {
        tracing::info!("🔍 Scanning for scalp opportunities...");

        let balance = self.client.get_balance().await?;
        let min_investment = self.settings.strategy.min_investment;
        if balance < min_investment {
            tracing::warn!("⚠️ Low balance: ${:.2}", balance);
            return Ok(None);
        }

        let candidates = self.scanner.top_candidates().await;
        if candidates.is_empty() {
            tracing::warn!("⚠️ No suitable coins");
            return Ok(None);
        }
        tracing::info!("📊 Analyzing top {} coins...", candidates.len());

        let win_rate = lock_ledger(&self.ledger).win_rate();

        for candidate in &candidates {
            if self.stop_requested() {
                break;
            }
            tracing::info!("🔍 {} @ ${:.6}", candidate.symbol, candidate.last_price);

            let snapshot = match self.scanner.snapshot(candidate).await {
                Ok(s) if s.is_complete() => s,
                Ok(_) => {
                    tracing::debug!("Incomplete market data for {}, skipping", candidate.symbol);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Market data for {} unavailable: {}", candidate.symbol, e);
                    continue;
                }
            };

            let decision = match self.engine.analyze(&snapshot, balance, win_rate).await {
                Ok(Verdict::Trade(d)) => d,
                Ok(Verdict::Hold) => {
                    tracing::info!("📊 AI: HOLD {}", candidate.symbol);
                    continue;
                }
                Ok(Verdict::NoDecision(reason)) => {
                    tracing::warn!("⚠️ AI error: {}", reason);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Oracle unreachable for {}: {}", candidate.symbol, e);
                    continue;
                }
            };

            tracing::info!("🎯 AI: {:?} | Confidence: {:?}", decision.signal, decision.confidence);
            tracing::info!("💡 {}", decision.reasoning);

            let outcome = self
                .executor
                .execute(&candidate.symbol, &decision, snapshot.last_price)
                .await;
            match outcome {
                ExecutionOutcome::Opened(position) => return Ok(Some(position)),
                ExecutionOutcome::Skipped(reason) => {
                    tracing::info!("Skipped {}: {}", candidate.symbol, reason)
                }
                ExecutionOutcome::Failed(reason) => {
                    tracing::warn!("⚠️ {} not opened: {}", candidate.symbol, reason)
                }
            }
        }

        tracing::warn!("⚠️ No scalp opportunities found");
        Ok(None)
    }

    async fn log_stats(&self, header: &str) {
        let stats = lock_ledger(&self.ledger).stats();

        tracing::info!("{}", header);
        match self.client.get_balance().await {
            Ok(balance) => tracing::info!("   💰 Balance: ${:.2}", balance),
            Err(e) => tracing::warn!("   💰 Balance unavailable: {}", e),
        }
        tracing::info!("   📊 Trades: {}", stats.completed_trades);
        tracing::info!("   🏆 Win Rate: {:.1}%", stats.win_rate);
        tracing::info!("   💎 P&L: ${:.2}", stats.total_pnl);
    }

    /// Cancel every tracked symbol's orders and report the session
    async fn shutdown(&self) -> SessionStats {
        let symbols = lock_ledger(&self.ledger).open_symbols();

        for symbol in &symbols {
            match self.client.cancel_all_orders(symbol).await {
                Ok(()) => tracing::info!("Cancelled open orders for {}", symbol),
                Err(e) => tracing::error!("Failed to cancel orders for {}: {}", symbol, e),
            }
        }

        self.log_stats("🏁 FINAL STATS:").await;
        lock_ledger(&self.ledger).stats()
    }
}
