//! TSL/TP monitor loop
//!
//! One background task per mode polls open trades on a fixed interval. The
//! tick body is public so tests drive it directly instead of sleeping.
//! Cancellation is cooperative: stop sends a shutdown signal and awaits the
//! task.

use crate::engine::TradingEngine;
use crate::types::TradeMode;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub(crate) struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TradingEngine {
    pub async fn start_paper_trading_monitor(self: &std::sync::Arc<Self>) {
        self.start_monitor(TradeMode::Paper).await;
    }

    pub async fn stop_paper_trading_monitor(&self) {
        self.stop_monitor(TradeMode::Paper).await;
    }

    pub async fn start_real_trading_monitor(self: &std::sync::Arc<Self>) {
        self.start_monitor(TradeMode::Real).await;
    }

    pub async fn stop_real_trading_monitor(&self) {
        self.stop_monitor(TradeMode::Real).await;
    }

    /// Spawn the polling task for one mode. Idempotent: a second start while
    /// running is a logged no-op.
    pub async fn start_monitor(self: &std::sync::Arc<Self>, mode: TradeMode) {
        let mut monitors = self.monitors.lock().await;
        if monitors.contains_key(&mode) {
            warn!(%mode, "monitor already running");
            return;
        }

        let (shutdown, mut signal) = watch::channel(false);
        let engine = std::sync::Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(%mode, interval = ?engine.poll_interval, "monitor started");
            loop {
                tokio::select! {
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        engine.tick(mode).await;
                    }
                }
            }
            info!(%mode, "monitor stopped");
        });

        monitors.insert(mode, MonitorTask { shutdown, handle });
    }

    /// Signal the monitor for one mode and wait for it to finish its tick.
    pub async fn stop_monitor(&self, mode: TradeMode) {
        let task = self.monitors.lock().await.remove(&mode);
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!(%mode, error = %e, "monitor task did not shut down cleanly");
            }
        }
    }

    pub async fn stop_all_monitors(&self) {
        self.stop_monitor(TradeMode::Paper).await;
        self.stop_monitor(TradeMode::Real).await;
    }

    /// One monitor pass over the open trades of `mode`.
    ///
    /// A single trade's failure never aborts the pass: a missing price skips
    /// that trade for this tick, a failed close is retried naturally because
    /// the trade stays open.
    pub async fn tick(&self, mode: TradeMode) {
        self.retry_pending_persists().await;

        let trades = match self.db.get_open_trades(mode).await {
            Ok(trades) => trades,
            Err(e) => {
                error!(%mode, error = %e, "could not load open trades, skipping tick");
                return;
            }
        };

        for mut trade in trades {
            let price = match self.market.latest_price(&trade.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(trade = %trade.id, symbol = %trade.symbol, error = %e,
                        "price unavailable, skipping trade this tick");
                    continue;
                }
            };

            if let Some(new_stop) = trade.ratchet_stop(price, Utc::now()) {
                info!(trade = %trade.id, %price, %new_stop, "trailing stop ratcheted");
                if let Err(e) = self.db.upsert_trade(&trade).await {
                    // The in-memory ratchet is recomputed next tick anyway
                    warn!(trade = %trade.id, error = %e, "ratchet not persisted");
                }
            }

            if let Some(reason) = trade.exit_trigger(price) {
                if let Err(e) = self.close_position(&mut trade, price, reason).await {
                    warn!(trade = %trade.id, error = %e,
                        "close failed, trade stays open for the next tick");
                }
            }
        }
    }

    /// Reconciliation sweep: closed trades whose persist failed are retried
    /// until they land.
    async fn retry_pending_persists(&self) {
        let pending: Vec<_> = self.pending_persist.lock().values().cloned().collect();
        for trade in pending {
            match self.db.upsert_trade(&trade).await {
                Ok(()) => {
                    self.pending_persist.lock().remove(&trade.id);
                    info!(trade = %trade.id, "reconciled close that previously failed to persist");
                }
                Err(e) => {
                    warn!(trade = %trade.id, error = %e, "close persist still failing");
                }
            }
        }
    }
}
