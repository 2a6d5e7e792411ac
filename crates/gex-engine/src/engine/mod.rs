//! Collection Engine
//!
//! # Components
//! - `CollectionEngine`: periodic scheduler plus one-shot `run_cycle`
//! - `CollectorHandle`: stop handle for a spawned scheduler
//! - `GexQuery`: on-demand read path sharing the same fetch/persist steps
//!
//! # Cycle
//! Market gate, then every allow-listed symbol is pushed into a queue that is
//! closed once filled. `worker_count` tasks drain it, pausing `request_delay`
//! between symbols, and send one outcome per symbol back on a results channel.
//! A per-cycle deadline bounds every step; symbols never started before it
//! passes are reported as unfinished. One symbol's failure never affects another.

mod pipeline;
mod query;

pub use query::{AllExpiriesGex, GexProfile, GexQuery, MIN_SIGNIFICANT_GEX, TOP_STRIKES_LIMIT};

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::GexError;
use crate::store::{Clock, SnapshotStore};
use crate::types::{CycleReport, SkipReason, SymbolOutcome, SymbolStatus};
use pipeline::Pipeline;

/// Bounded worker-pool collector for the configured symbols
#[derive(Clone)]
pub struct CollectionEngine {
    config: Arc<EngineConfig>,
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
}

impl CollectionEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        let pipeline = Pipeline::new(&config, store, clock.clone());
        Self {
            config: Arc::new(config),
            pipeline,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read path over the same store, clock and client
    pub fn query(&self) -> GexQuery {
        GexQuery::from_pipeline(self.pipeline.clone())
    }

    /// Run one full collection cycle and return its summary
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = self.clock.now();

        if !self.pipeline.hours().is_open(started_at) {
            info!("Market closed at {}, skipping collection cycle", started_at);
            return CycleReport::skipped(started_at, SkipReason::MarketClosed);
        }

        if let Err(e) = self.pipeline.client() {
            warn!("Skipping collection cycle: {}", e);
            return CycleReport::skipped(started_at, SkipReason::Configuration(e.to_string()));
        }

        let symbols = self.config.symbols.clone();
        let mut report = CycleReport::new(started_at);
        report.dispatched = symbols.len();
        if symbols.is_empty() {
            return report;
        }

        let deadline = Instant::now() + self.config.cycle_timeout;
        let workers = self.config.worker_count.max(1).min(symbols.len());
        info!("Starting collection cycle: {} symbols, {} workers", symbols.len(), workers);

        // Work queue, closed once every symbol is enqueued
        let (work_tx, work_rx) = mpsc::channel::<String>(symbols.len());
        for symbol in symbols {
            if work_tx.send(symbol).await.is_err() {
                break;
            }
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let (result_tx, mut result_rx) = mpsc::channel::<SymbolOutcome>(workers * 2);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
        for id in 0..workers {
            let engine = self.clone();
            let queue = work_rx.clone();
            let results = result_tx.clone();
            handles.push(tokio::spawn(async move {
                engine.worker(id, queue, results, deadline).await;
            }));
        }
        drop(result_tx);

        while let Some(outcome) = result_rx.recv().await {
            report.record(outcome);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Collection worker ended abnormally: {}", e);
            }
        }

        report.unfinished = report.dispatched.saturating_sub(report.outcomes.len());
        info!(
            "Collection cycle complete: {} collected, {} cached, {} failed, {} unfinished",
            report.collected, report.cached, report.failed, report.unfinished
        );
        report
    }

    async fn worker(
        &self,
        id: usize,
        queue: Arc<Mutex<mpsc::Receiver<String>>>,
        results: mpsc::Sender<SymbolOutcome>,
        deadline: Instant,
    ) {
        let mut first = true;
        loop {
            if Instant::now() >= deadline {
                debug!("Worker {} stopping: cycle deadline reached", id);
                break;
            }

            if !first && !self.config.request_delay.is_zero() {
                let wake = (Instant::now() + self.config.request_delay).min(deadline);
                tokio::time::sleep_until(wake).await;
                if Instant::now() >= deadline {
                    break;
                }
            }

            let next = { queue.lock().await.recv().await };
            let Some(symbol) = next else {
                break;
            };
            first = false;

            let outcome = self.collect_symbol(&symbol, deadline).await;
            if results.send(outcome).await.is_err() {
                break;
            }
        }
    }

    /// Collect one symbol, bounded by the cycle deadline
    async fn collect_symbol(&self, symbol: &str, deadline: Instant) -> SymbolOutcome {
        let status = match tokio::time::timeout_at(deadline, self.pipeline.collect_nearest(symbol)).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Failed to collect {}: {}", symbol, e);
                SymbolStatus::Failed { error: e.to_string() }
            }
            Err(_) => {
                let e = GexError::DeadlineExceeded(format!("collecting {}", symbol));
                warn!("{}", e);
                SymbolStatus::Failed { error: e.to_string() }
            }
        };

        SymbolOutcome { symbol: symbol.to_string(), status }
    }

    /// Run a cycle now and then every `collection_interval` until `stop` turns true
    ///
    /// A cycle already running when stop arrives is finished before returning.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.collection_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Collector started: {} symbols every {:?}",
            self.config.symbols.len(),
            self.config.collection_interval
        );

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!("Collector stopped");
    }

    /// Start `run` on a background task
    pub fn spawn(&self) -> CollectorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = self.clone();
        let join = tokio::spawn(async move { engine.run(stop_rx).await });
        CollectorHandle { stop_tx, join }
    }
}

/// Handle to a spawned collector
pub struct CollectorHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CollectorHandle {
    /// Stop scheduling new cycles and wait for the current one to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            warn!("Collector task ended abnormally: {}", e);
        }
    }
}
