//! Background runner for the expiry sweep.
//!
//! - Schedule: runs every `interval`, and once on startup
//! - Trigger: `handle.trigger()` requests an extra pass; triggers coalesce
//! - Failures: logged and retried with bounded exponential backoff; never
//!   propagate

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::claims::ClaimsStore;
use crate::services::{ExpirySweeper, backoff};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SweepRunner {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for SweepRunner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
pub struct SweepRunnerHandle {
    shutdown: watch::Sender<bool>,
    trigger: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl SweepRunnerHandle {
    pub fn trigger(&self) {
        // notify_one stores a single permit, so repeated calls coalesce.
        self.trigger.notify_one();
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl SweepRunner {
    pub fn spawn<S, C>(&self, sweeper: Arc<ExpirySweeper<S, C>>) -> SweepRunnerHandle
    where
        S: Store + 'static,
        C: ClaimsStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = Arc::new(Notify::new());
        let join = tokio::spawn(runner_loop(self.clone(), sweeper, shutdown_rx, trigger.clone()));

        SweepRunnerHandle {
            shutdown: shutdown_tx,
            trigger,
            join: Some(join),
        }
    }
}

async fn runner_loop<S, C>(
    cfg: SweepRunner,
    sweeper: Arc<ExpirySweeper<S, C>>,
    mut shutdown: watch::Receiver<bool>,
    trigger: Arc<Notify>,
) where
    S: Store + 'static,
    C: ClaimsStore + 'static,
{
    info!(interval = ?cfg.interval, "expiry sweep runner started");
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately: run once on startup.
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {}
        }

        let mut failures: u32 = 0;
        loop {
            match sweeper.sweep_expire().await {
                Ok(_) => break,
                Err(e) => {
                    failures += 1;
                    if failures > cfg.max_retries {
                        warn!(error = %e, failures, "expiry sweep giving up until next tick");
                        break;
                    }
                    let delay = backoff(cfg.base_backoff, failures);
                    warn!(error = %e, failures, ?delay, "expiry sweep failed; backing off");
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    info!("expiry sweep runner stopped");
}
