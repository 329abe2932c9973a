//! Job poller
//!
//! Runs `concurrency` consumers. Each one leases a message, dispatches it to
//! completion and leases again straight away; an empty queue or a failed
//! lease puts the consumer to sleep for `poll_interval`. Consumers stop
//! between messages once shutdown is signalled.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use tessera_core::service::{DispatchOutcome, Dispatcher};

/// Pool of dispatch consumers
pub struct JobPoller {
    dispatcher: Dispatcher,
    concurrency: usize,
    poll_interval: Duration,
}

impl JobPoller {
    pub fn new(dispatcher: Dispatcher, concurrency: usize, poll_interval: Duration) -> Self {
        Self {
            dispatcher,
            concurrency,
            poll_interval,
        }
    }

    /// Runs every consumer until `shutdown` turns true
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting {} consumer(s) (idle poll interval: {:?})",
            self.concurrency, self.poll_interval
        );

        let handles: Vec<_> = (0..self.concurrency)
            .map(|slot| {
                let dispatcher = self.dispatcher.clone();
                let shutdown = shutdown.clone();
                let poll_interval = self.poll_interval;
                tokio::spawn(consume(slot, dispatcher, poll_interval, shutdown))
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Consumer task panicked: {}", e);
            }
        }

        info!("All consumers stopped");
        Ok(())
    }
}

async fn consume(
    slot: usize,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            debug!("Consumer {} shutting down", slot);
            return;
        }

        let idle = match dispatcher.run_once().await {
            Ok(Some(outcome)) => {
                log_outcome(slot, &outcome);
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!("Consumer {} failed to dispatch: {}", slot, e);
                true
            }
        };

        if idle {
            tokio::select! {
                _ = time::sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}

fn log_outcome(slot: usize, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Retrying { attempt, delay } => {
            info!(
                "Consumer {}: attempt {} failed, retrying in {:?}",
                slot, attempt, delay
            );
        }
        DispatchOutcome::Skipped(reason) => {
            debug!("Consumer {}: skipped message ({:?})", slot, reason);
        }
        other => debug!("Consumer {}: {:?}", slot, other),
    }
}
