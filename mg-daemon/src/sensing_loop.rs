//! Scheduled sensing cycles

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use mg_core::{CycleOutcome, SensingCycle};

/// Failed cycles in a row before the loop escalates to an error log
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Run a cycle now, then every `interval`, until `shutdown` flips
///
/// A cycle in progress when shutdown arrives finishes first.
pub async fn run_sensing_loop(
    cycle: Arc<SensingCycle>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Sensing loop starting (interval {:?})", interval);

    let mut consecutive_failures: u32 = 0;
    let mut completed: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let worker = Arc::clone(&cycle);
        match tokio::task::spawn_blocking(move || worker.run_once()).await {
            Ok(outcome) => {
                completed += 1;
                match outcome {
                    CycleOutcome::Recorded { .. } | CycleOutcome::LogFailed { .. } => {
                        if consecutive_failures > 0 {
                            debug!("Sensing recovered after {} failed cycles", consecutive_failures);
                            consecutive_failures = 0;
                        }
                    }
                    CycleOutcome::CaptureFailed
                    | CycleOutcome::NothingRecognized
                    | CycleOutcome::ReaderFailed => {
                        consecutive_failures += 1;
                        if consecutive_failures % MAX_CONSECUTIVE_FAILURES == 0 {
                            error!(
                                "No reading for {} consecutive cycles (last: {})",
                                consecutive_failures,
                                outcome.label()
                            );
                        }
                    }
                }
            }
            Err(e) => {
                error!("Sensing cycle task failed: {}", e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    warn!("Shutdown channel closed, stopping sensing loop");
                    break;
                }
                debug!("Sensing loop woken by shutdown");
            }
        }
    }

    info!("Sensing loop stopped after {} cycles", completed);
}
