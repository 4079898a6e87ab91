//! Drain scheduler: periodic background drain of the pending queue
//!
//! Runs a drain pass immediately, then every `sync.drain_interval_secs`.
//! After a pass that halts on an unreachable service the delay grows
//! exponentially up to `sync.max_backoff_secs`. Jitter spreads a fleet of
//! devices coming back online at the same moment. Settings are re-read
//! before every pass, so a config reload takes effect on the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::IngestQueue;
use crate::config::defaults::DRAIN_MAX_BACKOFF_EXPONENT;
use crate::config::ConfigHandle;

/// Delay before the next pass after `failures` consecutive failed passes.
pub fn backoff_delay(interval_secs: u64, failures: u32, max_backoff_secs: u64) -> Duration {
    if failures == 0 {
        return Duration::from_secs(interval_secs);
    }
    let factor = 1u64 << failures.min(DRAIN_MAX_BACKOFF_EXPONENT);
    Duration::from_secs(interval_secs.saturating_mul(factor).min(max_backoff_secs))
}

fn jitter(jitter_secs: u64) -> Duration {
    if jitter_secs == 0 {
        return Duration::ZERO;
    }
    use rand::Rng;
    Duration::from_millis(rand::thread_rng().gen_range(0..jitter_secs.saturating_mul(1000)))
}

/// Run the drain scheduler until `cancel` fires.
///
/// Passes are skipped while `sync.auto_sync` is off. The queue lock is held
/// only for the duration of a pass.
pub async fn run_drain_loop(
    queue: Arc<Mutex<IngestQueue>>,
    config: ConfigHandle,
    cancel: CancellationToken,
) {
    info!("Drain scheduler started");
    let mut consecutive_failures: u32 = 0;

    loop {
        let cfg = config.current();

        if cfg.sync.auto_sync {
            let result = {
                let mut queue = queue.lock().await;
                queue.drain_pending(&cancel).await
            };
            match result {
                Ok(report) if report.hit_transient() => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                }
                Ok(report) => {
                    if report.remaining > 0 {
                        debug!(remaining = report.remaining, "Drain pass interrupted");
                    }
                    consecutive_failures = 0;
                }
                Err(e) => {
                    error!(error = %e, "Drain pass failed on local storage");
                    consecutive_failures = consecutive_failures.saturating_add(1);
                }
            }
        } else {
            debug!("Auto-sync off, skipping drain pass");
            consecutive_failures = 0;
        }

        let delay = backoff_delay(
            cfg.sync.drain_interval_secs,
            consecutive_failures,
            cfg.sync.max_backoff_secs,
        ) + jitter(cfg.sync.jitter_secs);

        if consecutive_failures > 0 {
            warn!(
                consecutive_failures,
                next_retry_secs = delay.as_secs(),
                "Service unreachable, backing off"
            );
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    info!("Drain scheduler stopped");
}
