use crate::shutdown::Shutdown;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::info;

/// Time left in the interval after a run that took `elapsed`, floored at zero.
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Runs `task`, waits out the rest of `interval`, and repeats until shutdown.
/// A run is never interrupted by the scheduler itself. Returns the number of
/// completed runs.
pub async fn run_every<F, Fut>(interval: Duration, mut shutdown: Shutdown, mut task: F) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut runs = 0;
    while !shutdown.is_triggered() {
        let start = Instant::now();
        task().await;
        runs += 1;

        let delay = next_delay(interval, start.elapsed());
        info!(run = runs, next_in_secs = delay.as_secs(), "Scheduled run finished");
        if !shutdown.sleep(delay).await {
            break;
        }
    }
    runs
}
