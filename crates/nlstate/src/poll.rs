//! Deadline-bounded polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Default delay between two attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run `attempt` until it succeeds or `deadline` passes.
///
/// The first attempt runs immediately. Between attempts the task sleeps for
/// `interval`, or for the time left until the deadline if that is shorter,
/// so one last attempt always runs at the deadline. Returns the first
/// success, or the error of the last attempt.
pub async fn poll<T, E, F, Fut>(
    deadline: Instant,
    interval: Duration,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut tries = 1u32;
    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(tries, "poll deadline reached");
            return Err(err);
        }
        sleep(interval.min(deadline - now)).await;
        tries += 1;
    }
}
