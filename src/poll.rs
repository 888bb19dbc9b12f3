//! Fixed-interval polling bounded by an overall deadline.
//!
//! Two timers race: a periodic tick that runs the probe and a deadline
//! sleep. Whichever fires first wins. A probe that is already running is
//! never interrupted.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of a single probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Probe<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Keep polling.
    Pending,
}

/// When the first probe runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FirstPoll {
    /// Probe as soon as polling starts.
    Immediate,
    /// Wait one interval before the first probe.
    AfterInterval,
}

/// Why polling stopped without a ready value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollError<E> {
    /// The deadline fired first.
    Elapsed,
    /// The probe reported a terminal error.
    Probe(E),
}

/// Polls `probe` every `every` until it is ready, fails, or `timeout` elapses.
///
/// # Errors
///
/// Returns [`PollError::Elapsed`] when the deadline fires first and
/// [`PollError::Probe`] when the probe fails.
pub async fn poll_until<T, E, F, Fut>(
    timeout: Duration,
    every: Duration,
    first: FirstPoll,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, E>>,
{
    let period = every.max(MIN_INTERVAL);
    let start = match first {
        FirstPoll::Immediate => Instant::now(),
        FirstPoll::AfterInterval => Instant::now() + period,
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            () = &mut deadline => return Err(PollError::Elapsed),
            _ = ticker.tick() => {
                if let Probe::Ready(value) = probe().await.map_err(PollError::Probe)? {
                    return Ok(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn immediate_poll_returns_without_waiting() {
        let started = Instant::now();
        let result: Result<u8, PollError<()>> = poll_until(
            Duration::from_secs(10),
            Duration::from_secs(1),
            FirstPoll::Immediate,
            || async { Ok(Probe::Ready(7)) },
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn after_interval_waits_one_period_before_probing() {
        let started = Instant::now();
        let result: Result<(), PollError<()>> = poll_until(
            Duration::from_secs(10),
            Duration::from_secs(2),
            FirstPoll::AfterInterval,
            || async { Ok(Probe::Ready(())) },
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_wins_over_pending_probe() {
        let probes = Cell::new(0_u32);
        let started = Instant::now();
        let result: Result<(), PollError<()>> = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(1),
            FirstPoll::Immediate,
            || {
                probes.set(probes.get() + 1);
                async { Ok(Probe::Pending) }
            },
        )
        .await;

        assert_eq!(result, Err(PollError::Elapsed));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(probes.get(), 5, "ticks at 0s..4s, deadline at 5s");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_error_stops_polling() {
        let result: Result<(), PollError<&str>> = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(1),
            FirstPoll::Immediate,
            || async { Err("boom") },
        )
        .await;

        assert_eq!(result, Err(PollError::Probe("boom")));
    }
}
