//! Repeating countdown tick.
//!
//! The tick is a task handle owned by whoever armed it; dropping or
//! cancelling the handle stops the ticks.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::error::SessionError;

/// Default tick period.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// A running countdown. The first tick fires one period after start.
#[derive(Debug)]
pub struct Countdown {
    task: JoinHandle<()>,
}

impl Countdown {
    /// Call `on_tick` every `period` until it returns `ControlFlow::Break`
    /// or the countdown is cancelled.
    pub fn start<F>(period: Duration, mut on_tick: F) -> Result<Self, SessionError>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::Runtime(e.to_string()))?;
        let task = runtime.spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if on_tick().is_break() {
                    break;
                }
            }
        });
        Ok(Self { task })
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let _countdown = Countdown::start(TICK_PERIOD, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn break_stops_ticking() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let countdown = Countdown::start(TICK_PERIOD, move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(countdown.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let countdown = Countdown::start(TICK_PERIOD, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(countdown);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn requires_runtime() {
        assert!(matches!(
            Countdown::start(TICK_PERIOD, || ControlFlow::Continue(())),
            Err(SessionError::Runtime(_))
        ));
    }
}
