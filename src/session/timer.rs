//! Session Timer: a once-per-second countdown that fires a single expiry.
//!
//! The running/expired/cancelled state is one atomic, and expiry is a
//! compare-and-swap from RUNNING, so `on_expire` runs at most once and never
//! after a successful [`SessionTimer::cancel`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

const RUNNING: u8 = 0;
const EXPIRED: u8 = 1;
const CANCELLED: u8 = 2;

pub struct SessionTimer {
    state: Arc<AtomicU8>,
    task: Option<JoinHandle<()>>,
}

impl SessionTimer {
    /// Start counting down from `duration_secs`.
    ///
    /// `on_tick` receives the remaining seconds after each decrement; the
    /// last tick reports `0` and is followed by `on_expire`.  A zero
    /// duration expires immediately without ticking.  Must be called from
    /// within a tokio runtime.
    pub fn start<T, E>(duration_secs: u64, mut on_tick: T, on_expire: E) -> Self
    where
        T: FnMut(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(RUNNING));
        let shared = Arc::clone(&state);

        let task = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = interval_at(Instant::now() + period, period);
            let mut remaining = duration_secs;

            while remaining > 0 {
                ticker.tick().await;
                if shared.load(Ordering::SeqCst) != RUNNING {
                    return;
                }
                remaining -= 1;
                on_tick(remaining);
            }

            if shared
                .compare_exchange(RUNNING, EXPIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                on_expire();
            }
        });

        Self {
            state,
            task: Some(task),
        }
    }

    /// Stop the countdown.  Returns `true` when this call prevented the
    /// expiry; `false` if the timer had already expired or been cancelled.
    pub fn cancel(&mut self) -> bool {
        let prevented = self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        prevented
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn has_expired(&self) -> bool {
        self.state.load(Ordering::SeqCst) == EXPIRED
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn counters() -> (Arc<Mutex<Vec<u64>>>, Arc<AtomicUsize>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicUsize::new(0)))
    }

    fn start_counting(
        secs: u64,
        ticks: &Arc<Mutex<Vec<u64>>>,
        expiries: &Arc<AtomicUsize>,
    ) -> SessionTimer {
        let ticks = Arc::clone(ticks);
        let expiries = Arc::clone(expiries);
        SessionTimer::start(
            secs,
            move |remaining| ticks.lock().unwrap().push(remaining),
            move || {
                expiries.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn two_second_timer_ticks_then_fires_once() {
        let (ticks, expiries) = counters();
        let mut timer = start_counting(2, &ticks, &expiries);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(*ticks.lock().unwrap(), vec![1]);
        assert_eq!(expiries.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*ticks.lock().unwrap(), vec![1, 0]);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert!(timer.has_expired());

        // Cancelling after expiry neither re-fires nor reports success.
        assert!(!timer.cancel());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_expiry_prevents_fire() {
        let (ticks, expiries) = counters();
        let mut timer = start_counting(3, &ticks, &expiries);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(timer.cancel());
        assert!(!timer.is_running());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*ticks.lock().unwrap(), vec![2]);
        assert_eq!(expiries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hundred_twenty_second_session_expires_at_last_tick() {
        let (ticks, expiries) = counters();
        let _timer = start_counting(120, &ticks, &expiries);

        tokio::time::sleep(Duration::from_millis(119_500)).await;
        assert_eq!(ticks.lock().unwrap().len(), 119);
        assert_eq!(expiries.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.lock().unwrap().len(), 120);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_expires_without_ticks() {
        let (ticks, expiries) = counters();
        let _timer = start_counting(0, &ticks, &expiries);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(ticks.lock().unwrap().is_empty());
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_timer_cancels_it() {
        let (ticks, expiries) = counters();
        drop(start_counting(1, &ticks, &expiries));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(expiries.load(Ordering::SeqCst), 0);
    }
}
