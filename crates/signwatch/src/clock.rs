//! Time source for the watch loop.
//!
//! Every sleep the loop performs (stability re-read, idle between polls) goes
//! through [`Clock`], so tests can advance time without waiting on it.

use chrono::{DateTime, Local};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub trait Clock {
    /// Current local time; used for discovery stamps and collision suffixes.
    fn now(&self) -> DateTime<Local>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `chrono::Local` and `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

type SleepHook = Box<dyn FnMut(Duration) + Send>;

/// Deterministic clock: `sleep` returns immediately and advances `now`.
///
/// An optional hook runs on every sleep, which lets a test change the
/// filesystem "while" the loop is waiting.
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
    sleeps: Mutex<Vec<Duration>>,
    on_sleep: Mutex<Option<SleepHook>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
            on_sleep: Mutex::new(None),
        }
    }

    /// Install a hook run after each simulated sleep, replacing any previous one.
    pub fn on_sleep(&self, hook: impl FnMut(Duration) + Send + 'static) {
        *lock(&self.on_sleep) = Some(Box::new(hook));
    }

    pub fn clear_hook(&self) {
        *lock(&self.on_sleep) = None;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }

    pub fn total_slept(&self) -> Duration {
        lock(&self.sleeps).iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        {
            let delta = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
            let mut now = lock(&self.now);
            *now = *now + delta;
        }
        if let Some(hook) = lock(&self.on_sleep).as_mut() {
            hook(duration);
        }
    }
}

// A panicking hook must not wedge every later call in the same test.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
