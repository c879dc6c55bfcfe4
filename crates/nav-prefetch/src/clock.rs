//! Time Source
//!
//! Millisecond clocks. The engine never reads wall time directly, so
//! trigger delays, pattern recency, cache expiry and request timeouts can
//! be driven deterministically from tests or a trace replay.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Milliseconds since the clock's origin
pub type Millis = u64;

/// Future returned by [`Clock::sleep_until`]
pub type Sleep = Pin<Box<dyn Future<Output = ()>>>;

/// Monotonic millisecond time source
pub trait Clock {
    fn now_ms(&self) -> Millis;

    /// Resolves once `now_ms() >= deadline`
    fn sleep_until(&self, deadline: Millis) -> Sleep;
}

/// Clock backed by `Instant`, starting at zero when created
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }

    fn sleep_until(&self, deadline: Millis) -> Sleep {
        let at = self.origin + Duration::from_millis(deadline);
        Box::pin(async move {
            smol::Timer::at(at).await;
        })
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: Cell<Millis>,
    next_id: Cell<u64>,
    /// Parked sleeps: (id, deadline, waker)
    sleepers: RefCell<Vec<(u64, Millis, Waker)>>,
}

impl ManualState {
    fn wake_due(&self) {
        let now = self.now.get();
        let due: Vec<Waker> = {
            let mut sleepers = self.sleepers.borrow_mut();
            let mut due = Vec::new();
            sleepers.retain(|(_, deadline, waker)| {
                if *deadline <= now {
                    due.push(waker.clone());
                    false
                } else {
                    true
                }
            });
            due
        };
        for waker in due {
            waker.wake();
        }
    }
}

/// Manually advanced clock. Clones share the same current time, and
/// pending sleeps wake when `set` or `advance` passes their deadline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Rc<ManualState>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        let clock = Self::default();
        clock.state.now.set(start);
        clock
    }

    /// Jump to an absolute time
    pub fn set(&self, now: Millis) {
        self.state.now.set(now);
        self.state.wake_due();
    }

    /// Move time forward
    pub fn advance(&self, ms: Millis) {
        self.set(self.state.now.get().saturating_add(ms));
    }

    /// Sleeps still waiting for their deadline
    pub fn sleepers(&self) -> usize {
        self.state.sleepers.borrow().len()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.state.now.get()
    }

    fn sleep_until(&self, deadline: Millis) -> Sleep {
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);
        Box::pin(ManualSleep {
            state: Rc::clone(&self.state),
            id,
            deadline,
        })
    }
}

struct ManualSleep {
    state: Rc<ManualState>,
    id: u64,
    deadline: Millis,
}

impl Future for ManualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.now.get() >= self.deadline {
            return Poll::Ready(());
        }
        let (me, deadline) = (self.id, self.deadline);
        let mut sleepers = self.state.sleepers.borrow_mut();
        match sleepers.iter_mut().find(|(id, _, _)| *id == me) {
            Some(entry) => entry.2.clone_from(cx.waker()),
            None => sleepers.push((me, deadline, cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl Drop for ManualSleep {
    fn drop(&mut self) {
        if let Ok(mut sleepers) = self.state.sleepers.try_borrow_mut() {
            sleepers.retain(|(id, _, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100);
        let other = clock.clone();

        clock.advance(50);
        assert_eq!(other.now_ms(), 150);

        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_sleep_wakes_on_advance() {
        let clock = ManualClock::new(0);
        let woke = Rc::new(Cell::new(false));

        let sleeper = {
            let clock = clock.clone();
            let woke = Rc::clone(&woke);
            async move {
                clock.sleep_until(100).await;
                woke.set(true);
            }
        };
        let driver = {
            let clock = clock.clone();
            async move {
                smol::future::yield_now().await;
                clock.advance(60);
                smol::future::yield_now().await;
                assert_eq!(clock.sleepers(), 1);
                clock.advance(40);
            }
        };

        smol::block_on(smol::future::zip(sleeper, driver));
        assert!(woke.get());
        assert_eq!(clock.sleepers(), 0);
    }

    #[test]
    fn test_past_deadline_is_ready() {
        let clock = ManualClock::new(500);
        smol::block_on(clock.sleep_until(200));
        assert_eq!(clock.sleepers(), 0);
    }

    #[test]
    fn test_dropped_sleep_unregisters() {
        let clock = ManualClock::new(0);
        let mut sleep = clock.sleep_until(10);
        let polled = smol::block_on(smol::future::poll_once(&mut sleep));
        assert!(polled.is_none());
        assert_eq!(clock.sleepers(), 1);

        drop(sleep);
        assert_eq!(clock.sleepers(), 0);
    }
}
