//! Background Prefetches
//!
//! Speculative fetches run as tasks on a single local executor owned by
//! the engine. Starting one never waits on the network; the host drives
//! the tasks from its event loop with [`Background::poll`], or awaits
//! [`Background::run_until_idle`] when it can afford to wait.

use crate::executor::PrefetchOutcome;
use smol::{LocalExecutor, Task};
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use tracing::trace;

/// Executor for prefetch tasks
pub struct Background {
    ex: Rc<LocalExecutor<'static>>,
    /// Handles of spawned tasks; dropping one cancels it
    running: RefCell<Vec<Task<()>>>,
    /// Outcomes of finished tasks not yet collected
    finished: Rc<RefCell<Vec<PrefetchOutcome>>>,
}

impl Background {
    pub fn new() -> Self {
        Self {
            ex: Rc::new(LocalExecutor::new()),
            running: RefCell::new(Vec::new()),
            finished: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn executor(&self) -> &Rc<LocalExecutor<'static>> {
        &self.ex
    }

    /// Queue a prefetch. It makes progress whenever the executor is driven.
    pub fn spawn(&self, fut: impl Future<Output = PrefetchOutcome> + 'static) {
        let finished = Rc::clone(&self.finished);
        let task = self.ex.spawn(async move {
            let outcome = fut.await;
            finished.borrow_mut().push(outcome);
        });
        self.running.borrow_mut().push(task);
    }

    /// Tasks spawned and not yet finished
    pub fn running(&self) -> usize {
        let mut running = self.running.borrow_mut();
        running.retain(|task| !task.is_finished());
        running.len()
    }

    pub fn is_idle(&self) -> bool {
        self.running() == 0
    }

    /// Run every task that can make progress without waiting, then collect
    /// the outcomes of those that finished
    pub fn poll(&self) -> Vec<PrefetchOutcome> {
        let mut steps = 0usize;
        while self.ex.try_tick() {
            steps += 1;
        }
        trace!(steps, "background poll");
        self.running();
        self.take_finished()
    }

    /// Drive `fut` to completion, running background tasks while it waits
    pub async fn drive<T>(&self, fut: impl Future<Output = T>) -> T {
        self.ex.run(fut).await
    }

    /// Drive every task to completion and collect their outcomes
    pub async fn run_until_idle(&self) -> Vec<PrefetchOutcome> {
        loop {
            let tasks = std::mem::take(&mut *self.running.borrow_mut());
            if tasks.is_empty() {
                break;
            }
            self.ex
                .run(async move {
                    for task in tasks {
                        task.await;
                    }
                })
                .await;
        }
        self.take_finished()
    }

    fn take_finished(&self) -> Vec<PrefetchOutcome> {
        std::mem::take(&mut *self.finished.borrow_mut())
    }
}

impl Default for Background {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SkipReason;

    fn skipped(url: &str) -> PrefetchOutcome {
        PrefetchOutcome::Skipped {
            url: url.to_string(),
            reason: SkipReason::AlreadyCached,
        }
    }

    #[test]
    fn test_spawn_does_not_run_until_driven() {
        let bg = Background::new();
        bg.spawn(async { skipped("/a") });
        assert_eq!(bg.running(), 1);

        let outcomes = bg.poll();
        assert_eq!(outcomes, vec![skipped("/a")]);
        assert!(bg.is_idle());
    }

    #[test]
    fn test_poll_leaves_waiting_tasks_running() {
        let bg = Background::new();
        let (tx, rx) = smol::channel::bounded::<()>(1);
        bg.spawn(async move {
            let _ = rx.recv().await;
            skipped("/later")
        });
        bg.spawn(async { skipped("/now") });

        assert_eq!(bg.poll(), vec![skipped("/now")]);
        assert_eq!(bg.running(), 1);

        drop(tx);
        let outcomes = smol::block_on(bg.run_until_idle());
        assert_eq!(outcomes, vec![skipped("/later")]);
        assert!(bg.is_idle());
    }

    #[test]
    fn test_drive_returns_without_waiting_for_tasks() {
        let bg = Background::new();
        bg.spawn(async {
            smol::future::pending::<()>().await;
            skipped("/never")
        });

        let value = smol::block_on(bg.drive(async { 7 }));
        assert_eq!(value, 7);
        assert_eq!(bg.running(), 1);
    }
}
