#![allow(dead_code)]
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use promise_then::{Promise, Task, TaskQueue};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Virtual milliseconds on top of a `TaskQueue`. Timers fire in deadline
/// order; the task queue is drained between timers.
#[derive(Clone, Default)]
pub struct Clock {
    inner: Rc<ClockInner>,
}

#[derive(Default)]
struct ClockInner {
    queue: TaskQueue,
    now: Cell<u64>,
    seq: Cell<u64>,
    timers: RefCell<BTreeMap<(u64, u64), Task>>,
}

impl Clock {
    pub fn new() -> Clock {
        init_logger();
        Clock::default()
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    pub fn now(&self) -> u64 {
        self.inner.now.get()
    }

    pub fn after(&self, ms: u64, task: Task) {
        let seq = self.inner.seq.get();
        self.inner.seq.set(seq + 1);
        self.inner.timers.borrow_mut().insert((self.now() + ms, seq), task);
    }

    pub fn delayed_resolve<T, E>(&self, ms: u64, value: T) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let (promise, resolver) = Promise::pending(self.queue());
        self.after(ms, Box::new(move || resolver.resolve(value)));
        promise
    }

    pub fn delayed_reject<T, E>(&self, ms: u64, reason: E) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let (promise, resolver) = Promise::pending(self.queue());
        self.after(ms, Box::new(move || resolver.reject(reason)));
        promise
    }

    /// Runs queued tasks and every timer due at or before `deadline`.
    pub fn run_until(&self, deadline: u64) {
        loop {
            self.inner.queue.run_until_stalled();
            let due = {
                let mut timers = self.inner.timers.borrow_mut();
                let next_at = timers.first_key_value().map(|(&(at, _), _)| at);
                match next_at {
                    Some(at) if at <= deadline => timers.pop_first(),
                    _ => None,
                }
            };
            match due {
                Some(((at, _), task)) => {
                    self.inner.now.set(at);
                    task();
                }
                None => break,
            }
        }
        if deadline != u64::MAX && self.now() < deadline {
            self.inner.now.set(deadline);
        }
    }

    /// Runs until no task and no timer is left.
    pub fn run(&self) {
        self.run_until(u64::MAX);
    }
}
