//! The "run this later" primitive promises defer their callbacks through.
//!
//! A promise never runs a settlement callback on the stack that caused the
//! settlement. It hands a [`Task`] to its [`Scheduler`] instead, and the host
//! decides when the task runs. Two hosts are provided: [`TaskQueue`], a
//! deterministic FIFO queue you drain by hand, and `futures`'
//! [`LocalSpawner`], which runs tasks as part of a `LocalPool`.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;
use log::{debug, trace, warn};

use crate::options::Options;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks after the current synchronous execution unwinds.
///
/// Implementations must run tasks submitted through the same scheduler in
/// submission order.
pub trait Scheduler {
    fn schedule(&self, task: Task);
}

pub(crate) fn share<S>(scheduler: &S) -> Rc<dyn Scheduler>
where
    S: Scheduler + Clone + 'static,
{
    Rc::new(scheduler.clone())
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}

impl Scheduler for LocalSpawner {
    fn schedule(&self, task: Task) {
        if let Err(err) = self.spawn_local(async move { task() }) {
            warn!("dropping promise task, local pool is gone: {}", err);
        }
    }
}

/// A FIFO task queue drained explicitly by its owner.
///
/// Cloning a `TaskQueue` clones the handle; every clone feeds the same queue.
///
/// # Examples
///
/// ```
/// use promise_then::{Promise, Resolution, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let doubled = Promise::<i32, String>::fulfilled(&queue, 21)
///     .and_then(|v| Ok(Resolution::Value(v * 2)));
/// assert!(doubled.is_pending());
/// queue.run_until_stalled();
/// assert_eq!(doubled.value(), Some(Ok(42)));
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    shared: Rc<Shared>,
}

struct Shared {
    tasks: RefCell<VecDeque<Task>>,
    options: Options,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue::with_options(Options::new())
    }

    pub fn with_options(options: Options) -> TaskQueue {
        TaskQueue {
            shared: Rc::new(Shared {
                tasks: RefCell::new(VecDeque::with_capacity(options.capacity)),
                options,
            }),
        }
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.shared.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.tasks.borrow().is_empty()
    }

    /// Runs the oldest task. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        // Release the borrow before running: the task may schedule more tasks.
        let task = self.shared.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including the ones they schedule, until the queue is empty
    /// or the `max_tasks_per_run` budget is used up. Returns how many ran.
    pub fn run_until_stalled(&self) -> usize {
        let budget = self.shared.options.max_tasks_per_run;
        let mut ran = 0;
        while budget.map_or(true, |budget| ran < budget) && self.run_next() {
            ran += 1;
        }
        if budget == Some(ran) && !self.is_empty() {
            debug!(
                "task queue {} hit its budget of {} with {} tasks left",
                self.display_name(),
                ran,
                self.len()
            );
        }
        trace!("task queue {} ran {} tasks", self.display_name(), ran);
        ran
    }

    fn display_name(&self) -> &str {
        self.shared.options.name.as_deref().unwrap_or("<unnamed>")
    }
}

impl Default for TaskQueue {
    fn default() -> TaskQueue {
        TaskQueue::new()
    }
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task) {
        self.shared.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.shared.options.name)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;

    #[test]
    fn test_task_queue_runs_in_submission_order() {
        let queue = TaskQueue::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            queue.schedule(Box::new(move || seen.borrow_mut().push(i)));
        }
        assert_eq!(queue.len(), 5);
        assert!(seen.borrow().is_empty());
        assert_eq!(queue.run_until_stalled(), 5);
        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_task_queue_runs_nested_tasks_after_current() {
        let queue = TaskQueue::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (inner_queue, inner_seen) = (queue.clone(), seen.clone());
        queue.schedule(Box::new(move || {
            let nested_seen = inner_seen.clone();
            inner_queue.schedule(Box::new(move || nested_seen.borrow_mut().push("nested")));
            inner_seen.borrow_mut().push("outer");
        }));
        let tail_seen = seen.clone();
        queue.schedule(Box::new(move || tail_seen.borrow_mut().push("tail")));
        queue.run_until_stalled();
        assert_eq!(*seen.borrow(), vec!["outer", "tail", "nested"]);
    }

    #[test]
    fn test_task_queue_budget() {
        let mut opts = Options::new();
        opts.name("budgeted".into()).max_tasks_per_run(2);
        let queue = TaskQueue::with_options(opts);
        for _ in 0..3 {
            queue.schedule(Box::new(|| {}));
        }
        assert_eq!(queue.run_until_stalled(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_until_stalled(), 1);
        assert!(!queue.run_next());
    }

    #[test]
    fn test_local_spawner_runs_tasks() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            spawner.schedule(Box::new(move || seen.borrow_mut().push(i)));
        }
        assert!(seen.borrow().is_empty());
        pool.run_until_stalled();
        let mut seen = seen.borrow().clone();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
