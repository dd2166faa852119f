//! The settlement state machine and the `then` chaining engine.
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use log::{debug, trace, warn};

use crate::scheduler::{share, Scheduler};
use crate::thenable::{Reaction, Resolution, Thenable};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// A value, or a failure, that will exist later.
///
/// `Promise` is a handle: clones share one state. Settlement callbacks are
/// never run on the caller's stack; they are handed to the scheduler the
/// promise was created with.
pub struct Promise<T: 'static, E: 'static> {
    inner: Rc<RefCell<Inner<T, E>>>,
    // Live resolvers. Kept outside `inner` so a resolver dropped while the
    // state is borrowed is still counted.
    resolvers: Rc<Cell<usize>>,
    scheduler: Rc<dyn Scheduler>,
}

struct Inner<T: 'static, E: 'static> {
    outcome: Option<Result<T, E>>,
    // Set by the first resolve/reject, before an adopted thenable settles.
    locked: bool,
    on_fulfilled: VecDeque<Box<dyn FnOnce(T)>>,
    on_rejected: VecDeque<Box<dyn FnOnce(E)>>,
    wakers: Vec<Waker>,
}

impl<T: 'static, E: 'static> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
            resolvers: self.resolvers.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

thread_local! {
    // Callback queues of promises freed while an outer teardown is running.
    static TEARDOWN: RefCell<Option<Vec<Box<dyn Any>>>> = RefCell::new(None);
}

/// Drops `callbacks` without recursing into the promises they keep alive.
///
/// A queued callback owns the resolver of the promise derived from it, so
/// freeing one pending promise can free the next one down the chain. Nested
/// frees hand their queues to the outermost one, which drops them in a loop.
fn tear_down(callbacks: Box<dyn Any>) {
    let outermost = TEARDOWN.try_with(move |pending| {
        let mut pending = pending.borrow_mut();
        match pending.as_mut() {
            Some(pending) => {
                pending.push(callbacks);
                None
            }
            None => {
                *pending = Some(Vec::new());
                Some(callbacks)
            }
        }
    });
    let mut next = match outermost {
        Ok(next) => next,
        // Thread-local storage is gone: nothing left to defer to.
        Err(_) => return,
    };
    let mut freed = 0;
    while let Some(callbacks) = next {
        drop(callbacks);
        freed += 1;
        next = TEARDOWN.with(|pending| pending.borrow_mut().as_mut().and_then(Vec::pop));
    }
    TEARDOWN.with(|pending| pending.borrow_mut().take());
    if freed > 1 {
        trace!("tore down {} pending promises", freed);
    }
}

impl<T: 'static, E: 'static> Drop for Inner<T, E> {
    fn drop(&mut self) {
        if self.on_fulfilled.is_empty() && self.on_rejected.is_empty() {
            return;
        }
        let queues = (mem::take(&mut self.on_fulfilled), mem::take(&mut self.on_rejected));
        tear_down(Box::new(queues));
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Creates a promise and runs `executor` with its resolver right away.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_then::{Promise, PromiseState, TaskQueue};
    ///
    /// let queue = TaskQueue::new();
    /// let promise = Promise::<&str, String>::new(&queue, |resolver| {
    ///     resolver.resolve("🍓");
    ///     resolver.reject("too late".into());
    /// });
    /// assert_eq!(promise.state(), PromiseState::Fulfilled);
    /// assert_eq!(promise.value(), Some(Ok("🍓")));
    /// ```
    pub fn new<S, F>(scheduler: &S, executor: F) -> Self
    where
        S: Scheduler + Clone + 'static,
        F: FnOnce(Resolver<T, E>),
    {
        Promise::new_in(share(scheduler), executor)
    }

    /// A pending promise together with the resolver that settles it.
    pub fn pending<S>(scheduler: &S) -> (Self, Resolver<T, E>)
    where
        S: Scheduler + Clone + 'static,
    {
        Promise::pending_in(share(scheduler))
    }

    pub(crate) fn new_in<F>(scheduler: Rc<dyn Scheduler>, executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let (promise, resolver) = Promise::pending_in(scheduler);
        executor(resolver);
        promise
    }

    pub(crate) fn pending_in(scheduler: Rc<dyn Scheduler>) -> (Self, Resolver<T, E>) {
        let promise = Promise {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                locked: false,
                on_fulfilled: VecDeque::new(),
                on_rejected: VecDeque::new(),
                wakers: Vec::new(),
            })),
            resolvers: Rc::new(Cell::new(0)),
            scheduler,
        };
        let resolver = Resolver::new(promise.clone());
        (promise, resolver)
    }

    pub fn state(&self) -> PromiseState {
        match self.inner.borrow().outcome {
            None => PromiseState::Pending,
            Some(Ok(_)) => PromiseState::Fulfilled,
            Some(Err(_)) => PromiseState::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// The settled value or reason, `None` while pending.
    pub fn value(&self) -> Option<Result<T, E>> {
        self.inner.borrow().outcome.clone()
    }

    /// Whether both handles point at the same promise.
    pub fn ptr_eq(&self, other: &Promise<T, E>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Derives a promise settled by whichever handler matches this promise's
    /// outcome.
    ///
    /// A handler returning `Err` rejects the derived promise. A handler
    /// returning a promise or thenable makes the derived promise adopt it.
    /// Neither handler runs before `then` returns, even when this promise has
    /// already settled.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Reaction<U, E> + 'static,
        R: FnOnce(E) -> Reaction<U, E> + 'static,
    {
        Promise::new_in(self.scheduler.clone(), |resolver| {
            let rejecting = resolver.clone();
            self.register(
                Box::new(move |value| resolver.react(on_fulfilled(value))),
                Box::new(move |reason| rejecting.react(on_rejected(reason))),
            );
        })
    }

    /// `then` without a rejection handler: rejections pass through unchanged.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Reaction<U, E> + 'static,
    {
        self.then(on_fulfilled, |reason| Err(reason))
    }

    /// `then` without a success handler: values pass through unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Reaction<T, E> + 'static,
    {
        self.then(|value| Ok(Resolution::Value(value)), on_rejected)
    }

    /// Runs `on_settled` once this promise settles, whatever the outcome.
    ///
    /// The derived promise keeps this promise's value or reason. It only
    /// takes `on_settled`'s outcome when that is a failure: an `Err`, or a
    /// returned promise that rejects. A returned promise that fulfills is
    /// waited for first.
    pub fn finally<X, F>(&self, on_settled: F) -> Promise<T, E>
    where
        X: Clone + 'static,
        F: FnOnce() -> Reaction<X, E> + 'static,
    {
        let on_success = Rc::new(Cell::new(Some(on_settled)));
        let on_failure = on_success.clone();
        let success_scheduler = self.scheduler.clone();
        let failure_scheduler = self.scheduler.clone();
        self.then(
            move |value| match on_success.take().map(|callback| callback()) {
                Some(Err(reason)) => Err(reason),
                Some(Ok(Resolution::Value(_))) | None => Ok(Resolution::Value(value)),
                Some(Ok(waiting)) => Ok(Resolution::Promise(
                    Promise::resolve_in(&success_scheduler, waiting)
                        .and_then(move |_| Ok(Resolution::Value(value))),
                )),
            },
            move |reason| match on_failure.take().map(|callback| callback()) {
                Some(Err(overriding)) => Err(overriding),
                Some(Ok(Resolution::Value(_))) | None => Err(reason),
                Some(Ok(waiting)) => Ok(Resolution::Promise(
                    Promise::resolve_in(&failure_scheduler, waiting).and_then(move |_| Err(reason)),
                )),
            },
        )
    }

    /// A future yielding this promise's outcome once it settles.
    ///
    /// Polling does not drive the scheduler. Drive it alongside, for example
    /// by using a `LocalPool`'s spawner as the scheduler.
    pub fn settled(&self) -> Settled<T, E> {
        Settled {
            promise: self.clone(),
        }
    }

    fn register(&self, on_fulfilled: Box<dyn FnOnce(T)>, on_rejected: Box<dyn FnOnce(E)>) {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            match inner.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    inner.on_fulfilled.push_back(on_fulfilled);
                    inner.on_rejected.push_back(on_rejected);
                    return;
                }
            }
        };
        match outcome {
            Ok(value) => self.scheduler.schedule(Box::new(move || on_fulfilled(value))),
            Err(reason) => self.scheduler.schedule(Box::new(move || on_rejected(reason))),
        }
    }

    fn lock(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        !mem::replace(&mut inner.locked, true)
    }

    fn settle(&self, outcome: Result<T, E>) {
        let wakers = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return;
            }
            inner.locked = true;
            inner.outcome = Some(outcome);
            mem::take(&mut inner.wakers)
        };
        trace!("promise settled as {:?}", self.state());
        for waker in wakers {
            waker.wake();
        }
        let promise = self.clone();
        self.scheduler.schedule(Box::new(move || promise.drain()));
    }

    fn drain(&self) {
        let outcome = self.inner.borrow().outcome.clone();
        let drained = match outcome {
            Some(Ok(value)) => {
                let discarded = mem::take(&mut self.inner.borrow_mut().on_rejected);
                drop(discarded);
                let mut drained = 0;
                loop {
                    let callback = self.inner.borrow_mut().on_fulfilled.pop_front();
                    match callback {
                        Some(callback) => callback(value.clone()),
                        None => break,
                    }
                    drained += 1;
                }
                drained
            }
            Some(Err(reason)) => {
                let discarded = mem::take(&mut self.inner.borrow_mut().on_fulfilled);
                drop(discarded);
                let mut drained = 0;
                loop {
                    let callback = self.inner.borrow_mut().on_rejected.pop_front();
                    match callback {
                        Some(callback) => callback(reason.clone()),
                        None => break,
                    }
                    drained += 1;
                }
                drained
            }
            None => return,
        };
        trace!("drained {} callbacks", drained);
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(T)>,
        on_rejected: Box<dyn FnOnce(E)>,
    ) {
        self.register(on_fulfilled, on_rejected)
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<Result<T, E>, Error>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Settled<T, E> {
        Settled { promise: self }
    }
}

impl<T: fmt::Debug + 'static, E: fmt::Debug + 'static> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Promise")
                .field("outcome", &inner.outcome)
                .field("locked", &inner.locked)
                .finish(),
            Err(_) => f.write_str("Promise { <borrowed> }"),
        }
    }
}

/// Settles one promise. Only the first resolve or reject has any effect.
///
/// Dropping every resolver of a promise that has not settled leaves it
/// pending for good; futures waiting on it then yield [`Error::Abandoned`].
pub struct Resolver<T: 'static, E: 'static> {
    promise: Promise<T, E>,
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn new(promise: Promise<T, E>) -> Self {
        promise.resolvers.set(promise.resolvers.get() + 1);
        Resolver { promise }
    }

    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value))
    }

    /// Resolves with a value, or adopts the outcome of a promise or thenable.
    pub fn resolve_with<R>(&self, resolution: R)
    where
        R: Into<Resolution<T, E>>,
    {
        if !self.promise.lock() {
            trace!("ignoring resolve of an already resolved promise");
            return;
        }
        match resolution.into() {
            Resolution::Value(value) => self.promise.settle(Ok(value)),
            Resolution::Promise(other) if other.ptr_eq(&self.promise) => {
                warn!("promise resolved with itself, it will never settle");
            }
            Resolution::Promise(other) => self.adopt(Box::new(other)),
            Resolution::Thenable(thenable) => self.adopt(thenable),
        }
    }

    /// Rejects with `reason` as-is; a promise passed as the reason is not
    /// unwrapped.
    pub fn reject(&self, reason: E) {
        if !self.promise.lock() {
            trace!("ignoring reject of an already resolved promise");
            return;
        }
        self.promise.settle(Err(reason));
    }

    pub fn settle(&self, outcome: Result<T, E>) {
        match outcome {
            Ok(value) => self.resolve(value),
            Err(reason) => self.reject(reason),
        }
    }

    pub(crate) fn react(&self, reaction: Reaction<T, E>) {
        match reaction {
            Ok(resolution) => self.resolve_with(resolution),
            Err(reason) => self.reject(reason),
        }
    }

    fn adopt(&self, thenable: Box<dyn Thenable<T, E>>) {
        let (fulfilling, rejecting) = (self.clone(), self.clone());
        self.promise.scheduler.schedule(Box::new(move || {
            thenable.subscribe(
                Box::new(move |value| fulfilling.promise.settle(Ok(value))),
                Box::new(move |reason| rejecting.promise.settle(Err(reason))),
            )
        }));
    }
}

impl<T: 'static, E: 'static> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        let resolvers = &self.promise.resolvers;
        resolvers.set(resolvers.get() + 1);
        Resolver {
            promise: self.promise.clone(),
        }
    }
}

impl<T: 'static, E: 'static> Drop for Resolver<T, E> {
    fn drop(&mut self) {
        let resolvers = &self.promise.resolvers;
        resolvers.set(resolvers.get() - 1);
        if resolvers.get() > 0 {
            return;
        }
        let wakers = match self.promise.inner.try_borrow_mut() {
            Ok(inner) if inner.outcome.is_some() => return,
            Ok(mut inner) => mem::take(&mut inner.wakers),
            Err(_) => {
                debug!("last resolver dropped while its promise was borrowed, waiters not woken");
                return;
            }
        };
        debug!("every resolver of a pending promise was dropped");
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T: fmt::Debug + 'static, E: fmt::Debug + 'static> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("promise", &self.promise).finish()
    }
}

/// Future returned by [`Promise::settled`].
#[derive(Debug)]
pub struct Settled<T: 'static, E: 'static> {
    promise: Promise<T, E>,
}

impl<T, E> Future for Settled<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<Result<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.promise.inner.borrow_mut();
        if let Some(outcome) = inner.outcome.clone() {
            return Poll::Ready(Ok(outcome));
        }
        if self.promise.resolvers.get() == 0 {
            return Poll::Ready(Err(Error::Abandoned));
        }
        let waker = cx.waker();
        if !inner.wakers.iter().any(|known| known.will_wake(waker)) {
            inner.wakers.push(waker.clone());
        }
        Poll::Pending
    }
}
