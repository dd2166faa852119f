//! Constructors that build promises out of values and other promises.
//!
//! None of these reach into another promise's state: they are written purely
//! against `then` and a fresh promise's resolver.
use std::cell::RefCell;
use std::rc::Rc;

use crate::promise::Promise;
use crate::scheduler::{share, Scheduler};
use crate::thenable::Resolution;
use crate::Error;

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Wraps `value` in a promise.
    ///
    /// A promise is returned as-is, not re-wrapped. A thenable is adopted.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_then::{Promise, TaskQueue};
    ///
    /// let queue = TaskQueue::new();
    /// let inner = Promise::<i32, String>::fulfilled(&queue, 5);
    /// let outer = Promise::<i32, String>::resolve(&queue, inner.clone());
    /// assert!(outer.ptr_eq(&inner));
    /// ```
    pub fn resolve<S, R>(scheduler: &S, value: R) -> Self
    where
        S: Scheduler + Clone + 'static,
        R: Into<Resolution<T, E>>,
    {
        match value.into() {
            Resolution::Promise(promise) => promise,
            resolution => Promise::new(scheduler, |resolver| resolver.resolve_with(resolution)),
        }
    }

    pub fn fulfilled<S>(scheduler: &S, value: T) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Promise::new(scheduler, |resolver| resolver.resolve(value))
    }

    /// A promise rejected with `reason`.
    ///
    /// Unlike [`Promise::resolve`], the reason is never unwrapped, even when
    /// `E` is itself a promise type.
    pub fn reject<S>(scheduler: &S, reason: E) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Promise::new(scheduler, |resolver| resolver.reject(reason))
    }

    /// Fulfills with every item's value, in input order, once all of them
    /// fulfilled. Rejects with the first rejection observed.
    ///
    /// Fails with [`Error::NotASequence`] if `items` is endless, such as
    /// `iter::repeat`. Any finite iterator is accepted, whether or not it
    /// knows its length up front.
    pub fn all<S, I>(scheduler: &S, items: I) -> Result<Promise<Vec<T>, E>, Error>
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let scheduler = share(scheduler);
        let promises = wrap_each(&scheduler, items)?;
        Ok(Promise::new_in(scheduler, move |resolver| {
            if promises.is_empty() {
                resolver.resolve(Vec::new());
                return;
            }
            let slots = Rc::new(RefCell::new(Slots::new(promises.len())));
            for (index, promise) in promises.iter().enumerate() {
                let slots = slots.clone();
                let (fulfilling, rejecting) = (resolver.clone(), resolver.clone());
                promise.then(
                    move |value| {
                        let filled = slots.borrow_mut().fill(index, value);
                        if let Some(values) = filled {
                            fulfilling.resolve(values);
                        }
                        Ok(Resolution::Value(()))
                    },
                    move |reason| {
                        rejecting.reject(reason);
                        Ok(Resolution::Value(()))
                    },
                );
            }
        }))
    }

    /// Adopts the outcome of whichever item settles first. Stays pending
    /// forever when `items` is empty.
    pub fn race<S, I>(scheduler: &S, items: I) -> Result<Promise<T, E>, Error>
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let scheduler = share(scheduler);
        let promises = wrap_each(&scheduler, items)?;
        Ok(Promise::new_in(scheduler, move |resolver| {
            for promise in &promises {
                let (fulfilling, rejecting) = (resolver.clone(), resolver.clone());
                promise.then(
                    move |value| {
                        fulfilling.resolve(value);
                        Ok(Resolution::Value(()))
                    },
                    move |reason| {
                        rejecting.reject(reason);
                        Ok(Resolution::Value(()))
                    },
                );
            }
        }))
    }

    /// Fulfills with every item's outcome, in input order, once all of them
    /// settled. Never rejects.
    pub fn all_settled<S, I>(
        scheduler: &S,
        items: I,
    ) -> Result<Promise<Vec<Result<T, E>>, E>, Error>
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let scheduler = share(scheduler);
        let promises = wrap_each(&scheduler, items)?;
        Ok(Promise::new_in(scheduler, move |resolver| {
            if promises.is_empty() {
                resolver.resolve(Vec::new());
                return;
            }
            let slots = Rc::new(RefCell::new(Slots::new(promises.len())));
            for (index, promise) in promises.iter().enumerate() {
                let (on_value, on_reason) = (slots.clone(), slots.clone());
                let (fulfilling, also_fulfilling) = (resolver.clone(), resolver.clone());
                promise.then(
                    move |value| {
                        let filled = on_value.borrow_mut().fill(index, Ok(value));
                        if let Some(outcomes) = filled {
                            fulfilling.resolve(outcomes);
                        }
                        Ok(Resolution::Value(()))
                    },
                    move |reason| {
                        let filled = on_reason.borrow_mut().fill(index, Err(reason));
                        if let Some(outcomes) = filled {
                            also_fulfilling.resolve(outcomes);
                        }
                        Ok(Resolution::Value(()))
                    },
                );
            }
        }))
    }

    pub(crate) fn resolve_in<R>(scheduler: &Rc<dyn Scheduler>, value: R) -> Self
    where
        R: Into<Resolution<T, E>>,
    {
        match value.into() {
            Resolution::Promise(promise) => promise,
            resolution => {
                Promise::new_in(scheduler.clone(), |resolver| resolver.resolve_with(resolution))
            }
        }
    }
}

fn wrap_each<T, E, I>(
    scheduler: &Rc<dyn Scheduler>,
    items: I,
) -> Result<Vec<Promise<T, E>>, Error>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    let items = items.into_iter();
    // No finite iterator can hold `usize::MAX` items; only endless ones claim to.
    if items.size_hint().0 == usize::MAX {
        return Err(Error::NotASequence);
    }
    Ok(items.map(|item| Promise::resolve_in(scheduler, item)).collect())
}

/// Index-addressed results of a fan-in.
struct Slots<V> {
    values: Vec<Option<V>>,
    remaining: usize,
}

impl<V> Slots<V> {
    fn new(len: usize) -> Self {
        Slots {
            values: (0..len).map(|_| None).collect(),
            remaining: len,
        }
    }

    /// Stores `value` at `index`; hands back every value once all slots are
    /// filled.
    fn fill(&mut self, index: usize, value: V) -> Option<Vec<V>> {
        if self.values[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        Some(self.values.drain(..).flatten().collect())
    }
}
