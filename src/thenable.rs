use std::fmt;

use crate::promise::Promise;

/// A promise-like value that can report its eventual outcome.
///
/// Resolving a promise with a thenable makes the promise adopt the thenable's
/// outcome instead of settling to the thenable itself. `Promise` implements
/// this trait; foreign deferred values can too.
///
/// An implementation should call at most one of the two callbacks, at most
/// once. Calls beyond the first are ignored by the adopting promise.
pub trait Thenable<T, E> {
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(T)>,
        on_rejected: Box<dyn FnOnce(E)>,
    );
}

/// What a promise is resolved with.
pub enum Resolution<T: 'static, E: 'static> {
    /// A plain value; the promise fulfills with it.
    Value(T),
    /// Another promise; adopted, or returned as-is by `Promise::resolve`.
    Promise(Promise<T, E>),
    /// A foreign promise-like value; adopted.
    Thenable(Box<dyn Thenable<T, E>>),
}

/// What a `then` handler produces. `Err` rejects the derived promise.
pub type Reaction<T, E> = Result<Resolution<T, E>, E>;

impl<T: 'static, E: 'static> Resolution<T, E> {
    pub fn thenable<P>(thenable: P) -> Self
    where
        P: Thenable<T, E> + 'static,
    {
        Resolution::Thenable(Box::new(thenable))
    }
}

impl<T: 'static, E: 'static> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<E: 'static> From<()> for Resolution<(), E> {
    fn from(_: ()) -> Self {
        Resolution::Value(())
    }
}

impl<T: fmt::Debug + 'static, E: 'static> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(_) => f.write_str("Promise(..)"),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}
