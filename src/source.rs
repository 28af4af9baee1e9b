//! Completion callbacks shared by the data source clients.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::SourceError;

/// Warn on the first failure and then every Nth in a row.
pub const FAILURE_WARN_EVERY: u32 = 10;

pub fn should_warn(consecutive_failures: u32) -> bool {
    consecutive_failures == 1 || consecutive_failures % FAILURE_WARN_EVERY == 0
}

pub type UpdateCallback = Box<dyn FnOnce()>;
pub type FailureCallback<E> = Box<dyn FnOnce(&E)>;

/// Optional success/failure hooks passed to a `request_refresh` call.
/// Exactly one of them runs, once, when the request completes.
pub struct RefreshCallbacks<E = SourceError> {
    on_update: Option<UpdateCallback>,
    on_error: Option<FailureCallback<E>>,
}

impl<E> Default for RefreshCallbacks<E> {
    fn default() -> Self {
        Self {
            on_update: None,
            on_error: None,
        }
    }
}

impl<E> RefreshCallbacks<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_update(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&E) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn updated(self) {
        if let Some(f) = self.on_update {
            f();
        }
    }

    pub fn failed(self, err: &E) {
        if let Some(f) = self.on_error {
            f(err);
        }
    }

    /// Share between a request's success and error closures.
    pub fn shared(self) -> SharedCallbacks<E> {
        SharedCallbacks(Rc::new(RefCell::new(Some(self))))
    }
}

/// Callbacks consumed by whichever completion path runs first.
pub struct SharedCallbacks<E = SourceError>(Rc<RefCell<Option<RefreshCallbacks<E>>>>);

impl<E> Clone for SharedCallbacks<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E> SharedCallbacks<E> {
    fn take(&self) -> Option<RefreshCallbacks<E>> {
        self.0.borrow_mut().take()
    }

    pub fn updated(&self) {
        if let Some(cb) = self.take() {
            cb.updated();
        }
    }

    pub fn failed(&self, err: &E) {
        if let Some(cb) = self.take() {
            cb.failed(err);
        }
    }
}
