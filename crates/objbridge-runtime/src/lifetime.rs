//! Scoped cleanup of foreign resources
//!
//! A [`CleanupStack`] records one release action per acquired resource and
//! runs them in strict reverse registration order when the scope ends,
//! whether it ends normally, with an error, or by panicking.
//!
//! Release actions may fail or panic. Such a failure never replaces an error
//! that is already propagating and never aborts the remaining actions; it is
//! logged, or returned separately when nothing else failed.

use crate::error::{BridgeError, BridgeResult};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

type ReleaseAction = Box<dyn FnOnce() -> BridgeResult<()>>;

/// Ordered release actions, run last-in first-out
pub struct CleanupStack {
    actions: Vec<(&'static str, ReleaseAction)>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl CleanupStack {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Register `release` for `resource` and hand the resource back
    pub fn acquire<T, F>(&mut self, resource: T, release: F) -> T
    where
        T: Clone + 'static,
        F: FnOnce(T) -> BridgeResult<()> + 'static,
    {
        let held = resource.clone();
        self.actions
            .push((std::any::type_name::<T>(), Box::new(move || release(held))));
        resource
    }

    /// Register an action that is not tied to a returned resource
    pub fn defer<F>(&mut self, action: F)
    where
        F: FnOnce() -> BridgeResult<()> + 'static,
    {
        self.actions.push(("deferred action", Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every pending action, newest first, and collect the failures
    ///
    /// A panicking action is reported as [`BridgeError::Cleanup`]; the
    /// remaining actions still run.
    pub fn unwind(&mut self) -> Vec<BridgeError> {
        let mut failures = Vec::new();
        while let Some((label, action)) = self.actions.pop() {
            match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push(err),
                Err(payload) => failures.push(BridgeError::Cleanup(format!(
                    "release of {} panicked: {}",
                    label,
                    panic_message(payload.as_ref())
                ))),
            }
        }
        failures
    }

    /// Unwind now, surfacing the first failure
    pub fn close(mut self) -> BridgeResult<()> {
        let mut failures = self.unwind().into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                for rest in failures {
                    warn!(error = %rest, "additional cleanup failure");
                }
                Err(first)
            }
        }
    }
}

impl Default for CleanupStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        for err in self.unwind() {
            warn!(error = %err, "cleanup failed while dropping scope");
        }
    }
}

impl fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|(label, _)| label))
            .finish()
    }
}

/// Run `body` with a fresh cleanup stack and unwind it afterwards
///
/// If `body` fails, its error is returned and cleanup failures are only
/// logged. If `body` succeeds, the first cleanup failure (if any) is
/// returned instead of the value.
///
/// # Example
///
/// ```
/// # use objbridge_runtime::{scope, BridgeResult};
/// # use std::{cell::RefCell, rc::Rc};
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let result: BridgeResult<u32> = scope(|stack| {
///     let l = log.clone();
///     let a = stack.acquire(1u32, move |v| { l.borrow_mut().push(v); Ok(()) });
///     let l = log.clone();
///     let b = stack.acquire(2u32, move |v| { l.borrow_mut().push(v); Ok(()) });
///     Ok(a + b)
/// });
/// assert_eq!(result, Ok(3));
/// assert_eq!(*log.borrow(), vec![2, 1]);
/// ```
pub fn scope<T, F>(body: F) -> BridgeResult<T>
where
    F: FnOnce(&mut CleanupStack) -> BridgeResult<T>,
{
    let mut stack = CleanupStack::new();
    let outcome = body(&mut stack);
    let failures = stack.unwind();

    match outcome {
        Err(primary) => {
            for err in failures {
                warn!(primary = %primary, error = %err, "cleanup failed while propagating an error");
            }
            Err(primary)
        }
        Ok(value) => {
            let mut failures = failures.into_iter();
            match failures.next() {
                None => Ok(value),
                Some(first) => {
                    for rest in failures {
                        warn!(error = %rest, "additional cleanup failure");
                    }
                    Err(first)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_acquire_returns_resource() {
        let mut stack = CleanupStack::new();
        let value = stack.acquire(7u8, |_| Ok(()));
        assert_eq!(value, 7);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_drop_runs_actions() {
        let ran = Rc::new(RefCell::new(false));
        {
            let mut stack = CleanupStack::new();
            let r = ran.clone();
            stack.defer(move || {
                *r.borrow_mut() = true;
                Ok(())
            });
        }
        assert!(*ran.borrow());
    }

    #[test]
    fn test_panicking_action_becomes_cleanup_error() {
        let mut stack = CleanupStack::new();
        stack.defer(|| panic!("release exploded"));
        let failures = stack.unwind();
        assert_eq!(failures.len(), 1);
        match &failures[0] {
            BridgeError::Cleanup(msg) => assert!(msg.contains("release exploded"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn test_close_surfaces_first_failure() {
        let mut stack = CleanupStack::new();
        stack.defer(|| Err(BridgeError::Configuration("older".into())));
        stack.defer(|| Err(BridgeError::Configuration("newer".into())));
        assert_eq!(
            stack.close(),
            Err(BridgeError::Configuration("newer".into()))
        );
    }
}
