//! Ambient execution context.
//!
//! Every thread running APGAS code carries the place runtime it belongs to
//! and the finish scope new tasks are spawned under. Workers install the
//! context of each task they run; `finish` installs its own scope for the
//! duration of its body; [`Runtime::enter`](crate::Runtime::enter) installs a
//! root context on a foreign thread.

use std::cell::RefCell;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::finish::Finish;
use crate::runtime::PlaceRuntime;

/// Place runtime and finish scope of the running code.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) place: Arc<PlaceRuntime>,
    pub(crate) finish: Arc<dyn Finish>,
}

impl Context {
    pub(crate) fn new(place: Arc<PlaceRuntime>, finish: Arc<dyn Finish>) -> Self {
        Self { place, finish }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Guard that restores the previous context on drop.
pub(crate) struct ContextGuard {
    prev: Option<Context>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

/// Installs `cx` as the current context until the guard is dropped.
pub(crate) fn set_current(cx: Option<Context>) -> ContextGuard {
    let prev = CURRENT.with(|slot| {
        let mut guard = slot.borrow_mut();
        let prev = guard.take();
        *guard = cx;
        prev
    });
    ContextGuard { prev }
}

/// Returns the current context, if one is installed.
pub(crate) fn current() -> Option<Context> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Runs `f` with the current context, failing with `NoRuntime` outside one.
pub(crate) fn with_current<R>(f: impl FnOnce(&Context) -> Result<R>) -> Result<R> {
    let cx = current().ok_or_else(Error::no_runtime)?;
    f(&cx)
}
