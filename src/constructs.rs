//! The APGAS constructs as ambient free functions.
//!
//! Each function uses the place runtime and finish scope of the calling
//! thread: the task being run by a worker, the body of an enclosing
//! `finish`, or a context installed with [`Runtime::enter`](crate::Runtime::enter).
//! Called anywhere else they fail with [`ErrorKind::NoRuntime`](crate::ErrorKind::NoRuntime).
//!
//! Spawning constructs fail synchronously only with `BadPlace` or
//! `NoRuntime`. Every other failure of the spawned work is recorded against
//! the enclosing finish, which reports it when it returns.

use crate::error::Result;
use crate::job::{RemoteCall, RemoteJob};
use crate::runtime::context;
use crate::types::Place;

/// Runs `body` and waits for every task spawned under it, at any place.
///
/// Fails with a `Multiple` error listing every failure recorded in the
/// scope, the body's own failure included.
pub fn finish(body: impl FnOnce() -> Result<()>) -> Result<()> {
    finish_with(body)
}

/// Like [`finish`], returning the body's value when nothing failed.
pub fn finish_with<T>(body: impl FnOnce() -> Result<T>) -> Result<T> {
    context::with_current(|cx| cx.place.run_finish(cx, |_| body()))
}

/// Spawns `f` at the current place under the enclosing finish.
pub fn async_(f: impl FnOnce() -> Result<()> + Send + 'static) -> Result<()> {
    context::with_current(|cx| {
        cx.place.spawn_local(&cx.finish, Box::new(f));
        Ok(())
    })
}

/// Spawns `job` at `place` under the enclosing finish.
pub fn async_at<J: RemoteJob>(place: Place, job: J) -> Result<()> {
    context::with_current(|cx| cx.place.async_at(cx, place, job))
}

/// Runs `job` at `place` and waits for it, and for everything it spawns.
pub fn at<J: RemoteJob>(place: Place, job: J) -> Result<()> {
    context::with_current(|cx| cx.place.at(cx, place, job))
}

/// Runs `call` at `place` and returns its output.
pub fn at_call<C: RemoteCall>(place: Place, call: C) -> Result<C::Output> {
    context::with_current(|cx| cx.place.at_call(cx, place, call))
}

/// Spawns `job` at `place` outside any finish. Its failures are only logged.
pub fn uncounted_async_at<J: RemoteJob>(place: Place, job: J) -> Result<()> {
    context::with_current(|cx| cx.place.uncounted_async_at(place, job))
}

/// Sends `job` to run on the delivery thread of `place`, outside its pool
/// and outside any finish. Meant for short control actions.
pub fn immediate_async_at<J: RemoteJob>(place: Place, job: J) -> Result<()> {
    context::with_current(|cx| cx.place.immediate_async_at(place, job))
}

/// The current place.
pub fn here() -> Result<Place> {
    context::with_current(|cx| Ok(cx.place.here()))
}

/// The live places, in id order.
pub fn places() -> Result<Vec<Place>> {
    context::with_current(|cx| Ok(cx.place.registry().snapshot().to_vec()))
}

/// The place with id `id`, if it was ever part of the run.
pub fn place(id: i64) -> Result<Place> {
    let place = Place::new(id)?;
    context::with_current(|cx| {
        cx.place.check_place(place)?;
        Ok(place)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn constructs_need_a_runtime() {
        assert_eq!(here().expect_err("no runtime").kind(), ErrorKind::NoRuntime);
        assert_eq!(
            finish(|| Ok(())).expect_err("no runtime").kind(),
            ErrorKind::NoRuntime
        );
        assert_eq!(
            async_(|| Ok(())).expect_err("no runtime").kind(),
            ErrorKind::NoRuntime
        );
    }
}
