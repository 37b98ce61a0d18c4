//! Tasks: jobs bound to a finish scope.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::trace;

use crate::error::Error;
use crate::finish::Finish;
use crate::job::BoxedJob;
use crate::runtime::context::{self, Context};
use crate::runtime::scheduler::{panic_message, Runnable};
use crate::runtime::PlaceRuntime;
use crate::types::Place;

/// A job, the finish scope that counts it, and the place that spawned it.
///
/// The scope has already accounted for the task when it is built; running
/// it reports completion exactly once, whether the job returns, fails or
/// panics.
pub(crate) struct Task {
    finish: Arc<dyn Finish>,
    job: BoxedJob,
    origin: Place,
}

impl Task {
    pub(crate) fn new(finish: Arc<dyn Finish>, job: BoxedJob, origin: Place) -> Self {
        Self {
            finish,
            job,
            origin,
        }
    }

    /// Runs the job under its finish scope and reports completion.
    pub(crate) fn run(self, place: &Arc<PlaceRuntime>) {
        let Self {
            finish,
            job,
            origin,
        } = self;
        trace!(place = %place.here(), origin = %origin, finish = ?finish.reference(), "running task");
        let outcome = {
            let _guard = context::set_current(Some(Context::new(
                Arc::clone(place),
                Arc::clone(&finish),
            )));
            panic::catch_unwind(AssertUnwindSafe(job))
        };
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(
                Error::panicked(panic_message(payload.as_ref())).with_place(place.here()),
            ),
        };
        finish.terminate(failure);
    }

    pub(crate) fn into_runnable(self, place: Arc<PlaceRuntime>) -> Runnable {
        Box::new(move || self.run(&place))
    }
}
