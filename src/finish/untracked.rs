//! The untracked sentinel scope.

use tracing::warn;

use super::{Finish, FinishRef};
use crate::error::Error;
use crate::types::Place;

/// Scope of tasks spawned outside any `finish`, and of uncounted tasks.
///
/// Nothing is counted and nobody waits, so failures can only be logged.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntrackedFinish {
    here: Place,
}

impl UntrackedFinish {
    pub(crate) const fn new(here: Place) -> Self {
        Self { here }
    }
}

impl Finish for UntrackedFinish {
    fn reference(&self) -> FinishRef {
        FinishRef::Untracked
    }

    fn spawn(&self, _dst: Place) {}

    fn arrive(&self, _src: Place) -> bool {
        true
    }

    fn terminate(&self, failure: Option<Error>) {
        if let Some(err) = failure {
            warn!(place = %self.here, error = %err, "uncaught failure in untracked task");
        }
    }

    fn undeliverable(&self, dst: Place, failure: Error) {
        warn!(place = %self.here, dst = %dst, error = %failure, "untracked task was not delivered");
    }

    fn wait(&self) -> Vec<Error> {
        Vec::new()
    }
}
