//! Remote dispatch: shipping jobs to other places and handling what arrives.
//!
//! Outbound, a job bound for another place is encoded into a [`JobPayload`],
//! counted by its finish with `spawn(dst)` and wrapped in a
//! [`Message::Spawn`]. If encoding or sending fails the finish is told right
//! away with `undeliverable`, so every spawn is matched by exactly one
//! completion or one undeliverable.
//!
//! Inbound, every message is handled on the transport's delivery thread for
//! the sending place. Spawned jobs are handed to the worker pool; immediate
//! jobs run inline; finish bookkeeping messages update local tables.

mod message;

use std::sync::Arc;

use tracing::{debug, trace, warn};

pub(crate) use message::Message;

use crate::error::{Error, Result};
use crate::finish::Finish;
use crate::job::{decode_failure, JobPayload};
use crate::runtime::task::Task;
use crate::runtime::PlaceRuntime;
use crate::types::Place;

/// Logs an encode or decode failure, loudly when verbose serialization is on.
pub(crate) fn log_wire_failure(place: &PlaceRuntime, job: &str, err: &Error) {
    if place.config().verbose_serialization {
        warn!(place = %place.here(), job = %job, error = %err, "job serialization failure");
    } else {
        debug!(place = %place.here(), job = %job, error = %err, "job serialization failure");
    }
}

/// Counts a task for `dst` in `finish` and ships it.
///
/// `payload` is the outcome of encoding the job; an encoding failure is
/// recorded against the finish like a delivery failure.
pub(crate) fn ship(
    place: &Arc<PlaceRuntime>,
    finish: &Arc<dyn Finish>,
    dst: Place,
    job: &str,
    payload: Result<JobPayload>,
) {
    finish.spawn(dst);
    let payload = match payload {
        Ok(payload) => payload,
        Err(err) => {
            log_wire_failure(place, job, &err);
            finish.undeliverable(dst, err);
            return;
        }
    };
    let message = Message::Spawn {
        finish: finish.reference(),
        origin: place.here(),
        payload,
    };
    if let Err(err) = place.send_message(dst, &message) {
        debug!(place = %place.here(), dst = %dst, job = %job, error = %err, "job not delivered");
        finish.undeliverable(dst, err);
    }
}

/// Handles one inbound message from `from`.
pub(crate) fn deliver(place: &Arc<PlaceRuntime>, from: Place, bytes: &[u8]) {
    let message: Message = match place.format().decode(bytes) {
        Ok(message) => message,
        Err(err) => {
            // Nothing in an undecodable envelope names its finish.
            warn!(place = %place.here(), from = %from, error = %err, "dropping undecodable message");
            return;
        }
    };
    trace!(place = %place.here(), from = %from, kind = message.kind(), "message received");

    match message {
        Message::Spawn {
            finish,
            origin,
            payload,
        } => {
            let finish = place.resolve_finish(finish);
            if !finish.arrive(origin) {
                return;
            }
            match place.jobs().decode(place.format(), &payload) {
                Ok(job) => place.submit(Task::new(finish, job, origin)),
                Err(err) => {
                    let err = decode_failure(&payload, err).with_place(place.here());
                    log_wire_failure(place, &payload.name, &err);
                    finish.terminate(Some(err));
                }
            }
        }
        Message::Immediate { origin, payload } => match place.jobs().decode(place.format(), &payload) {
            Ok(job) => Task::new(place.untracked(), job, origin).run(place),
            Err(err) => {
                let err = decode_failure(&payload, err).with_place(place.here());
                log_wire_failure(place, &payload.name, &err);
            }
        },
        Message::FinishDelta {
            finish,
            from,
            deltas,
            failures,
        } => match place.finishes().home(finish) {
            Some(home) => home.apply(from, &deltas, failures),
            None => debug!(place = %place.here(), finish = %finish, "delta for a finish that already returned"),
        },
        Message::FinishRelease { finish } => place.finishes().wake(finish),
    }
}
