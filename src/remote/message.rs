//! Wire messages exchanged between places.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::finish::FinishRef;
use crate::job::JobPayload;
use crate::types::{GlobalId, Place};

/// A message of the place-to-place protocol.
///
/// Job bytes travel as a nested [`JobPayload`] encoded on their own, so a
/// receiver that cannot decode the job still knows which finish to charge
/// the failure to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Message {
    /// Run a job in the pool under `finish`.
    Spawn {
        finish: FinishRef,
        origin: Place,
        payload: JobPayload,
    },
    /// Run a job on the delivery thread, outside any finish.
    Immediate { origin: Place, payload: JobPayload },
    /// Counter deltas and failures flushed by a default-finish proxy.
    FinishDelta {
        finish: GlobalId,
        from: Place,
        deltas: Vec<(Place, i64)>,
        failures: Vec<Error>,
    },
    /// A resilient finish homed at the receiver may have become quiescent.
    FinishRelease { finish: GlobalId },
}

impl Message {
    /// Short name for logs.
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Immediate { .. } => "immediate",
            Self::FinishDelta { .. } => "finish_delta",
            Self::FinishRelease { .. } => "finish_release",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::SerializationFormat;

    #[test]
    fn delta_survives_every_format() {
        let finish = GlobalId::from_parts(Place::from_raw(0), 7);
        let message = Message::FinishDelta {
            finish,
            from: Place::from_raw(2),
            deltas: vec![(Place::from_raw(2), -1), (Place::from_raw(3), 1)],
            failures: vec![Error::multiple(vec![Error::user("inner")])],
        };
        for format in [
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
            SerializationFormat::Bincode,
        ] {
            let bytes = format.encode(&message).expect("encode");
            let Message::FinishDelta {
                finish: got,
                deltas,
                failures,
                ..
            } = format.decode(&bytes).expect("decode")
            else {
                panic!("{format:?} changed the variant");
            };
            assert_eq!(got, finish);
            assert_eq!(deltas.len(), 2);
            assert_eq!(failures[0].suppressed().len(), 1);
        }
    }

    #[test]
    fn spawn_carries_the_finish_reference() {
        let message = Message::Spawn {
            finish: FinishRef::Resilient(GlobalId::from_parts(Place::from_raw(1), 3)),
            origin: Place::from_raw(1),
            payload: JobPayload {
                name: "demo".into(),
                bytes: vec![1, 2, 3],
            },
        };
        let format = SerializationFormat::MessagePack;
        let decoded: Message = format.decode(&format.encode(&message).expect("encode")).expect("decode");
        assert_eq!(decoded.kind(), "spawn");
        let Message::Spawn { finish, payload, .. } = decoded else {
            unreachable!();
        };
        assert!(matches!(finish, FinishRef::Resilient(_)));
        assert_eq!(payload.bytes, vec![1, 2, 3]);
    }
}
