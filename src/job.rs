//! Remote jobs.
//!
//! Closures cannot be shipped between processes, so work that runs at another
//! place is a *named job*: a serializable value whose type is registered
//! under a stable name at every place. The sender encodes the value; the
//! receiver looks the name up in its [`JobRegistry`] and decodes it back
//! into the registered type before running it.
//!
//! - [`RemoteJob`]: fire-and-forget work (`async_at`, `at`)
//! - [`RemoteCall`]: work producing a value that is shipped back (`at_call`,
//!   place-local handles)
//!
//! An unknown name or a payload that does not decode is a deserialization
//! failure at the receiving place, recorded against the owning finish.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::runtime::context;
use crate::serialization::{DeserializationError, SerializationFormat};
use crate::types::GlobalId;

/// A serializable unit of work that can run at any place.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Bump { counter: GlobalRef<AtomicU64> }
///
/// impl RemoteJob for Bump {
///     const NAME: &'static str = "demo.bump";
///     fn run(self) -> apgas::Result<()> {
///         self.counter.get()?.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
/// }
/// ```
pub trait RemoteJob: Serialize + DeserializeOwned + Send + 'static {
    /// Name the job is registered under. Must be identical at every place.
    const NAME: &'static str;

    /// Runs the job at the place it was shipped to.
    fn run(self) -> Result<()>;
}

/// A serializable computation whose result travels back to the caller.
pub trait RemoteCall: Serialize + DeserializeOwned + Send + 'static {
    /// Name the call is registered under. Must be identical at every place.
    const NAME: &'static str;

    /// Value produced by the call.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Runs the call at the place it was shipped to.
    fn call(self) -> Result<Self::Output>;
}

/// Type-erased job ready to run at this place.
pub(crate) type BoxedJob = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Encoded job as carried by wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JobPayload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl JobPayload {
    pub(crate) fn encode<V: Serialize>(
        format: SerializationFormat,
        name: impl Into<String>,
        value: &V,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            bytes: format.encode(value)?,
        })
    }
}

type Decoder = fn(SerializationFormat, &[u8]) -> std::result::Result<BoxedJob, DeserializationError>;

#[derive(Clone, Copy)]
struct Entry {
    type_id: TypeId,
    decode: Decoder,
}

/// Name to decoder table shared by every place of a run.
///
/// Built-in jobs used by the runtime itself are always registered.
#[derive(Clone)]
pub struct JobRegistry {
    entries: Arc<HashMap<String, Entry>>,
}

impl JobRegistry {
    /// Creates a registry holding only the runtime's built-in jobs.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Arc::new(HashMap::new()),
        };
        registry.register_job::<DeliverValue>();
        registry.register_job::<FreeRef>();
        registry
    }

    /// Registers a job type under [`RemoteJob::NAME`].
    pub fn register_job<J: RemoteJob>(&mut self) -> &mut Self {
        self.insert::<J>(J::NAME.to_string(), decode_job::<J>);
        self
    }

    /// Registers a call type so it can be used with `at_call`.
    pub fn register_call<C: RemoteCall>(&mut self) -> &mut Self {
        self.insert::<CallEnvelope<C>>(call_name::<C>(), decode_call::<C>);
        self
    }

    /// Registers a call type as the initializer of place-local handles.
    pub fn register_place_local<C>(&mut self) -> &mut Self
    where
        C: RemoteCall,
        C::Output: Sync,
    {
        self.insert::<PlaceLocalInit<C>>(init_name::<C>(), decode_init::<C>);
        self
    }

    /// Returns true if a job is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered names, built-ins included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered. Never the case in practice:
    /// built-ins are always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn decode(
        &self,
        format: SerializationFormat,
        payload: &JobPayload,
    ) -> std::result::Result<BoxedJob, DeserializationError> {
        let entry =
            self.entries
                .get(&payload.name)
                .ok_or_else(|| DeserializationError::UnknownJob {
                    name: payload.name.clone(),
                })?;
        (entry.decode)(format, &payload.bytes)
    }

    fn insert<V: 'static>(&mut self, name: String, decode: Decoder) {
        let entries = Arc::make_mut(&mut self.entries);
        let type_id = TypeId::of::<V>();
        if let Some(previous) = entries.get(&name) {
            if previous.type_id != type_id {
                warn!(
                    job = %name,
                    new_type = std::any::type_name::<V>(),
                    "job name re-registered with a different type, replacing"
                );
            }
        }
        entries.insert(name, Entry { type_id, decode });
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("JobRegistry").field("names", &names).finish()
    }
}

pub(crate) fn call_name<C: RemoteCall>() -> String {
    format!("{}#call", C::NAME)
}

pub(crate) fn init_name<C: RemoteCall>() -> String {
    format!("{}#init", C::NAME)
}

fn decode_job<J: RemoteJob>(
    format: SerializationFormat,
    bytes: &[u8],
) -> std::result::Result<BoxedJob, DeserializationError> {
    let job: J = format.decode(bytes)?;
    Ok(Box::new(move || job.run()))
}

fn decode_call<C: RemoteCall>(
    format: SerializationFormat,
    bytes: &[u8],
) -> std::result::Result<BoxedJob, DeserializationError> {
    let envelope: CallEnvelope<C> = format.decode(bytes)?;
    Ok(envelope.into_job(format))
}

fn decode_init<C>(
    format: SerializationFormat,
    bytes: &[u8],
) -> std::result::Result<BoxedJob, DeserializationError>
where
    C: RemoteCall,
    C::Output: Sync,
{
    let init: PlaceLocalInit<C> = format.decode(bytes)?;
    Ok(init.into_job())
}

// === Built-in jobs ===

/// A call shipped by `at_call`, with the slot its result goes back to.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct CallEnvelope<C: RemoteCall> {
    pub call: C,
    pub reply_to: GlobalId,
}

impl<C: RemoteCall> CallEnvelope<C> {
    /// Runs the call, then ships the encoded output to the reply slot's home
    /// under the same finish.
    pub(crate) fn into_job(self, format: SerializationFormat) -> BoxedJob {
        Box::new(move || {
            let output = self.call.call()?;
            let bytes = format.encode(&output)?;
            crate::constructs::async_at(
                self.reply_to.home(),
                DeliverValue {
                    id: self.reply_to,
                    bytes,
                },
            )
        })
    }
}

/// Stores an encoded result into a value slot at its home.
#[derive(Serialize, Deserialize)]
pub(crate) struct DeliverValue {
    pub id: GlobalId,
    pub bytes: Vec<u8>,
}

impl RemoteJob for DeliverValue {
    const NAME: &'static str = "apgas.deliver_value";

    fn run(self) -> Result<()> {
        context::with_current(|cx| {
            cx.place.slots().put(self.id, Box::new(self.bytes));
            Ok(())
        })
    }
}

/// Evaluates a place-local initializer and registers the value here.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct PlaceLocalInit<C: RemoteCall> {
    pub id: GlobalId,
    pub init: C,
}

impl<C> PlaceLocalInit<C>
where
    C: RemoteCall,
    C::Output: Sync,
{
    pub(crate) fn into_job(self) -> BoxedJob {
        Box::new(move || {
            let value = self.init.call()?;
            context::with_current(|cx| {
                cx.place.refs().insert(self.id, Arc::new(value));
                Ok(())
            })
        })
    }
}

/// Releases a global reference registered at the receiving place.
#[derive(Serialize, Deserialize)]
pub(crate) struct FreeRef {
    pub id: GlobalId,
}

impl RemoteJob for FreeRef {
    const NAME: &'static str = "apgas.free_ref";

    fn run(self) -> Result<()> {
        context::with_current(|cx| {
            cx.place.refs().remove(self.id);
            Ok(())
        })
    }
}

/// Turns a failed decode into the error recorded against a finish.
pub(crate) fn decode_failure(payload: &JobPayload, err: DeserializationError) -> Error {
    let message = format!("cannot decode job {:?}: {err}", payload.name);
    Error::from(err).with_message(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::Error as _;
    use std::sync::atomic::{AtomicU32, Ordering};

    static RAN: AtomicU32 = AtomicU32::new(0);

    #[derive(Serialize, Deserialize)]
    struct Add {
        amount: u32,
    }

    impl RemoteJob for Add {
        const NAME: &'static str = "test.add";

        fn run(self) -> Result<()> {
            RAN.fetch_add(self.amount, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Serialize)]
    struct Refuses;

    impl<'de> Deserialize<'de> for Refuses {
        fn deserialize<D: serde::Deserializer<'de>>(_: D) -> std::result::Result<Self, D::Error> {
            Err(D::Error::custom("refuses to deserialize"))
        }
    }

    impl RemoteJob for Refuses {
        const NAME: &'static str = "test.refuses";

        fn run(self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = JobRegistry::new();
        assert!(registry.contains(DeliverValue::NAME));
        assert!(registry.contains(FreeRef::NAME));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registered_job_decodes_and_runs() {
        let mut registry = JobRegistry::new();
        registry.register_job::<Add>();
        let format = SerializationFormat::MessagePack;
        let payload = JobPayload::encode(format, Add::NAME, &Add { amount: 5 }).expect("encode");
        let job = registry.decode(format, &payload).expect("decode");
        let before = RAN.load(Ordering::SeqCst);
        job().expect("run");
        assert_eq!(RAN.load(Ordering::SeqCst), before + 5);
    }

    #[test]
    fn unknown_name_is_a_deserialization_failure() {
        let registry = JobRegistry::new();
        let payload = JobPayload {
            name: "nobody.registered.this".into(),
            bytes: vec![],
        };
        let Err(err) = registry.decode(SerializationFormat::Json, &payload) else {
            panic!("unknown job decoded");
        };
        let err = decode_failure(&payload, err);
        assert_eq!(err.kind(), crate::ErrorKind::Deserialization);
    }

    #[test]
    fn refusing_payload_is_a_deserialization_failure() {
        let mut registry = JobRegistry::new();
        registry.register_job::<Refuses>();
        let payload = JobPayload::encode(SerializationFormat::Json, Refuses::NAME, &Refuses)
            .expect("encode");
        assert!(matches!(
            registry.decode(SerializationFormat::Json, &payload),
            Err(DeserializationError::DeserializationFailed { .. })
        ));
    }

    #[test]
    fn clones_share_until_modified() {
        let mut registry = JobRegistry::new();
        let snapshot = registry.clone();
        registry.register_job::<Add>();
        assert!(registry.contains(Add::NAME));
        assert!(!snapshot.contains(Add::NAME));
    }
}
