//! Serialization backends for jobs, results and wire messages.
//!
//! All places of a run must use the same [`SerializationFormat`]. Encoding
//! and decoding failures are reported with the type involved so that a
//! failed `async_at` can name the offending job.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Wire format used to encode jobs and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SerializationFormat {
    /// JSON (human-readable, larger).
    #[default]
    Json,
    /// MessagePack (compact binary).
    MessagePack,
    /// Bincode (Rust-native binary).
    Bincode,
}

impl SerializationFormat {
    /// Looks up a format by its configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "msgpack" | "messagepack" => Some(Self::MessagePack),
            "bincode" => Some(Self::Bincode),
            _ => None,
        }
    }

    /// Returns the configuration name of this format.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "msgpack",
            Self::Bincode => "bincode",
        }
    }

    /// Encodes a value.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let failed = |reason: String| SerializationError::SerializationFailed {
            type_name: std::any::type_name::<T>(),
            reason,
        };
        match self {
            Self::Json => serde_json::to_vec(value).map_err(|err| failed(err.to_string())),
            Self::MessagePack => rmp_serde::to_vec(value).map_err(|err| failed(err.to_string())),
            Self::Bincode => bincode::serialize(value).map_err(|err| failed(err.to_string())),
        }
    }

    /// Decodes a value.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, DeserializationError> {
        let failed = |reason: String| DeserializationError::DeserializationFailed {
            type_name: std::any::type_name::<T>(),
            reason,
        };
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|err| failed(err.to_string())),
            Self::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|err| failed(err.to_string()))
            }
            Self::Bincode => bincode::deserialize(bytes).map_err(|err| failed(err.to_string())),
        }
    }
}

/// Encoding failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SerializationError {
    /// The serializer rejected the value.
    #[error("failed to serialize {type_name}: {reason}")]
    SerializationFailed {
        /// Rust type being encoded.
        type_name: &'static str,
        /// Failure reason.
        reason: String,
    },
}

/// Decoding failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeserializationError {
    /// The deserializer rejected the bytes.
    #[error("failed to deserialize {type_name}: {reason}")]
    DeserializationFailed {
        /// Rust type being decoded.
        type_name: &'static str,
        /// Failure reason.
        reason: String,
    },
    /// No job is registered under the name carried by the payload.
    #[error("no job registered under {name:?}")]
    UnknownJob {
        /// Name carried by the payload.
        name: String,
    },
}

impl From<SerializationError> for Error {
    fn from(err: SerializationError) -> Self {
        Self::new(ErrorKind::Serialization)
            .with_message(err.to_string())
            .with_source(err)
    }
}

impl From<DeserializationError> for Error {
    fn from(err: DeserializationError) -> Self {
        Self::new(ErrorKind::Deserialization)
            .with_message(err.to_string())
            .with_source(err)
    }
}
