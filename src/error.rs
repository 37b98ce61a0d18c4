//! Error types for the APGAS runtime.
//!
//! Every failure that can cross a place boundary is an [`Error`]. Errors are
//! serializable so a failure raised at one place can be recorded against a
//! finish scope owned by another.
//!
//! # Error Categories
//!
//! - **Placement**: a place id that is negative or out of range
//! - **Wire**: serialization, deserialization and transport failures
//! - **Application**: errors returned by, or panics raised in, user jobs
//! - **Membership**: work lost because a place died
//! - **Aggregate**: the composite raised by `finish`
//! - **Runtime**: shutdown, configuration and internal failures
//!
//! A `finish` that observed failures returns a single error of kind
//! [`ErrorKind::Multiple`] whose [`Error::suppressed`] list holds every
//! sub-failure in the order it was recorded.

use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::Place;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    // === Placement ===
    /// Place id is negative or not below the first unused id.
    BadPlace,

    // === Wire ===
    /// A job, result or message could not be encoded.
    Serialization,
    /// A job, result or message could not be decoded.
    Deserialization,
    /// The transport could not deliver a message.
    Transport,

    // === Application ===
    /// Error returned by user code.
    User,
    /// User code panicked.
    Panicked,

    // === Membership ===
    /// Work was lost because the place it was attributed to died.
    PlaceFailed,

    // === Aggregate ===
    /// Composite of the failures observed by a finish scope.
    Multiple,

    // === Runtime ===
    /// The runtime at this place is shutting down.
    Shutdown,
    /// No runtime is installed on the calling thread.
    NoRuntime,
    /// Invalid configuration.
    Config,
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::BadPlace => ErrorCategory::Placement,
            Self::Serialization | Self::Deserialization | Self::Transport => ErrorCategory::Wire,
            Self::User | Self::Panicked => ErrorCategory::Application,
            Self::PlaceFailed => ErrorCategory::Membership,
            Self::Multiple => ErrorCategory::Aggregate,
            Self::Shutdown | Self::NoRuntime | Self::Config | Self::Internal => {
                ErrorCategory::Runtime
            }
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid place references.
    Placement,
    /// Encoding, decoding and delivery failures.
    Wire,
    /// Failures raised by user jobs.
    Application,
    /// Place loss.
    Membership,
    /// Composite failures.
    Aggregate,
    /// Runtime lifecycle and internal failures.
    Runtime,
}

/// The main error type for APGAS operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    place: Option<Place>,
    suppressed: Vec<Error>,
    #[serde(skip)]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            place: None,
            suppressed: Vec::new(),
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Records the place the error is about.
    #[must_use]
    pub const fn with_place(mut self, place: Place) -> Self {
        self.place = Some(place);
        self
    }

    /// Adds a source error to the chain.
    ///
    /// The source is local to this process; it is dropped when the error is
    /// shipped to another place.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the place this error refers to, if any.
    #[must_use]
    pub const fn place(&self) -> Option<Place> {
        self.place
    }

    /// Returns the sub-failures of a composite error.
    #[must_use]
    pub fn suppressed(&self) -> &[Self] {
        &self.suppressed
    }

    /// Consumes the error, returning its sub-failures.
    #[must_use]
    pub fn into_suppressed(self) -> Vec<Self> {
        self.suppressed
    }

    /// Creates a bad place error.
    #[must_use]
    pub fn bad_place(id: i64) -> Self {
        Self::new(ErrorKind::BadPlace).with_message(format!("invalid place id {id}"))
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization).with_message(detail)
    }

    /// Creates a deserialization error.
    #[must_use]
    pub fn deserialization(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deserialization).with_message(detail)
    }

    /// Creates a transport error for a message bound to `dst`.
    #[must_use]
    pub fn transport(dst: Place, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport)
            .with_message(detail)
            .with_place(dst)
    }

    /// Creates a user error.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }

    /// Wraps an arbitrary error raised by user code.
    #[must_use]
    pub fn from_user(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User)
            .with_message(err.to_string())
            .with_source(err)
    }

    /// Creates an error for a panic caught in user code.
    #[must_use]
    pub fn panicked(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panicked).with_message(detail)
    }

    /// Creates an error for work lost when `place` died.
    #[must_use]
    pub fn place_failed(place: Place) -> Self {
        Self::new(ErrorKind::PlaceFailed)
            .with_message(format!("{place} failed"))
            .with_place(place)
    }

    /// Creates the composite error raised by a finish scope.
    #[must_use]
    pub fn multiple(failures: Vec<Self>) -> Self {
        let message = match failures.len() {
            1 => "1 failure".to_string(),
            n => format!("{n} failures"),
        };
        Self {
            kind: ErrorKind::Multiple,
            message: Some(message),
            place: None,
            suppressed: failures,
            source: None,
        }
    }

    /// Creates a shutdown error.
    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown).with_message("runtime is shutting down")
    }

    /// Creates an error for calls made outside any runtime.
    #[must_use]
    pub fn no_runtime() -> Self {
        Self::new(ErrorKind::NoRuntime).with_message("no apgas runtime on this thread")
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(detail)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns true for the composite raised by a finish scope.
    #[must_use]
    pub const fn is_multiple(&self) -> bool {
        matches!(self.kind, ErrorKind::Multiple)
    }

    /// Returns true if the error reports an invalid place.
    #[must_use]
    pub const fn is_bad_place(&self) -> bool {
        matches!(self.kind, ErrorKind::BadPlace)
    }

    /// Returns true for serialization and deserialization failures.
    #[must_use]
    pub const fn is_wire_error(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Wire)
    }

    /// Returns true if the error reports a dead place.
    #[must_use]
    pub const fn is_place_failed(&self) -> bool {
        matches!(self.kind, ErrorKind::PlaceFailed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        for (i, sub) in self.suppressed.iter().enumerate() {
            write!(f, "\n  [{i}] {sub}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for APGAS operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
