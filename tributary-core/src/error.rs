use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::path::Path;
use crate::slot::Kind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid destination: {0}")]
    DestinationInvalid(String),

    #[error("field '{field}' has no '{tag}' tag")]
    TagNotFound { field: String, tag: String },

    #[error("no field registered for path '{0}'")]
    FieldNotFound(Path),

    #[error("expected a map at '{0}'")]
    ExpectedMap(Path),

    #[error("map at '{0}' is not keyed by text")]
    InvalidMapKeyType(Path),

    #[error("map at '{0}' cannot be initialised: slot is not addressable")]
    NotAddressable(Path),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: Path, reason: String },

    #[error("cannot set '{path}': {source}")]
    Set {
        path: Path,
        #[source]
        source: CoerceError,
    },

    #[error("provider panicked: {0}")]
    Panicked(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    NonErrorPanic(#[from] NonErrorPanic),

    #[error("operation cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider '{provider}' failed to start change notification: {reason}")]
    Notify { provider: String, reason: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl Error {
    /// Converts a panic payload caught at the provider boundary.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Error>() {
            Ok(err) => return Self::Panicked(Arc::new(*err)),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<Box<dyn std::error::Error + Send + Sync>>() {
            Ok(err) => return Self::Panicked(Arc::from(*err)),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<std::io::Error>() {
            Ok(err) => return Self::Panicked(Arc::new(*err)),
            Err(payload) => payload,
        };

        let value = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_owned()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "<opaque panic payload>".to_owned()
        };

        Self::NonErrorPanic(NonErrorPanic { value })
    }
}

/// A panic whose payload was not an error value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonErrorPanic {
    pub value: String,
}

impl fmt::Display for NonErrorPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider panicked with a non-error value: {}", self.value)
    }
}

impl std::error::Error for NonErrorPanic {}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoerceError {
    #[error("slot cannot be set")]
    NotSetable,

    #[error("cannot set {found} to {expected}")]
    InvalidType { expected: Kind, found: &'static str },

    #[error("could not convert '{input}' to {expected}")]
    InvalidValue { expected: Kind, input: String },

    #[error("{input} overflows {expected}")]
    Overflow { expected: Kind, input: String },
}
