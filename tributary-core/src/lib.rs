//! Aggregates configuration from many providers into one typed record.
//!
//! A destination type implements [`Record`] to declare its tagged fields.
//! Providers stream (path, value) pairs; each pair is resolved against the
//! destination, coerced into the field's type and applied unless a higher
//! priority provider already owns the field. Every fetch round is published
//! to subscribers as a single [`Notification`].

pub mod aggregator;
pub mod coerce;
pub mod error;
pub mod events;
pub mod logging;
mod materialize;
pub mod options;
pub mod path;
pub mod priority;
pub mod provider;
pub mod providers;
pub mod record;
pub mod registry;
pub mod slot;
pub mod value;

pub use aggregator::Aggregator;
pub use error::{CoerceError, Error, NonErrorPanic, Result};
pub use events::{FieldUpdate, Notification};
pub use options::Options;
pub use path::Path;
pub use priority::ProviderId;
pub use provider::{Provider, Sink};
pub use record::{Record, Walker};
pub use slot::{Kind, Pinned, Slot};
pub use value::Value;
