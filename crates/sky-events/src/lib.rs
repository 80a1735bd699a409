//! Event log for the Sky event database.
//!
//! Every object of a table owns an ordered stream of events keyed by
//! timestamp. A write at an existing timestamp merges into that event
//! instead of appending, which makes re-ingestion of the same data safe.
//!
//! Events are persisted in a compact binary form (see [`codec`]) and
//! rebuilt into memory when the log is opened.

pub mod codec;
mod error;
mod event;
mod log;
mod store;
mod stream;

pub use codec::CodecError;
pub use error::EventError;
pub use event::{Event, NamedEvent};
pub use log::EventLog;
pub use stream::{EventCursor, ObjectStream, TimeRange};
