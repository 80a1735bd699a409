//! Per-object ordered event streams and lazy cursors over them.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use sky_types::Timestamp;

use crate::event::Event;

/// An inclusive timestamp range. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl TimeRange {
    /// The range covering every timestamp.
    pub const ALL: TimeRange = TimeRange {
        from: None,
        to: None,
    };

    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        Self { from, to }
    }

    /// Returns `true` when no timestamp can fall inside the range.
    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.from.map_or(true, |from| timestamp >= from)
            && self.to.map_or(true, |to| timestamp <= to)
    }
}

/// The ordered events of a single object.
///
/// Writers serialize on `writer` for the whole read-modify-persist cycle and
/// only take the map's write lock to publish the finished event, so readers
/// never observe a half-applied merge.
#[derive(Default)]
pub struct ObjectStream {
    writer: Mutex<()>,
    events: RwLock<BTreeMap<Timestamp, Arc<Event>>>,
}

impl ObjectStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquires the per-object writer lock.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the event at `timestamp`, if any.
    pub fn get(&self, timestamp: Timestamp) -> Option<Arc<Event>> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&timestamp)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publishes an event, replacing any event at the same timestamp.
    pub(crate) fn publish(&self, event: Arc<Event>) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.timestamp(), event);
    }

    pub(crate) fn remove(&self, timestamp: Timestamp) -> Option<Arc<Event>> {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&timestamp)
    }

    /// Removes every event. Returns how many were removed.
    pub(crate) fn clear(&self) -> usize {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let n = events.len();
        events.clear();
        n
    }

    /// Opens a cursor over the events inside `range`.
    pub fn cursor(self: &Arc<Self>, range: TimeRange) -> EventCursor {
        EventCursor {
            stream: Arc::clone(self),
            range,
            last: None,
        }
    }
}

/// A lazy, restartable iterator over one object's events in ascending
/// timestamp order.
///
/// The cursor holds no lock between calls to `next`. Each step looks up the
/// first event after the previously returned timestamp, so writes that land
/// concurrently ahead of the cursor are observed and nothing is yielded twice.
pub struct EventCursor {
    stream: Arc<ObjectStream>,
    range: TimeRange,
    last: Option<Timestamp>,
}

impl EventCursor {
    /// Restarts the cursor from the beginning of its range.
    pub fn rewind(&mut self) {
        self.last = None;
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }
}

impl Iterator for EventCursor {
    type Item = Arc<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.range.is_empty() {
            return None;
        }
        let lower = match (self.last, self.range.from) {
            (Some(last), _) => Bound::Excluded(last),
            (None, Some(from)) => Bound::Included(from),
            (None, None) => Bound::Unbounded,
        };
        let upper = self.range.to.map_or(Bound::Unbounded, Bound::Included);

        let events = self.stream.events.read().unwrap_or_else(|e| e.into_inner());
        let (timestamp, event) = events.range((lower, upper)).next()?;
        self.last = Some(*timestamp);
        Some(Arc::clone(event))
    }
}
