//! Append-only event history
//!
//! One recorder per execution (and one per Distributed Map Run, which
//! has its own id space). Event ids are assigned at append time under
//! the recorder's lock, so ids are strictly increasing in append order
//! even when branches race. Causality is carried separately: every
//! appender holds a [`BranchCursor`] whose last-emitted id becomes the
//! next event's `previous_event_id`, so an event's predecessor is the
//! previous event of the same logical branch, not `id - 1`.

use chrono::Utc;
use serde_json::Value;
use stateline_types::{Event, EventType};
use std::sync::Mutex;

/// The causal position of one logical branch in a history.
///
/// Fork a cursor when control flow forks (Parallel branches, Map
/// iterations); each copy then threads its own `previous_event_id`
/// chain while sharing the recorder's id sequence.
#[derive(Clone, Debug, Default)]
pub struct BranchCursor {
    last: u64,
}

impl BranchCursor {
    /// Cursor for the first event of an execution (`previous_event_id` 0).
    pub fn root() -> Self {
        Self::default()
    }

    /// A child cursor starting from this branch's current position.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn last_event_id(&self) -> u64 {
        self.last
    }
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    next_id: u64,
}

/// Per-execution append-only event log.
#[derive(Default)]
pub struct EventRecorder {
    inner: Mutex<Inner>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event on the cursor's branch, returning its id.
    pub fn append(
        &self,
        cursor: &mut BranchCursor,
        event_type: EventType,
        details: Option<Value>,
    ) -> u64 {
        let mut inner = self.inner.lock().expect("recorder lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.events.push(Event {
            id,
            event_type,
            timestamp: Utc::now(),
            previous_event_id: cursor.last,
            details,
        });
        cursor.last = id;
        id
    }

    /// A read-only snapshot in append order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.lock().expect("recorder lock poisoned").events.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("recorder lock poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
