//! Change Events
//!
//! Every stream in the operator (desired-state records, nodes, pools,
//! replicas) carries the same three kinds of change. The kind matters to the
//! reconciler: a `new` pool without a record is an orphan, a `del` pool with a
//! record is recreated, and so on.

use serde::Serialize;

/// Kind of change carried by an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Object appeared
    New,
    /// Object changed
    Mod,
    /// Object disappeared
    Del,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::New => write!(f, "new"),
            EventType::Mod => write!(f, "mod"),
            EventType::Del => write!(f, "del"),
        }
    }
}

/// A change to an object of type `T`
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub event_type: EventType,
    pub object: T,
}

impl<T> Event<T> {
    pub fn new(object: T) -> Self {
        Self {
            event_type: EventType::New,
            object,
        }
    }

    pub fn modified(object: T) -> Self {
        Self {
            event_type: EventType::Mod,
            object,
        }
    }

    pub fn deleted(object: T) -> Self {
        Self {
            event_type: EventType::Del,
            object,
        }
    }
}
