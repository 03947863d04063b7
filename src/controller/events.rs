use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Instant;

use super::clock::seconds_since;

/// Gesture events a controller can raise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// "Nothing happened" sentinel
    Nada,
    Jerk,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Nada => write!(f, "NADA"),
            EventKind::Jerk => write!(f, "JERK"),
        }
    }
}

/// Last firing time per event kind. Entries are only ever replaced.
#[derive(Clone, Debug, Default)]
pub struct EventState {
    last_fired: HashMap<EventKind, Instant>,
}

impl EventState {
    pub fn record(&mut self, kind: EventKind, at: Instant) {
        self.last_fired.insert(kind, at);
    }

    pub fn last_fired(&self, kind: EventKind) -> Option<Instant> {
        self.last_fired.get(&kind).copied()
    }

    pub fn event_duration(&self, kind: EventKind, now: Instant) -> f64 {
        seconds_since(self.last_fired(kind), now)
    }
}
