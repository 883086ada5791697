//! Bounded operational log
//!
//! Gaps in the metric history and delivery problems are kept here so
//! operators can reconstruct what the engine did not do.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalEventKind {
    CollectionSkipped,
    DispatchFailed,
    TaskFailed,
    SubsystemDisabled,
    TaskAbandoned,
    SamplesMissed,
    PersistenceFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: OperationalEventKind,
    /// Task, category or channel the event concerns
    pub subject: String,
    pub detail: String,
}

pub struct OperationalLog {
    capacity: usize,
    events: Mutex<VecDeque<OperationalEvent>>,
}

impl OperationalLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, kind: OperationalEventKind, subject: impl Into<String>, detail: impl Into<String>) {
        let event = OperationalEvent {
            timestamp: Utc::now(),
            kind,
            subject: subject.into(),
            detail: detail.into(),
        };

        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Oldest first
    pub fn events(&self) -> Vec<OperationalEvent> {
        match self.events.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn events_of(&self, kind: OperationalEventKind) -> Vec<OperationalEvent> {
        self.events().into_iter().filter(|event| event.kind == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
