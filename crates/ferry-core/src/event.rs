//! Message lifecycle events
//!
//! Routers raise a [`MessageEvent`] on every buffer and transfer state
//! change. Listeners are shared between all routers of a run, so they take
//! `&self` and keep their own interior mutability.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::identity::HostId;
use crate::message::MessageId;

/// Something that happened to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageEvent {
    /// A host created a new message
    Created {
        host: HostId,
        message: MessageId,
        time: SimTime,
    },

    /// A transfer between two hosts started
    TransferStarted {
        from: HostId,
        to: HostId,
        message: MessageId,
        time: SimTime,
    },

    /// A transfer completed
    Transferred {
        from: HostId,
        to: HostId,
        message: MessageId,
        /// The receiver is a final recipient seeing the message for the first time
        first_delivery: bool,
        time: SimTime,
    },

    /// A transfer was aborted before completion
    Aborted {
        from: HostId,
        to: HostId,
        message: MessageId,
        time: SimTime,
    },

    /// A host removed a message from its buffer
    Deleted {
        host: HostId,
        message: MessageId,
        /// Removed by buffer management rather than after a delivery
        dropped: bool,
        time: SimTime,
    },
}

impl MessageEvent {
    /// ID of the message involved
    pub fn message_id(&self) -> &MessageId {
        match self {
            MessageEvent::Created { message, .. }
            | MessageEvent::TransferStarted { message, .. }
            | MessageEvent::Transferred { message, .. }
            | MessageEvent::Aborted { message, .. }
            | MessageEvent::Deleted { message, .. } => message,
        }
    }

    /// Simulated time of the event
    pub fn time(&self) -> SimTime {
        match self {
            MessageEvent::Created { time, .. }
            | MessageEvent::TransferStarted { time, .. }
            | MessageEvent::Transferred { time, .. }
            | MessageEvent::Aborted { time, .. }
            | MessageEvent::Deleted { time, .. } => *time,
        }
    }

    /// Whether this event is a first delivery to a final recipient
    pub fn is_delivery(&self) -> bool {
        matches!(
            self,
            MessageEvent::Transferred {
                first_delivery: true,
                ..
            }
        )
    }
}

/// Receives message lifecycle events
pub trait MessageListener: Send + Sync {
    /// Called for every event raised by a router
    fn on_event(&self, event: &MessageEvent);
}

/// Shared handle to a listener
pub type SharedListener = Arc<dyn MessageListener>;

/// Listener that records every event in order
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<MessageEvent>>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded events
    pub fn events(&self) -> Vec<MessageEvent> {
        self.events.read().clone()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Number of first deliveries recorded
    pub fn deliveries(&self) -> usize {
        self.events.read().iter().filter(|e| e.is_delivery()).count()
    }

    /// Forget all recorded events
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl MessageListener for EventLog {
    fn on_event(&self, event: &MessageEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_records_in_order() {
        let log = Arc::new(EventLog::new());
        let listener: SharedListener = log.clone();

        listener.on_event(&MessageEvent::Created {
            host: HostId(0),
            message: MessageId::from("M1"),
            time: 0.0,
        });
        listener.on_event(&MessageEvent::Transferred {
            from: HostId(0),
            to: HostId(1),
            message: MessageId::from("M1"),
            first_delivery: true,
            time: 3.0,
        });

        assert_eq!(log.len(), 2);
        assert_eq!(log.deliveries(), 1);
        let events = log.events();
        assert_eq!(events[1].time(), 3.0);
        assert_eq!(events[0].message_id().as_str(), "M1");

        log.clear();
        assert!(log.is_empty());
    }
}
