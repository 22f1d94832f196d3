//! Local applications that see messages as they arrive

use ferry_core::{HostId, Message};

/// A local application attached to a router
///
/// Every message that finishes arriving passes through the handlers whose
/// application ID matches the message's. A handler may pass the message on
/// unchanged, return a transformed message, or swallow it by returning
/// `None`.
pub trait MessageHandler: Send {
    /// Application ID this handler serves, `None` for all messages
    fn app_id(&self) -> Option<&str> {
        None
    }

    /// Process an arriving message at `host`
    fn handle(&mut self, message: Message, host: HostId) -> Option<Message>;

    /// Fresh handler for another host
    fn replicate(&self) -> Box<dyn MessageHandler>;

    /// Whether this handler wants messages for `app_id`
    fn serves(&self, app_id: Option<&str>) -> bool {
        match self.app_id() {
            None => true,
            Some(mine) => app_id == Some(mine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink;

    impl MessageHandler for Sink {
        fn app_id(&self) -> Option<&str> {
            Some("sink")
        }

        fn handle(&mut self, _message: Message, _host: HostId) -> Option<Message> {
            None
        }

        fn replicate(&self) -> Box<dyn MessageHandler> {
            Box::new(Sink)
        }
    }

    #[test]
    fn test_handler_selection_by_app_id() {
        let sink = Sink;
        assert!(sink.serves(Some("sink")));
        assert!(!sink.serves(Some("other")));
        assert!(!sink.serves(None));
    }
}
