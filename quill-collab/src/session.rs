//! One connected editor.
//!
//! A session is the document actor's view of a websocket connection: an
//! identity, the credentials it arrived with, and an outbound frame
//! channel. The connection task on the other end of the channel owns the
//! actual socket; a closed channel is how a dead transport shows up
//! here, and the send policy treats it as a request to detach.

use std::collections::HashSet;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Capability granting document writes.
pub const ACTION_WRITE: &str = "write";

/// Messages delivered to the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    /// A binary frame to forward to the client.
    Frame(Vec<u8>),
    /// Server-initiated close; the connection task shuts the socket.
    Close,
}

/// A connected editor session.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    auth: Option<String>,
    actions: HashSet<String>,
    outbox: mpsc::UnboundedSender<SessionMessage>,
}

impl Session {
    /// Create a session and the receiving half of its outbox.
    pub fn new(
        auth: Option<String>,
        actions: HashSet<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                auth,
                actions,
                outbox,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Opaque credential forwarded to the content store.
    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    /// Whether this session may modify the document.
    pub fn can_write(&self) -> bool {
        self.actions.contains(ACTION_WRITE)
    }

    /// True while the connection task is still draining the outbox.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }

    /// Queue a frame. Returns false when the transport is gone, in which
    /// case the caller closes and detaches the session.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.outbox.send(SessionMessage::Frame(frame)).is_ok()
    }

    /// Ask the connection task to close the socket.
    pub fn close(&self) {
        let _ = self.outbox.send(SessionMessage::Close);
    }
}

/// Parse a comma-separated capability list.
pub fn parse_actions(header: Option<&str>) -> HashSet<String> {
    match header {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        // The outer router did not restrict this session.
        None => HashSet::from(["read".to_string(), ACTION_WRITE.to_string()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_receive() {
        let (session, mut rx) = Session::new(None, parse_actions(None));
        assert!(session.send(vec![1, 2, 3]));
        assert_eq!(rx.try_recv().unwrap(), SessionMessage::Frame(vec![1, 2, 3]));
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (session, rx) = Session::new(None, parse_actions(None));
        drop(rx);
        assert!(!session.is_open());
        assert!(!session.send(vec![0]));
    }

    #[test]
    fn test_close_delivers_close_message() {
        let (session, mut rx) = Session::new(None, parse_actions(None));
        session.close();
        assert_eq!(rx.try_recv().unwrap(), SessionMessage::Close);
    }

    #[test]
    fn test_default_actions_allow_write() {
        let actions = parse_actions(None);
        let (session, _rx) = Session::new(None, actions);
        assert!(session.can_write());
    }

    #[test]
    fn test_explicit_actions_without_write() {
        let actions = parse_actions(Some("read"));
        let (session, _rx) = Session::new(Some("Bearer t".into()), actions);
        assert!(!session.can_write());
        assert_eq!(session.auth(), Some("Bearer t"));
    }

    #[test]
    fn test_actions_parsing_trims_and_skips_empty() {
        let actions = parse_actions(Some(" read , write ,, "));
        assert!(actions.contains("read"));
        assert!(actions.contains("write"));
        assert_eq!(actions.len(), 2);
    }
}
