//! Fan-out of lobby state changes to connected members.
//!
//! The lobby core only ever talks to a [`Notifier`]; the live transport
//! (an SSE stream per member) sits behind [`EventHub`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    UsersUpdate,
    PlaylistUpdate,
    VideoUpdate,
    VoteSkipUpdate,
    VoteSkipEnd,
    VoteMuteUpdate,
    VoteMuteEnd,
    LobbyExpired,
    Redirect,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::UsersUpdate    => "users_update",
            EventKind::PlaylistUpdate => "playlist_update",
            EventKind::VideoUpdate    => "video_update",
            EventKind::VoteSkipUpdate => "vote_skip_update",
            EventKind::VoteSkipEnd    => "vote_skip_end",
            EventKind::VoteMuteUpdate => "vote_mute_update",
            EventKind::VoteMuteEnd    => "vote_mute_end",
            EventKind::LobbyExpired   => "lobby_expired",
            EventKind::Redirect       => "redirect",
        }
    }
}

/// A named event with an opaque (usually JSON) payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub data: String,
}

impl Event {
    pub fn new(kind: EventKind, data: impl Into<String>) -> Self {
        Self { kind, data: data.into() }
    }

    pub fn empty(kind: EventKind) -> Self {
        Self::new(kind, String::new())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
}

pub fn toast(message: &str, kind: ToastKind) -> String {
    let kind = match kind {
        ToastKind::Success => "success",
        ToastKind::Error   => "error",
    };
    json!({ "toast": { "message": message, "type": kind } }).to_string()
}

/// Work queued by the lobby while it mutates state; flushed afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Send { to: String, event: Event },
    Close { to: String },
}

/// Delivery collaborator. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, member: &str, event: &Event);
    fn disconnect(&self, member: &str);
    fn is_connected(&self, member: &str) -> bool;
}

pub fn deliver(notifier: &dyn Notifier, notices: Vec<Notice>) {
    for notice in notices {
        match notice {
            Notice::Send { to, event } => notifier.notify(&to, &event),
            Notice::Close { to }       => notifier.disconnect(&to),
        }
    }
}

pub type EventTx = mpsc::Sender<Event>;
pub type EventRx = mpsc::Receiver<Event>;

/* ------------ live channels, one per member ------------ */
#[derive(Clone)]
pub struct EventHub {
    depth:    usize,
    channels: Arc<Mutex<HashMap<String, EventTx>>>,
}

impl EventHub {
    pub fn new(depth: usize) -> Self {
        Self { depth, channels: Arc::default() }
    }

    /// Opens (or replaces) the live channel for `member`.
    pub fn connect(&self, member: &str) -> EventRx {
        let (tx, rx) = mpsc::channel(self.depth);
        if let Ok(mut m) = self.channels.lock() {
            m.insert(member.to_string(), tx);
        }
        rx
    }

    /// Ends every open stream.
    pub fn close_all(&self) {
        if let Ok(mut m) = self.channels.lock() {
            m.clear();
        }
    }
}

impl Notifier for EventHub {
    fn notify(&self, member: &str, event: &Event) {
        let Ok(mut m) = self.channels.lock() else { return };
        let Some(tx) = m.get(member) else { return };
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(user.id = %member, event = event.kind.as_str(), "recipient lagging, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                m.remove(member);
            }
        }
    }

    fn disconnect(&self, member: &str) {
        if let Ok(mut m) = self.channels.lock() {
            m.remove(member);
        }
    }

    fn is_connected(&self, member: &str) -> bool {
        self.channels
            .lock()
            .map(|m| m.get(member).is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_skips_members_without_a_channel() {
        let hub = EventHub::new(4);
        hub.notify("ghost", &Event::empty(EventKind::UsersUpdate));
        assert!(!hub.is_connected("ghost"));
    }

    #[tokio::test]
    async fn hub_drops_events_when_recipient_is_full() {
        let hub = EventHub::new(1);
        let mut rx = hub.connect("u1");
        hub.notify("u1", &Event::new(EventKind::VideoUpdate, "a"));
        hub.notify("u1", &Event::new(EventKind::VideoUpdate, "b"));
        assert_eq!(rx.recv().await.unwrap().data, "a");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_ends_the_stream() {
        let hub = EventHub::new(4);
        let mut rx = hub.connect("u1");
        hub.notify("u1", &Event::empty(EventKind::Redirect));
        hub.disconnect("u1");
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Redirect);
        assert!(rx.recv().await.is_none());
        assert!(!hub.is_connected("u1"));
    }

    #[tokio::test]
    async fn close_all_ends_every_stream() {
        let hub = EventHub::new(4);
        let mut a = hub.connect("a");
        let mut b = hub.connect("b");
        hub.close_all();
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
    }

    #[test]
    fn toast_payload_shape() {
        let v: serde_json::Value = serde_json::from_str(&toast("Vote to skip passed!", ToastKind::Success)).unwrap();
        assert_eq!(v["toast"]["message"], "Vote to skip passed!");
        assert_eq!(v["toast"]["type"], "success");
    }
}
