//! Change feed for observing cached data changes.
//!
//! The change feed emits an event whenever the value an application would
//! read at a path changes, enabling:
//! - Reactive UI updates
//! - Hydrating a view on startup (`fire_initial`)
//! - Surfacing sync conflicts
//!
//! # Usage
//!
//! ```rust
//! use remstore_core::{ChangeEvent, ChangeFeed, ChangeValue, Origin};
//! use remstore_node::Body;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let feed = ChangeFeed::new();
//! let mut rx = feed.subscribe();
//!
//! feed.emit(ChangeEvent::new("/notes/a", Origin::Window)
//!     .with_new(Some(ChangeValue::Document(Body::from("hi"))), None));
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.sequence, 1);
//! # }
//! ```

use parking_lot::RwLock;
use remstore_node::{Body, ItemsMap};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// What caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// An application write through the caching layer.
    Window,
    /// Data already in the local cache (startup replay or eviction).
    Local,
    /// A remote change merged during sync.
    Remote,
    /// A local change discarded in favor of a concurrent remote change.
    Conflict,
}

impl Origin {
    /// Returns the event origin name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Window => "window",
            Origin::Local => "local",
            Origin::Remote => "remote",
            Origin::Conflict => "conflict",
        }
    }
}

/// Value carried by a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeValue {
    /// Document body.
    Document(Body),
    /// Folder listing.
    Folder(ItemsMap),
}

impl ChangeValue {
    /// Wraps a live document body; tombstones become `None`.
    #[must_use]
    pub fn document(body: Option<&Body>) -> Option<Self> {
        body.and_then(Body::live).cloned().map(ChangeValue::Document)
    }

    /// Wraps a listing; empty listings become `None`.
    #[must_use]
    pub fn folder(items: Option<&ItemsMap>) -> Option<Self> {
        items
            .filter(|i| !i.is_empty())
            .cloned()
            .map(ChangeValue::Folder)
    }
}

/// A single change event from the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Sequence number assigned by the feed.
    pub sequence: u64,
    /// Path that changed.
    pub path: String,
    /// What caused the change.
    pub origin: Origin,
    /// Value before the change. `None` if there was none.
    pub old_value: Option<ChangeValue>,
    /// Value after the change. `None` if it was removed.
    pub new_value: Option<ChangeValue>,
    /// Content type before the change.
    pub old_content_type: Option<String>,
    /// Content type after the change.
    pub new_content_type: Option<String>,
}

impl ChangeEvent {
    /// Creates an event with no values.
    pub fn new(path: impl Into<String>, origin: Origin) -> Self {
        Self {
            sequence: 0,
            path: path.into(),
            origin,
            old_value: None,
            new_value: None,
            old_content_type: None,
            new_content_type: None,
        }
    }

    /// Sets the old value and content type.
    #[must_use]
    pub fn with_old(mut self, value: Option<ChangeValue>, content_type: Option<String>) -> Self {
        self.old_value = value;
        self.old_content_type = content_type;
        self
    }

    /// Sets the new value and content type.
    #[must_use]
    pub fn with_new(mut self, value: Option<ChangeValue>, content_type: Option<String>) -> Self {
        self.new_value = value;
        self.new_content_type = content_type;
        self
    }

    /// Returns true if old and new value and content type are equal.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.old_value == self.new_value && self.old_content_type == self.new_content_type
    }
}

/// A change feed that distributes change events to subscribers.
///
/// Events reach every subscriber in emission order. Sequence numbers
/// start at 1 and are assigned under the same lock that fans the event
/// out, so subscribers never see them out of order.
pub struct ChangeFeed {
    state: RwLock<FeedState>,
}

#[derive(Default)]
struct FeedState {
    subscribers: Vec<UnboundedSender<ChangeEvent>>,
    last_sequence: u64,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(FeedState::default()),
        }
    }

    /// Subscribes to the change feed.
    ///
    /// Returns a receiver that will receive all future change events.
    pub fn subscribe(&self) -> UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.write().subscribers.push(tx);
        rx
    }

    /// Assigns the next sequence number and emits the event to all
    /// subscribers.
    ///
    /// Returns the assigned sequence number.
    pub fn emit(&self, mut event: ChangeEvent) -> u64 {
        let mut state = self.state.write();
        state.last_sequence += 1;
        event.sequence = state.last_sequence;
        // Drop disconnected subscribers.
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        event.sequence
    }

    /// Returns the latest sequence number emitted.
    pub fn latest_sequence(&self) -> u64 {
        self.state.read().last_sequence
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("latest_sequence", &self.latest_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent::new(path, Origin::Window)
            .with_new(Some(ChangeValue::Document(Body::from(path))), Some("text/plain".into()))
    }

    #[tokio::test]
    async fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();

        let seq = feed.emit(event("/a"));
        let received = rx.recv().await.unwrap();
        assert_eq!(seq, 1);
        assert_eq!(received.sequence, 1);
        assert_eq!(received.path, "/a");
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let feed = ChangeFeed::new();
        let mut rx1 = feed.subscribe();
        let mut rx2 = feed.subscribe();

        feed.emit(event("/a"));

        assert_eq!(rx1.recv().await.unwrap().path, "/a");
        assert_eq!(rx2.recv().await.unwrap().path, "/a");
    }

    #[test]
    fn subscriber_cleanup() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);

        feed.emit(event("/a"));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn sequence_counts_without_subscribers() {
        let feed = ChangeFeed::new();
        for i in 1..=3 {
            assert_eq!(feed.emit(event(&format!("/{i}"))), i);
        }
        let mut rx = feed.subscribe();
        feed.emit(event("/4"));
        assert_eq!(rx.try_recv().unwrap().sequence, 4);
        assert_eq!(feed.latest_sequence(), 4);
    }

    #[test]
    fn tombstones_and_empty_listings_are_absent() {
        assert!(ChangeValue::document(Some(&Body::Deleted)).is_none());
        assert!(ChangeValue::folder(Some(&ItemsMap::new())).is_none());
        assert!(ChangeEvent::new("/a", Origin::Local).is_noop());
    }
}
