//! Broadcast content.
//!
//! A content snapshot is an immutable value describing server state at one
//! instant. The holder shares snapshots as `Arc<C>` and replaces them
//! wholesale; it never mutates one in place.

/// A snapshot that can be broadcast to long-polling subscribers.
///
/// An empty snapshot is never considered a deliverable update: replacing the
/// current content with an empty one is ignored, and a transform may return an
/// empty snapshot to signal "nothing relevant for this tag".
pub trait BroadcastContent: Send + Sync + 'static {
    /// Returns true if this snapshot carries no deliverable information.
    fn is_empty(&self) -> bool;
}

impl BroadcastContent for String {
    fn is_empty(&self) -> bool {
        String::is_empty(self)
    }
}

impl<T: Send + Sync + 'static> BroadcastContent for Vec<T> {
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl<T: BroadcastContent> BroadcastContent for Option<T> {
    fn is_empty(&self) -> bool {
        self.as_ref().map_or(true, BroadcastContent::is_empty)
    }
}

impl BroadcastContent for serde_json::Value {
    fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::Array(a) => a.is_empty(),
            Self::Object(o) => o.is_empty(),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }
}
