//! Per-subscriber content transforms.
//!
//! A transform maps the holder's current snapshot to the view a particular
//! subscriber should see (filtering, redaction, topic matching). It is applied
//! before relevance is judged and before the payload is serialized, so the
//! holder never needs to know about subscribers.

use std::fmt;
use std::sync::Arc;

/// A pure view function `(content, tag) -> content`.
///
/// Implementations must not have side effects. Returning an empty snapshot
/// signals "nothing relevant for this tag".
pub trait Transform<C>: Send + Sync {
    /// Produces the subscriber-specific view of `content`.
    fn transform(&self, content: &Arc<C>, tag: Option<&str>) -> Arc<C>;
}

/// The default transform: tag ignored, output is the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl<C: Send + Sync> Transform<C> for Identity {
    fn transform(&self, content: &Arc<C>, _tag: Option<&str>) -> Arc<C> {
        Arc::clone(content)
    }
}

impl<C, F> Transform<C> for F
where
    F: Fn(&Arc<C>, Option<&str>) -> Arc<C> + Send + Sync,
{
    fn transform(&self, content: &Arc<C>, tag: Option<&str>) -> Arc<C> {
        self(content, tag)
    }
}

/// Shared, type-erased transform carried by a subscription.
pub struct SharedTransform<C>(Arc<dyn Transform<C>>);

impl<C> Clone for SharedTransform<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C: Send + Sync + 'static> SharedTransform<C> {
    /// Wraps a transform.
    pub fn new<T: Transform<C> + 'static>(transform: T) -> Self {
        Self(Arc::new(transform))
    }

    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Identity)
    }
}

impl<C> SharedTransform<C> {
    /// Applies the wrapped transform.
    #[must_use]
    pub fn apply(&self, content: &Arc<C>, tag: Option<&str>) -> Arc<C> {
        self.0.transform(content, tag)
    }
}

impl<C: Send + Sync + 'static> Default for SharedTransform<C> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<C> fmt::Debug for SharedTransform<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedTransform")
    }
}
