//! Relevance evaluation.
//!
//! Decides whether a subscriber should be unblocked by the holder's current
//! content, given the fingerprint of what the subscriber already has (if it
//! stated one) and its transform. Runs on the fast path and after every
//! wakeup on the slow path.

use std::sync::Arc;

use crate::content::BroadcastContent;
use crate::error::BroadcastResult;
use crate::fingerprint::Fingerprint;
use crate::serializer::Serializer;
use crate::transform::SharedTransform;

/// Outcome of a relevance evaluation.
#[derive(Debug)]
pub enum Decision<C> {
    /// Unblock the subscriber with this (transformed) content.
    Deliver(Arc<C>),
    /// Nothing new for this subscriber.
    Withhold,
}

impl<C> Decision<C> {
    /// Returns true for `Deliver`.
    #[must_use]
    pub const fn is_deliver(&self) -> bool {
        matches!(self, Self::Deliver(_))
    }
}

/// Evaluates relevance of `current` for a subscriber.
///
/// 1. The candidate is `transform(current, tag)`.
/// 2. Without an expected fingerprint the candidate is delivered as is, even
///    when empty: the subscriber asked for "whatever happens next" and the
///    caller only evaluates after something happened.
/// 3. An empty candidate is withheld.
/// 4. A candidate whose fingerprint equals `expected` is withheld.
/// 5. Anything else is delivered.
///
/// # Errors
///
/// Returns `SerializationFailed` if the candidate can not be fingerprinted.
pub fn decide<C, S>(
    expected: Option<&Fingerprint>,
    current: &Arc<C>,
    transform: &SharedTransform<C>,
    tag: Option<&str>,
    serializer: &S,
) -> BroadcastResult<Decision<C>>
where
    C: BroadcastContent,
    S: Serializer<C> + ?Sized,
{
    let candidate = transform.apply(current, tag);

    let Some(expected) = expected else {
        return Ok(Decision::Deliver(candidate));
    };

    if candidate.is_empty() {
        return Ok(Decision::Withhold);
    }

    if Fingerprint::of(serializer, candidate.as_ref())? == *expected {
        return Ok(Decision::Withhold);
    }

    Ok(Decision::Deliver(candidate))
}
