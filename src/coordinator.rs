//! Wait coordination.
//!
//! A subscription is resolved in two phases. The fast path answers without
//! blocking: a terminated holder yields `Closed`, and a subscriber whose
//! baseline already differs from the (transformed) current content gets it
//! immediately, as does a synced subscriber when that content is non-empty.
//! Only when the fast path withholds does the slow path block on
//! the holder's generation gate, re-evaluating relevance against the latest
//! snapshot after every wakeup until something relevant arrives, the holder
//! is terminated, or the subscription's budget runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::content::BroadcastContent;
use crate::error::BroadcastResult;
use crate::fingerprint::Fingerprint;
use crate::holder::{ContentHolder, GenerationOutcome};
use crate::relevance::{decide, Decision};
use crate::serializer::Serializer;
use crate::transform::{SharedTransform, Transform};

/// Default long-poll budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the subscriber claims to already have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Baseline {
    /// Only interested in what happens next.
    NextUpdate,
    /// Has nothing yet: take the current content if there is any, otherwise
    /// the next change.
    Synced,
    /// Has the content with this fingerprint.
    Known(Fingerprint),
}

/// A single wait request: baseline, transform and timeout.
#[derive(Debug)]
pub struct Subscription<C> {
    baseline: Baseline,
    transform: SharedTransform<C>,
    tag: Option<String>,
    timeout: Duration,
}

impl<C> Clone for Subscription<C> {
    fn clone(&self) -> Self {
        Self {
            baseline: self.baseline,
            transform: self.transform.clone(),
            tag: self.tag.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C: BroadcastContent> Subscription<C> {
    /// Waits for the next content change, whatever the current content is.
    #[must_use]
    pub fn next_update() -> Self {
        Self {
            baseline: Baseline::NextUpdate,
            transform: SharedTransform::identity(),
            tag: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolves as soon as the content differs from `baseline`.
    #[must_use]
    pub fn since(baseline: Fingerprint) -> Self {
        Self {
            baseline: Baseline::Known(baseline),
            ..Self::next_update()
        }
    }

    /// Synced update for a subscriber holding nothing yet.
    ///
    /// Non-empty current content is answered right away. Otherwise the
    /// subscription waits and takes whatever the next change brings.
    #[must_use]
    pub fn synced() -> Self {
        Self {
            baseline: Baseline::Synced,
            ..Self::next_update()
        }
    }

    /// Builds a subscription from a client-supplied hash: an empty string
    /// asks for a synced update, anything else must parse as a fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFingerprint` for non-empty text that is not a
    /// fingerprint.
    pub fn from_hash(hash: &str) -> BroadcastResult<Self> {
        if hash.is_empty() {
            return Ok(Self::synced());
        }
        Ok(Self::since(hash.parse()?))
    }

    /// Resolves as soon as the transformed content differs from `baseline`.
    #[must_use]
    pub fn transformed<T>(baseline: Fingerprint, transform: T, tag: impl Into<String>) -> Self
    where
        T: Transform<C> + 'static,
    {
        Self::since(baseline).with_transform(transform, Some(tag.into()))
    }

    /// Synced update on the transformed view; see [`synced`](Self::synced).
    #[must_use]
    pub fn synced_transformed<T>(transform: T, tag: impl Into<String>) -> Self
    where
        T: Transform<C> + 'static,
    {
        Self::synced().with_transform(transform, Some(tag.into()))
    }

    /// Replaces the transform and its tag.
    #[must_use]
    pub fn with_transform<T>(mut self, transform: T, tag: Option<String>) -> Self
    where
        T: Transform<C> + 'static,
    {
        self.transform = SharedTransform::new(transform);
        self.tag = tag;
        self
    }
}

impl<C> Subscription<C> {
    /// Sets the long-poll budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The stated baseline, if any.
    #[must_use]
    pub const fn baseline(&self) -> Option<&Fingerprint> {
        match &self.baseline {
            Baseline::Known(fingerprint) => Some(fingerprint),
            Baseline::NextUpdate | Baseline::Synced => None,
        }
    }

    /// Whether this is a synced update.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        matches!(self.baseline, Baseline::Synced)
    }

    /// The transform tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The transform applied before relevance is judged.
    #[must_use]
    pub const fn transform(&self) -> &SharedTransform<C> {
        &self.transform
    }

    /// The long-poll budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute deadline for a subscription starting now.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(self.timeout)
    }
}

/// A delivered update.
#[derive(Debug)]
pub struct Payload<C> {
    /// The transformed snapshot.
    pub content: Arc<C>,
    /// `content` serialized with the holder's serializer.
    pub body: String,
    /// Fingerprint of `body`; what the subscriber echoes back next time.
    pub fingerprint: Fingerprint,
}

impl<C> Clone for Payload<C> {
    fn clone(&self) -> Self {
        Self {
            content: Arc::clone(&self.content),
            body: self.body.clone(),
            fingerprint: self.fingerprint,
        }
    }
}

/// Terminal outcome of a subscription.
#[derive(Debug)]
pub enum Outcome<C> {
    /// Something relevant arrived.
    Ready(Payload<C>),
    /// The budget ran out first.
    TimedOut,
    /// The holder is terminated; no more updates will ever come.
    Closed,
}

impl<C> Clone for Outcome<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Ready(p) => Self::Ready(p.clone()),
            Self::TimedOut => Self::TimedOut,
            Self::Closed => Self::Closed,
        }
    }
}

impl<C> Outcome<C> {
    /// Returns true for `Ready`.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns true for `TimedOut`.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Returns true for `Closed`.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The delivered payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&Payload<C>> {
        match self {
            Self::Ready(p) => Some(p),
            Self::TimedOut | Self::Closed => None,
        }
    }

    /// Consumes the outcome, returning the payload if any.
    #[must_use]
    pub fn into_payload(self) -> Option<Payload<C>> {
        match self {
            Self::Ready(p) => Some(p),
            Self::TimedOut | Self::Closed => None,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::TimedOut => "timed_out",
            Self::Closed => "closed",
        }
    }
}

/// Result of the non-blocking phase.
#[derive(Debug)]
pub(crate) enum FastPath<C> {
    Resolved(Outcome<C>),
    /// Nothing to deliver yet; wait for generations after this one.
    Pending { generation: u64 },
}

fn payload<C, S>(holder: &ContentHolder<C, S>, content: Arc<C>) -> BroadcastResult<Payload<C>>
where
    C: BroadcastContent,
    S: Serializer<C>,
{
    let body = holder.serialize(&content)?;
    let fingerprint = Fingerprint::of_bytes(body.as_bytes());
    Ok(Payload { content, body, fingerprint })
}

pub(crate) fn fast_path<C, S>(holder: &ContentHolder<C, S>, subscription: &Subscription<C>) -> BroadcastResult<FastPath<C>>
where
    C: BroadcastContent,
    S: Serializer<C>,
{
    let obs = holder.observe();
    if obs.terminated {
        trace!("fast path: holder terminated");
        return Ok(FastPath::Resolved(Outcome::Closed));
    }

    let baseline = match &subscription.baseline {
        // Without a baseline the subscriber has not missed anything yet.
        Baseline::NextUpdate => {
            return Ok(FastPath::Pending {
                generation: obs.generation,
            })
        }
        Baseline::Synced => {
            let candidate = subscription.transform().apply(&obs.content, subscription.tag());
            if candidate.is_empty() {
                return Ok(FastPath::Pending {
                    generation: obs.generation,
                });
            }
            trace!(generation = obs.generation, "fast path: synced subscriber, answering synchronously");
            return Ok(FastPath::Resolved(Outcome::Ready(payload(holder, candidate)?)));
        }
        Baseline::Known(fingerprint) => fingerprint,
    };

    match decide(
        Some(baseline),
        &obs.content,
        subscription.transform(),
        subscription.tag(),
        holder.serializer(),
    )? {
        Decision::Deliver(candidate) => {
            trace!(generation = obs.generation, "fast path: subscriber is behind, answering synchronously");
            Ok(FastPath::Resolved(Outcome::Ready(payload(holder, candidate)?)))
        }
        Decision::Withhold => Ok(FastPath::Pending {
            generation: obs.generation,
        }),
    }
}

pub(crate) fn slow_path<C, S>(
    holder: &ContentHolder<C, S>,
    subscription: &Subscription<C>,
    observed: u64,
    deadline: Option<Instant>,
) -> BroadcastResult<Outcome<C>>
where
    C: BroadcastContent,
    S: Serializer<C>,
{
    let mut observed = observed;
    loop {
        match holder.await_until(observed, deadline)? {
            GenerationOutcome::Terminated => return Ok(Outcome::Closed),
            GenerationOutcome::TimedOut => return Ok(Outcome::TimedOut),
            GenerationOutcome::Changed(obs) => {
                observed = obs.generation;
                match decide(
                    subscription.baseline(),
                    &obs.content,
                    subscription.transform(),
                    subscription.tag(),
                    holder.serializer(),
                )? {
                    Decision::Deliver(candidate) => {
                        if holder.is_terminated() {
                            return Ok(Outcome::Closed);
                        }
                        return Ok(Outcome::Ready(payload(holder, candidate)?));
                    }
                    Decision::Withhold => {
                        trace!(generation = observed, "slow path: change not relevant, waiting again");
                    }
                }
            }
        }
    }
}

/// Non-blocking final check for a subscription whose budget ran out before a
/// wait worker got to it: anything relevant after `observed` still counts.
pub(crate) fn settle<C, S>(
    holder: &ContentHolder<C, S>,
    subscription: &Subscription<C>,
    observed: u64,
) -> BroadcastResult<Outcome<C>>
where
    C: BroadcastContent,
    S: Serializer<C>,
{
    let obs = holder.observe();
    if obs.terminated {
        return Ok(Outcome::Closed);
    }
    if obs.generation <= observed {
        return Ok(Outcome::TimedOut);
    }
    match decide(
        subscription.baseline(),
        &obs.content,
        subscription.transform(),
        subscription.tag(),
        holder.serializer(),
    )? {
        Decision::Deliver(candidate) => Ok(Outcome::Ready(payload(holder, candidate)?)),
        Decision::Withhold => Ok(Outcome::TimedOut),
    }
}

/// Resolves a subscription against `holder`, blocking the calling thread on
/// the slow path for at most the subscription's timeout.
///
/// # Errors
///
/// - `SerializationFailed` if a candidate or payload can not be serialized.
/// - `WaitInterrupted` if the blocking wait is aborted abnormally.
pub fn resolve<C, S>(holder: &ContentHolder<C, S>, subscription: &Subscription<C>) -> BroadcastResult<Outcome<C>>
where
    C: BroadcastContent,
    S: Serializer<C>,
{
    let deadline = subscription.deadline();
    let outcome = match fast_path(holder, subscription)? {
        FastPath::Resolved(outcome) => outcome,
        FastPath::Pending { generation } => slow_path(holder, subscription, generation, deadline)?,
    };
    debug!(outcome = outcome.label(), "subscription resolved");
    Ok(outcome)
}

/// Async variant of [`resolve`]: the fast path runs inline, the slow path on
/// tokio's blocking pool.
///
/// # Errors
///
/// As [`resolve`]; additionally `WaitInterrupted` if the blocking task
/// panicked or was cancelled.
#[cfg(feature = "tokio")]
pub async fn resolve_async<C, S>(
    holder: Arc<ContentHolder<C, S>>,
    subscription: Subscription<C>,
) -> BroadcastResult<Outcome<C>>
where
    C: BroadcastContent,
    S: Serializer<C> + 'static,
{
    let deadline = subscription.deadline();
    let generation = match fast_path(&*holder, &subscription)? {
        FastPath::Resolved(outcome) => return Ok(outcome),
        FastPath::Pending { generation } => generation,
    };

    let outcome = tokio::task::spawn_blocking(move || slow_path(&*holder, &subscription, generation, deadline))
        .await
        .map_err(|e| crate::error::BroadcastError::interrupted(e.to_string()))??;
    debug!(outcome = outcome.label(), "subscription resolved");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;

    use serde::Serialize;

    fn holder(s: &str) -> Arc<ContentHolder<String>> {
        Arc::new(ContentHolder::new(s.to_string()).unwrap())
    }

    fn eraser(content: &Arc<String>, tag: Option<&str>) -> Arc<String> {
        match tag {
            Some(t) if content.contains(t) => Arc::clone(content),
            _ => Arc::new(String::new()),
        }
    }

    fn replace_later(h: &Arc<ContentHolder<String>>, s: &'static str, after: Duration) -> thread::JoinHandle<()> {
        let h = Arc::clone(h);
        thread::spawn(move || {
            thread::sleep(after);
            h.replace(s.to_string()).unwrap();
        })
    }

    #[test]
    fn terminated_holder_closes_without_blocking() {
        let h = holder("abc123");
        h.terminate();
        let started = Instant::now();

        let out = resolve(&h, &Subscription::next_update().with_timeout(Duration::from_secs(5))).unwrap();
        assert!(out.is_closed());
        let out = resolve(&h, &Subscription::since(h.fingerprint_of_current()).with_timeout(Duration::from_secs(5)))
            .unwrap();
        assert!(out.is_closed());

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn behind_subscriber_takes_fast_path() {
        let h = holder("bcd234");
        let stale = h.fingerprint_of(&"abc123".to_string()).unwrap();
        let started = Instant::now();

        let out = resolve(&h, &Subscription::since(stale).with_timeout(Duration::from_secs(30))).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        let payload = out.into_payload().unwrap();
        assert_eq!(*payload.content, "bcd234");
        assert_eq!(payload.body, r#""bcd234""#);
        assert_eq!(payload.fingerprint, h.fingerprint_of_current());
    }

    #[test]
    fn up_to_date_subscriber_times_out() {
        let h = holder("abc123");
        let sub = Subscription::since(h.fingerprint_of_current()).with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let out = resolve(&h, &sub).unwrap();
        assert!(out.is_timed_out());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn hashless_subscriber_waits_for_next_change() {
        let h = holder("abc123");
        let updater = replace_later(&h, "bcd234", Duration::from_millis(50));
        let out = resolve(&h, &Subscription::next_update().with_timeout(Duration::from_secs(5))).unwrap();
        updater.join().unwrap();
        assert_eq!(*out.into_payload().unwrap().content, "bcd234");
    }

    #[test]
    fn hashless_subscriber_is_woken_by_touch() {
        let h = holder("abc123");
        let toucher = {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                h.touch().unwrap();
            })
        };
        let out = resolve(&h, &Subscription::next_update().with_timeout(Duration::from_secs(5))).unwrap();
        toucher.join().unwrap();
        assert_eq!(*out.into_payload().unwrap().content, "abc123");
    }

    #[test]
    fn baseline_subscriber_ignores_touch() {
        let h = holder("abc123");
        let sub = Subscription::since(h.fingerprint_of_current()).with_timeout(Duration::from_millis(200));
        let toucher = {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                h.touch().unwrap();
            })
        };
        let out = resolve(&h, &sub).unwrap();
        toucher.join().unwrap();
        assert!(out.is_timed_out());
    }

    #[test]
    fn irrelevant_generations_are_skipped() {
        let h = holder("a");
        let baseline = h.fingerprint_of(&"xyz".to_string()).unwrap();
        let sub = Subscription::transformed(baseline, eraser, "x").with_timeout(Duration::from_secs(5));

        let updater = {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                h.replace("b".to_string()).unwrap();
                thread::sleep(Duration::from_millis(30));
                h.replace("xyz".to_string()).unwrap();
                thread::sleep(Duration::from_millis(30));
                h.replace("x-2".to_string()).unwrap();
            })
        };

        let out = resolve(&h, &sub).unwrap();
        updater.join().unwrap();
        assert_eq!(*out.into_payload().unwrap().content, "x-2");
    }

    #[test]
    fn terminate_during_wait_closes() {
        let h = holder("abc123");
        let terminator = {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                h.terminate();
            })
        };
        let sub = Subscription::since(h.fingerprint_of_current()).with_timeout(Duration::from_secs(5));
        let out = resolve(&h, &sub).unwrap();
        terminator.join().unwrap();
        assert!(out.is_closed());
    }

    #[test]
    fn empty_transform_result_is_never_delivered_with_baseline() {
        let h = holder("abc123");
        let zapper = |_: &Arc<String>, _: Option<&str>| Arc::new(String::new());
        let sub = Subscription::transformed(h.fingerprint_of(&"other".to_string()).unwrap(), zapper, "ignored")
            .with_timeout(Duration::from_millis(100));
        let out = resolve(&h, &sub).unwrap();
        assert!(out.is_timed_out());
    }

    #[test]
    fn synced_subscriber_gets_current_content_immediately() {
        let h = holder("abc123");
        let started = Instant::now();
        let out = resolve(&h, &Subscription::synced().with_timeout(Duration::from_secs(30))).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        let payload = out.into_payload().unwrap();
        assert_eq!(*payload.content, "abc123");
        assert_eq!(payload.fingerprint, h.fingerprint_of_current());
    }

    #[test]
    fn synced_subscriber_with_empty_view_takes_next_change() {
        let h = holder("abc123");
        let sub = Subscription::synced_transformed(eraser, "x").with_timeout(Duration::from_secs(5));

        // Nothing for "x" yet, so no synchronous answer.
        assert!(matches!(fast_path(&h, &sub).unwrap(), FastPath::Pending { generation: 0 }));

        let updater = replace_later(&h, "bcd234", Duration::from_millis(50));
        let out = resolve(&h, &sub).unwrap();
        updater.join().unwrap();

        // Any change is delivered, even when the view stays empty.
        let payload = out.into_payload().unwrap();
        assert!(payload.content.is_empty());
        assert_eq!(h.generation(), 1);
    }

    #[test]
    fn synced_subscriber_with_matching_view_is_answered_on_fast_path() {
        let h = holder("x-1");
        let sub = Subscription::synced_transformed(eraser, "x").with_timeout(Duration::from_secs(30));
        let FastPath::Resolved(out) = fast_path(&h, &sub).unwrap() else {
            panic!("expected a synchronous answer");
        };
        assert_eq!(*out.into_payload().unwrap().content, "x-1");
    }

    #[test]
    fn client_hash_selects_baseline() {
        let h = holder("abc123");
        assert!(Subscription::<String>::from_hash("").unwrap().is_synced());

        let current = h.fingerprint_of_current();
        let sub = Subscription::<String>::from_hash(&current.to_string()).unwrap();
        assert!(!sub.is_synced());
        assert_eq!(sub.baseline(), Some(&current));

        assert!(Subscription::<String>::from_hash("nope").unwrap_err().is_validation());
    }

    /// Content mutated in place; deliberately not `Clone`.
    #[derive(Serialize)]
    struct Roster(Mutex<Vec<String>>);

    impl BroadcastContent for Roster {
        fn is_empty(&self) -> bool {
            self.0.lock().unwrap().is_empty()
        }
    }

    #[test]
    fn touch_after_in_place_mutation_releases_baseline_subscriber() {
        let h = Arc::new(ContentHolder::new(Roster(Mutex::new(vec!["ada".to_string()]))).unwrap());
        let old = h.fingerprint_of_current();
        let sub = Subscription::since(old).with_timeout(Duration::from_secs(5));

        let mutator = {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                h.read().0.lock().unwrap().push("bob".to_string());
                h.touch().unwrap();
            })
        };
        let out = resolve(&h, &sub).unwrap();
        mutator.join().unwrap();

        let payload = out.into_payload().unwrap();
        assert_eq!(payload.body, r#"["ada","bob"]"#);
        assert_ne!(h.fingerprint_of_current(), old);
        assert_eq!(payload.fingerprint, h.fingerprint_of_current());
    }

    #[test]
    fn subscriptions_and_outcomes_clone_without_cloneable_content() {
        let h = ContentHolder::new(Roster(Mutex::new(vec!["ada".to_string()]))).unwrap();
        let stale = Fingerprint::of_bytes(b"stale");
        let sub = Subscription::<Roster>::since(stale).with_timeout(Duration::from_secs(1));
        let copy = sub.clone();
        assert_eq!(copy.baseline(), Some(&stale));
        assert_eq!(copy.timeout(), sub.timeout());

        let out = resolve(&h, &copy).unwrap();
        let again = out.clone();
        assert!(Arc::ptr_eq(&out.payload().unwrap().content, &again.payload().unwrap().content));
    }

    #[test]
    fn settle_reports_relevant_change_after_observed_generation() {
        let h = holder("abc123");
        let sub = Subscription::since(h.fingerprint_of_current());
        assert!(settle(&h, &sub, 0).unwrap().is_timed_out());

        h.touch().unwrap();
        assert!(settle(&h, &sub, 0).unwrap().is_timed_out());

        h.replace("bcd234".to_string()).unwrap();
        assert_eq!(*settle(&h, &sub, 0).unwrap().into_payload().unwrap().content, "bcd234");

        h.terminate();
        assert!(settle(&h, &sub, 0).unwrap().is_closed());
    }

    #[cfg(feature = "tokio")]
    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_async_delivers_change() {
        let h = holder("abc123");
        let sub = Subscription::since(h.fingerprint_of_current()).with_timeout(Duration::from_secs(5));
        let updater = replace_later(&h, "bcd234", Duration::from_millis(50));
        let out = resolve_async(Arc::clone(&h), sub).await.unwrap();
        updater.join().unwrap();
        assert_eq!(*out.into_payload().unwrap().content, "bcd234");
    }
}
