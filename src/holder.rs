//! Content holder.
//!
//! Owns the single current snapshot, a generation gate and the terminated
//! flag. All three live under one mutex; a condition variable broadcasts every
//! generation advance. Waiters block on "generation > G" where G is the
//! generation they observed, so a waiter arriving just after a release never
//! wakes on it, and a release racing a waiter's registration is never lost
//! (the check and the wait happen under the same lock).

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::content::BroadcastContent;
use crate::error::{BroadcastError, BroadcastResult, ExecutionError};
use crate::fingerprint::Fingerprint;
use crate::serializer::{JsonSerializer, Serializer};

struct HolderState<C> {
    content: Arc<C>,
    fingerprint: Fingerprint,
    generation: u64,
    terminated: bool,
}

impl<C> HolderState<C> {
    fn observation(&self) -> Observation<C> {
        Observation {
            content: Arc::clone(&self.content),
            fingerprint: self.fingerprint,
            generation: self.generation,
            terminated: self.terminated,
        }
    }
}

/// A consistent view of the holder, taken under the state lock.
#[derive(Debug)]
pub struct Observation<C> {
    /// The snapshot at observation time.
    pub content: Arc<C>,
    /// Fingerprint of `content`.
    pub fingerprint: Fingerprint,
    /// Generation at observation time.
    pub generation: u64,
    /// Whether the holder was terminated.
    pub terminated: bool,
}

impl<C> Clone for Observation<C> {
    fn clone(&self) -> Self {
        Self {
            content: Arc::clone(&self.content),
            fingerprint: self.fingerprint,
            generation: self.generation,
            terminated: self.terminated,
        }
    }
}

/// Result of [`ContentHolder::await_next_generation`].
#[derive(Debug)]
pub enum GenerationOutcome<C> {
    /// The generation advanced past the observed one.
    Changed(Observation<C>),
    /// The holder is terminated. Takes precedence over `Changed`.
    Terminated,
    /// The timeout elapsed first.
    TimedOut,
}

/// Holds the current broadcast content and wakes waiters on change.
pub struct ContentHolder<C, S = JsonSerializer> {
    state: Mutex<HolderState<C>>,
    changed: Condvar,
    serializer: S,
}

impl<C> ContentHolder<C, JsonSerializer>
where
    C: BroadcastContent + Serialize,
{
    /// Creates a holder using the default JSON serializer.
    ///
    /// # Errors
    ///
    /// Returns `SerializationFailed` if `initial` can not be fingerprinted.
    pub fn new(initial: C) -> BroadcastResult<Self> {
        Self::with_serializer(JsonSerializer, initial)
    }
}

impl<C, S> ContentHolder<C, S>
where
    C: BroadcastContent,
    S: Serializer<C>,
{
    /// Creates a holder with a custom serializer.
    ///
    /// # Errors
    ///
    /// Returns `SerializationFailed` if `initial` can not be fingerprinted.
    pub fn with_serializer(serializer: S, initial: C) -> BroadcastResult<Self> {
        let fingerprint = Fingerprint::of(&serializer, &initial)?;
        Ok(Self {
            state: Mutex::new(HolderState {
                content: Arc::new(initial),
                fingerprint,
                generation: 0,
                terminated: false,
            }),
            changed: Condvar::new(),
            serializer,
        })
    }

    // Mutators and readers never leave the state half-written (every fallible
    // step runs before the lock is taken), so a poisoned lock still guards a
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, HolderState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the current content.
    ///
    /// Returns `Ok(true)` if the content was accepted and waiters were
    /// released, `Ok(false)` if the update was a no-op (empty snapshot, or
    /// fingerprint-equal to the current one).
    ///
    /// # Errors
    ///
    /// - `AlreadyTerminated` once [`terminate`](Self::terminate) was called.
    /// - `SerializationFailed` if `content` can not be fingerprinted; the
    ///   holder is left untouched.
    pub fn replace(&self, content: C) -> BroadcastResult<bool> {
        if self.lock().terminated {
            return Err(ExecutionError::AlreadyTerminated.into());
        }
        if content.is_empty() {
            trace!("ignoring empty content update");
            return Ok(false);
        }

        let fingerprint = Fingerprint::of(&self.serializer, &content)?;

        let mut state = self.lock();
        if state.terminated {
            return Err(ExecutionError::AlreadyTerminated.into());
        }
        if state.fingerprint == fingerprint {
            trace!(%fingerprint, "ignoring content update with unchanged fingerprint");
            return Ok(false);
        }

        state.content = Arc::new(content);
        state.fingerprint = fingerprint;
        state.generation += 1;
        let generation = state.generation;
        drop(state);

        self.changed.notify_all();
        debug!(generation, %fingerprint, "broadcast content replaced");
        Ok(true)
    }

    /// Releases all waiters without changing the stored content.
    ///
    /// For content types mutated in place through interior mutability. The
    /// cached fingerprint is recomputed, so relevance reflects the mutation.
    /// If the mutated content no longer serializes, the previous fingerprint
    /// is kept and waiters are still released.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyTerminated` once the holder is terminated.
    pub fn touch(&self) -> BroadcastResult<()> {
        let content = {
            let state = self.lock();
            if state.terminated {
                return Err(ExecutionError::AlreadyTerminated.into());
            }
            Arc::clone(&state.content)
        };
        let fingerprint = match Fingerprint::of(&self.serializer, content.as_ref()) {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!(error = %e, "touched content can not be fingerprinted, keeping previous fingerprint");
                None
            }
        };

        let mut state = self.lock();
        if state.terminated {
            return Err(ExecutionError::AlreadyTerminated.into());
        }
        if let Some(fingerprint) = fingerprint {
            if Arc::ptr_eq(&state.content, &content) {
                state.fingerprint = fingerprint;
            }
        }
        state.generation += 1;
        let generation = state.generation;
        drop(state);

        self.changed.notify_all();
        debug!(generation, "broadcast content touched");
        Ok(())
    }

    /// Permanently closes the holder and wakes every waiter. Idempotent.
    pub fn terminate(&self) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;
        state.generation += 1;
        let generation = state.generation;
        drop(state);

        self.changed.notify_all();
        debug!(generation, "broadcast holder terminated");
    }

    /// Current snapshot.
    #[must_use]
    pub fn read(&self) -> Arc<C> {
        Arc::clone(&self.lock().content)
    }

    /// Fingerprint of the current snapshot.
    #[must_use]
    pub fn fingerprint_of_current(&self) -> Fingerprint {
        self.lock().fingerprint
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Whether [`terminate`](Self::terminate) was called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Snapshot, fingerprint, generation and terminated flag, read atomically.
    #[must_use]
    pub fn observe(&self) -> Observation<C> {
        self.lock().observation()
    }

    /// The serializer associated with this holder.
    pub const fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Serializes arbitrary content with the holder's serializer.
    ///
    /// # Errors
    ///
    /// Returns `SerializationFailed` if `content` can not be serialized.
    pub fn serialize(&self, content: &C) -> BroadcastResult<String> {
        self.serializer.serialize(content)
    }

    /// Fingerprints arbitrary content with the holder's serializer.
    ///
    /// # Errors
    ///
    /// Returns `SerializationFailed` if `content` can not be serialized.
    pub fn fingerprint_of(&self, content: &C) -> BroadcastResult<Fingerprint> {
        Fingerprint::of(&self.serializer, content)
    }

    /// Blocks until the generation advances past `observed`, the holder is
    /// terminated, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `WaitInterrupted` if the wait is aborted abnormally.
    pub fn await_next_generation(&self, observed: u64, timeout: Duration) -> BroadcastResult<GenerationOutcome<C>> {
        self.await_until(observed, Instant::now().checked_add(timeout))
    }

    /// Like [`await_next_generation`](Self::await_next_generation) with an
    /// absolute deadline. `None` waits without a time bound.
    ///
    /// # Errors
    ///
    /// Returns `WaitInterrupted` if the wait is aborted abnormally.
    pub fn await_until(&self, observed: u64, deadline: Option<Instant>) -> BroadcastResult<GenerationOutcome<C>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BroadcastError::interrupted("holder state lock poisoned"))?;

        loop {
            if state.terminated {
                return Ok(GenerationOutcome::Terminated);
            }
            if state.generation > observed {
                return Ok(GenerationOutcome::Changed(state.observation()));
            }

            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .map_err(|_| BroadcastError::interrupted("holder state lock poisoned during wait"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(GenerationOutcome::TimedOut);
                    }
                    let (guard, _) = self
                        .changed
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| BroadcastError::interrupted("holder state lock poisoned during wait"))?;
                    guard
                }
            };
        }
    }
}

impl<C, S> fmt::Debug for ContentHolder<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ContentHolder")
            .field("fingerprint", &state.fingerprint)
            .field("generation", &state.generation)
            .field("terminated", &state.terminated)
            .finish_non_exhaustive()
    }
}
