//! # longpoll - Long-polling broadcast engine
//!
//! Many independent readers wait for the next meaningful change to a shared,
//! versioned piece of server state instead of polling it. A reader blocks,
//! with a bounded timeout, until the state changes in a way relevant to it,
//! then receives exactly that new state once. Only the latest state is ever
//! visible: this is "latest value wins" notification, not an event log.
//!
//! ## Core Concepts
//!
//! - **ContentHolder**: the current snapshot, a generation gate and a
//!   terminated flag
//! - **Fingerprint**: blake3 digest of a snapshot's serialized form; the only
//!   notion of equality
//! - **Transform**: per-subscriber view applied before relevance is judged
//! - **Subscription**: baseline fingerprint, transform and timeout for one wait
//! - **Outcome**: `Ready`, `TimedOut` or `Closed`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use longpoll::{resolve, ContentHolder, Subscription};
//!
//! let holder = Arc::new(ContentHolder::new("abc123".to_string())?);
//! let baseline = holder.fingerprint_of_current();
//!
//! // Elsewhere: holder.replace("bcd234".to_string())?;
//! let outcome = resolve(&holder, &Subscription::since(baseline).with_timeout(Duration::from_secs(30)))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod content;
pub mod error;
pub mod fingerprint;
pub mod serializer;
pub mod transform;

pub mod coordinator;
pub mod dispatch;
pub mod holder;
pub mod relevance;
pub mod response;

// Re-export primary types at crate root for convenience
pub use content::BroadcastContent;
pub use coordinator::{resolve, Outcome, Payload, Subscription, DEFAULT_TIMEOUT};
pub use dispatch::{PendingOutcome, SubscriptionId, WaitPool, WaitPoolConfig};
pub use error::{BroadcastError, BroadcastResult, ExecutionError, ValidationError};
pub use fingerprint::Fingerprint;
pub use holder::{ContentHolder, GenerationOutcome, Observation};
pub use relevance::{decide, Decision};
pub use response::ResponseParts;
pub use serializer::{JsonSerializer, PrettyJsonSerializer, Serializer};
pub use transform::{Identity, SharedTransform, Transform};

#[cfg(feature = "tokio")]
pub use coordinator::resolve_async;
