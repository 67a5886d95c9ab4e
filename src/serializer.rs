//! Serializer capability.
//!
//! The serializer is used for two things: computing content fingerprints and
//! producing the payload body handed to the transport layer. It must be
//! deterministic (same value, same bytes), otherwise fingerprint-based
//! relevance breaks.

use serde::Serialize;

use crate::error::{BroadcastError, BroadcastResult};

/// Deterministic serialization of broadcast content.
pub trait Serializer<C: ?Sized>: Send + Sync {
    /// Serializes `content` to its wire representation.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::SerializationFailed` if the value can not be
    /// represented.
    fn serialize(&self, content: &C) -> BroadcastResult<String>;
}

/// Default serializer: compact JSON via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl<C: Serialize + ?Sized> Serializer<C> for JsonSerializer {
    fn serialize(&self, content: &C) -> BroadcastResult<String> {
        serde_json::to_string(content).map_err(|e| BroadcastError::serialization(e.to_string()))
    }
}

/// Pretty-printed JSON. Deterministic as long as the value's map ordering is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrettyJsonSerializer;

impl<C: Serialize + ?Sized> Serializer<C> for PrettyJsonSerializer {
    fn serialize(&self, content: &C) -> BroadcastResult<String> {
        serde_json::to_string_pretty(content).map_err(|e| BroadcastError::serialization(e.to_string()))
    }
}
