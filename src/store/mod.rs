//! Scripted KV primitives
//!
//! The hot store is the primary synchronizer of the whole engine:
//! every invariant that matters under concurrency is enforced inside
//! an atomic server-side script, never by application locks.
//!
//! [`HotStore`] is the seam. The shipped backend is [`MemoryStore`],
//! a hash-slot-sharded in-process engine that doubles as the test
//! fake; a networked backend implements the same trait by sending the
//! named scripts to its server. Keys carry a `{hash_tag}` so every
//! key of one activity lands in one slot, and scripts are rejected if
//! their key set spans slots.

mod lock;
mod memory;
pub(crate) mod script;

pub use lock::{DistributedLock, LockError, LockGuard};
pub use memory::MemoryStore;
pub use script::StoreScript;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Hot store errors
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Script {script} keys span hash slots")]
    CrossSlot { script: &'static str },

    #[error("Wrong value type at key {0}")]
    WrongType(String),

    #[error("Script error: {0}")]
    Script(String),
}

/// Script reply, mirroring the value shapes a scripting server returns
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Int(i64),
    Text(String),
    Multi(Vec<Reply>),
}

impl Reply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// The fast-store contract
///
/// All operations are suspension points; implementations must be safe
/// to call from any task. `eval` runs the named script atomically over
/// its keys.
#[async_trait]
pub trait HotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set-if-absent with TTL. Returns true when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Returns true when the key existed
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// All values of a hash key (empty when absent)
    async fn hash_values(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn eval(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Reply, StoreError>;
}

/// Hash-tag of a key: the content of the first `{...}` group, or the
/// whole key when no tag is present. Keys with equal tags are
/// guaranteed co-located.
pub fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{')
        && let Some(close) = key[open + 1..].find('}')
        && close > 0
    {
        return &key[open + 1..open + 1 + close];
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tag_extraction() {
        assert_eq!(hash_tag("stock:{42}"), "42");
        assert_eq!(hash_tag("stock:reserved:{42}"), "42");
        assert_eq!(hash_tag("deduct_record:{42}:deduct:r1:123"), "42");
        assert_eq!(hash_tag("no_tag_key"), "no_tag_key");
        // Empty tag falls back to the whole key
        assert_eq!(hash_tag("weird:{}:key"), "weird:{}:key");
    }

    #[test]
    fn test_reply_accessors() {
        assert_eq!(Reply::Int(7).as_int(), Some(7));
        assert_eq!(Reply::Text("ok".into()).as_text(), Some("ok"));
        assert_eq!(Reply::Nil.as_int(), None);
    }
}
