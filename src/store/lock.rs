//! Distributed lock over the hot store
//!
//! Token-scoped: release and extend run compare-value scripts, so a
//! holder can never release or refresh a lock another process has
//! since acquired. Used only off the sale path (prewarm, admin
//! reconcile); hot-path invariants live in the TCC scripts.

use super::script::StoreScript;
use super::{HotStore, Reply, StoreError};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// SETNX returned false: somebody else holds the lock
    #[error("Lock not acquired: {0}")]
    NotAcquired(String),

    /// Token mismatch on unlock/extend
    #[error("Lock not held: {0}")]
    NotHeld(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Proof of acquisition; carries the token the release is scoped to
#[derive(Debug, Clone)]
pub struct LockGuard {
    pub key: String,
    pub token: String,
}

/// Lock manager bound to a hot store
pub struct DistributedLock {
    store: Arc<dyn HotStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn HotStore>) -> Self {
        Self { store }
    }

    /// Fresh unguessable token for one acquisition
    pub fn new_token() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Single acquisition attempt
    pub async fn lock(&self, key: &str, token: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        if self.store.set_nx_ex(key, token, ttl).await? {
            Ok(LockGuard {
                key: key.to_string(),
                token: token.to_string(),
            })
        } else {
            Err(LockError::NotAcquired(key.to_string()))
        }
    }

    /// Acquisition with bounded retries and jittered exponential backoff
    pub async fn try_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
        retries: u32,
        backoff: Duration,
    ) -> Result<LockGuard, LockError> {
        let mut attempt = 0u32;
        loop {
            match self.lock(key, token, ttl).await {
                Ok(guard) => return Ok(guard),
                Err(LockError::NotAcquired(_)) if attempt < retries => {
                    let factor = 1u32 << attempt.min(8);
                    let base = backoff.saturating_mul(factor);
                    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 4);
                    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release; fails with `NotHeld` when the token no longer matches
    pub async fn unlock(&self, guard: &LockGuard) -> Result<(), LockError> {
        let reply = self
            .store
            .eval(
                StoreScript::CompareAndDelete,
                &[guard.key.clone()],
                &[guard.token.clone()],
            )
            .await?;
        match reply {
            Reply::Int(1) => Ok(()),
            _ => Err(LockError::NotHeld(guard.key.clone())),
        }
    }

    /// Refresh the TTL; fails with `NotHeld` when the token no longer
    /// matches
    pub async fn extend(&self, guard: &LockGuard, ttl: Duration) -> Result<(), LockError> {
        let reply = self
            .store
            .eval(
                StoreScript::CompareAndExpire,
                &[guard.key.clone()],
                &[guard.token.clone(), ttl.as_millis().to_string()],
            )
            .await?;
        match reply {
            Reply::Int(1) => Ok(()),
            _ => Err(LockError::NotHeld(guard.key.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_lock_excludes_second_holder() {
        let lock = setup();
        let guard = lock
            .lock("lock:prewarm:1", "t1", Duration::from_secs(30))
            .await
            .unwrap();

        let second = lock.lock("lock:prewarm:1", "t2", Duration::from_secs(30)).await;
        assert!(matches!(second, Err(LockError::NotAcquired(_))));

        lock.unlock(&guard).await.unwrap();
        // Released: a new holder can acquire
        lock.lock("lock:prewarm:1", "t2", Duration::from_secs(30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unlock_is_token_scoped() {
        let lock = setup();
        let _guard = lock
            .lock("lock:admin:1", "holder", Duration::from_secs(30))
            .await
            .unwrap();

        let stranger = LockGuard {
            key: "lock:admin:1".to_string(),
            token: "stranger".to_string(),
        };
        assert!(matches!(
            lock.unlock(&stranger).await,
            Err(LockError::NotHeld(_))
        ));
        // Still held by the original token
        assert!(matches!(
            lock.lock("lock:admin:1", "t2", Duration::from_secs(30)).await,
            Err(LockError::NotAcquired(_))
        ));
    }

    #[tokio::test]
    async fn test_extend_requires_token() {
        let lock = setup();
        let guard = lock
            .lock("lock:admin:2", "holder", Duration::from_secs(30))
            .await
            .unwrap();
        lock.extend(&guard, Duration::from_secs(60)).await.unwrap();

        let stranger = LockGuard {
            key: "lock:admin:2".to_string(),
            token: "stranger".to_string(),
        };
        assert!(matches!(
            lock.extend(&stranger, Duration::from_secs(60)).await,
            Err(LockError::NotHeld(_))
        ));
    }

    #[tokio::test]
    async fn test_try_lock_retries_until_release() {
        let lock = Arc::new(setup());
        let guard = lock
            .lock("lock:busy", "holder", Duration::from_millis(80))
            .await
            .unwrap();
        drop(guard);

        // Holder's TTL lapses while try_lock backs off
        let acquired = lock
            .try_lock(
                "lock:busy",
                "waiter",
                Duration::from_secs(5),
                5,
                Duration::from_millis(40),
            )
            .await
            .unwrap();
        assert_eq!(acquired.token, "waiter");
    }
}
