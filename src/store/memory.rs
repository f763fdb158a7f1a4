//! In-process hot store
//!
//! Hash-slot-sharded map with per-shard mutexes. A script executes
//! entirely under one shard lock, which is exactly the atomicity a
//! scripting server gives: the TCC scripts and the sliding window are
//! serializable per activity because all of an activity's keys share
//! a hash tag and therefore a shard.
//!
//! Doubles as the single-process deployment backend and the test
//! fake; nothing in here is test-only.

use super::script::{StoreScript, status};
use super::{HotStore, Reply, StoreError, hash_tag};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SHARDS: usize = 16;

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    Map(FxHashMap<String, String>),
    /// Sliding-window members as (timestamp_ms, nonce)
    Window(BTreeSet<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Stored {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Stored {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

type Shard = FxHashMap<String, Stored>;

/// Sharded in-memory `HotStore`
pub struct MemoryStore {
    shards: Vec<Mutex<Shard>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    fn slot(key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hash_tag(key).hash(&mut hasher);
        (hasher.finish() as usize) % SHARDS
    }

    fn shard_for(&self, key: &str) -> &Mutex<Shard> {
        &self.shards[Self::slot(key)]
    }

    /// Common shard for a script's key set, or CrossSlot
    fn shard_for_keys(
        &self,
        script: StoreScript,
        keys: &[String],
    ) -> Result<&Mutex<Shard>, StoreError> {
        let first = keys
            .first()
            .ok_or_else(|| StoreError::Script(format!("{}: no keys", script.name())))?;
        let slot = Self::slot(first);
        if keys.iter().any(|k| Self::slot(k) != slot) {
            return Err(StoreError::CrossSlot {
                script: script.name(),
            });
        }
        Ok(&self.shards[slot])
    }
}

// Shard-level helpers. All take the locked shard; expiry is lazy.

fn get_live<'a>(shard: &'a mut Shard, key: &str, now: Instant) -> Option<&'a mut Stored> {
    if let Some(stored) = shard.get(key)
        && !stored.live(now)
    {
        shard.remove(key);
    }
    shard.get_mut(key)
}

fn get_text(shard: &mut Shard, key: &str, now: Instant) -> Result<Option<String>, StoreError> {
    match get_live(shard, key, now) {
        None => Ok(None),
        Some(stored) => match &stored.entry {
            Entry::Text(s) => Ok(Some(s.clone())),
            _ => Err(StoreError::WrongType(key.to_string())),
        },
    }
}

fn get_int(shard: &mut Shard, key: &str, now: Instant) -> Result<i64, StoreError> {
    match get_text(shard, key, now)? {
        None => Ok(0),
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| StoreError::WrongType(key.to_string())),
    }
}

fn incr_by(shard: &mut Shard, key: &str, delta: i64, now: Instant) -> Result<i64, StoreError> {
    // get_int purges an expired entry, so a surviving expiry is live
    let value = get_int(shard, key, now)? + delta;
    let expires_at = shard.get(key).and_then(|stored| stored.expires_at);
    shard.insert(
        key.to_string(),
        Stored {
            entry: Entry::Text(value.to_string()),
            expires_at,
        },
    );
    Ok(value)
}

fn set_expiry(shard: &mut Shard, key: &str, ttl: Duration, now: Instant) {
    if let Some(stored) = get_live(shard, key, now) {
        stored.expires_at = Some(now + ttl);
    }
}

fn int_arg(script: StoreScript, args: &[String], idx: usize) -> Result<i64, StoreError> {
    args.get(idx)
        .and_then(|a| a.parse::<i64>().ok())
        .ok_or_else(|| StoreError::Script(format!("{}: bad arg {}", script.name(), idx)))
}

fn str_arg<'a>(
    script: StoreScript,
    args: &'a [String],
    idx: usize,
) -> Result<&'a str, StoreError> {
    args.get(idx)
        .map(|s| s.as_str())
        .ok_or_else(|| StoreError::Script(format!("{}: bad arg {}", script.name(), idx)))
}

/// Reservation record fields the scripts understand. The full payload
/// is opaque JSON owned by the inventory module; scripts only touch
/// `status`, `quantity` and `settle_at`.
fn record_field<'a>(record: &'a serde_json::Value, field: &str) -> Option<&'a serde_json::Value> {
    record.get(field)
}

fn pair(status: i64, message: &str) -> Reply {
    Reply::Multi(vec![Reply::Int(status), Reply::Text(message.to_string())])
}

fn triple(status: i64, message: &str, remaining: i64) -> Reply {
    Reply::Multi(vec![
        Reply::Int(status),
        Reply::Text(message.to_string()),
        Reply::Int(remaining),
    ])
}

#[async_trait]
impl HotStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut shard = self.shard_for(key).lock().unwrap();
        get_text(&mut shard, key, Instant::now())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut shard = self.shard_for(key).lock().unwrap();
        shard.insert(
            key.to_string(),
            Stored {
                entry: Entry::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut shard = self.shard_for(key).lock().unwrap();
        let now = Instant::now();
        if get_live(&mut shard, key, now).is_some() {
            return Ok(false);
        }
        shard.insert(
            key.to_string(),
            Stored {
                entry: Entry::Text(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut shard = self.shard_for(key).lock().unwrap();
        incr_by(&mut shard, key, delta, Instant::now())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut shard = self.shard_for(key).lock().unwrap();
        let now = Instant::now();
        Ok(get_live(&mut shard, key, now).is_some() && shard.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut shard = self.shard_for(key).lock().unwrap();
        Ok(get_live(&mut shard, key, Instant::now()).is_some())
    }

    async fn hash_values(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut shard = self.shard_for(key).lock().unwrap();
        match get_live(&mut shard, key, Instant::now()) {
            None => Ok(Vec::new()),
            Some(stored) => match &stored.entry {
                Entry::Map(map) => Ok(map.values().cloned().collect()),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn eval(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Reply, StoreError> {
        let shard_mutex = self.shard_for_keys(script, keys)?;
        let mut shard = shard_mutex.lock().unwrap();
        let now = Instant::now();

        match script {
            StoreScript::TryDeduct => run_try_deduct(&mut shard, keys, args, now),
            StoreScript::ConfirmDeduct => run_confirm(&mut shard, keys, args, now),
            StoreScript::CancelDeduct => run_cancel(&mut shard, keys, args, now),
            StoreScript::SlidingWindow => run_sliding_window(&mut shard, keys, args, now),
            StoreScript::SyncStock => run_sync_stock(&mut shard, keys, args, now),
            StoreScript::CompareAndDelete => run_compare_del(&mut shard, keys, args, now),
            StoreScript::CompareAndExpire => run_compare_expire(&mut shard, keys, args, now),
        }
    }
}

fn run_try_deduct(
    shard: &mut Shard,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<Reply, StoreError> {
    let script = StoreScript::TryDeduct;
    let [stock_key, reserved_key, log_key, purchase_key, record_key] = keys else {
        return Err(StoreError::Script("try_deduct: expected 5 keys".into()));
    };
    let deduct_id = str_arg(script, args, 0)?;
    let quantity = int_arg(script, args, 1)?;
    let record_ttl = Duration::from_secs(int_arg(script, args, 2)? as u64);
    let limit_per_user = int_arg(script, args, 3)?;
    let purchase_ttl = Duration::from_secs(int_arg(script, args, 4)? as u64);
    let now_ms = int_arg(script, args, 5)?;

    // Per-user cap: increment first, roll back in-script on any
    // rejection. Check-then-increment in two calls would let
    // concurrent attempts slip past the cap.
    let purchased = incr_by(shard, purchase_key, quantity, now)?;
    set_expiry(shard, purchase_key, purchase_ttl, now);
    if limit_per_user > 0 && purchased > limit_per_user {
        incr_by(shard, purchase_key, -quantity, now)?;
        return Ok(triple(status::ERR, status::PURCHASE_LIMIT_EXCEEDED, 0));
    }

    let stock = get_int(shard, stock_key, now)?;
    if stock < quantity {
        incr_by(shard, purchase_key, -quantity, now)?;
        return Ok(triple(status::ERR, status::INSUFFICIENT_STOCK, stock));
    }

    let remaining = incr_by(shard, stock_key, -quantity, now)?;
    incr_by(shard, reserved_key, quantity, now)?;

    let record = serde_json::json!({
        "deduct_id": deduct_id,
        "quantity": quantity,
        "status": "try",
        "try_at": now_ms,
        "settle_at": null,
    })
    .to_string();

    // Deduct log entry + standalone record, both TTL-bounded
    if get_live(shard, log_key, now).is_none() {
        shard.insert(
            log_key.to_string(),
            Stored {
                entry: Entry::Map(FxHashMap::default()),
                expires_at: None,
            },
        );
    }
    let Some(stored) = shard.get_mut(log_key.as_str()) else {
        return Err(StoreError::Script("try_deduct: log vanished".into()));
    };
    let Entry::Map(map) = &mut stored.entry else {
        return Err(StoreError::WrongType(log_key.to_string()));
    };
    map.insert(deduct_id.to_string(), record.clone());
    stored.expires_at = Some(now + record_ttl);
    shard.insert(
        record_key.to_string(),
        Stored {
            entry: Entry::Text(record),
            expires_at: Some(now + record_ttl),
        },
    );

    Ok(triple(status::OK, status::SUCCESS, remaining))
}

fn load_record(
    shard: &mut Shard,
    record_key: &str,
    now: Instant,
) -> Result<Option<(serde_json::Value, Option<Instant>)>, StoreError> {
    match get_live(shard, record_key, now) {
        None => Ok(None),
        Some(stored) => {
            let Entry::Text(blob) = &stored.entry else {
                return Err(StoreError::WrongType(record_key.to_string()));
            };
            let value: serde_json::Value = serde_json::from_str(blob)
                .map_err(|e| StoreError::Script(format!("corrupt deduct record: {}", e)))?;
            Ok(Some((value, stored.expires_at)))
        }
    }
}

fn write_record(
    shard: &mut Shard,
    record_key: &str,
    record: serde_json::Value,
    expires_at: Option<Instant>,
) {
    shard.insert(
        record_key.to_string(),
        Stored {
            entry: Entry::Text(record.to_string()),
            expires_at,
        },
    );
}

fn run_confirm(
    shard: &mut Shard,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<Reply, StoreError> {
    let script = StoreScript::ConfirmDeduct;
    let [record_key, reserved_key] = keys else {
        return Err(StoreError::Script("confirm_deduct: expected 2 keys".into()));
    };
    let now_ms = int_arg(script, args, 0)?;

    let Some((mut record, expires_at)) = load_record(shard, record_key, now)? else {
        return Ok(pair(status::ERR, status::DEDUCT_RECORD_NOT_FOUND));
    };
    match record_field(&record, "status").and_then(|s| s.as_str()) {
        Some("confirmed") => return Ok(pair(status::OK, status::ALREADY_CONFIRMED)),
        Some("cancelled") => return Ok(pair(status::ERR, status::ALREADY_CANCELLED)),
        _ => {}
    }
    let quantity = record_field(&record, "quantity")
        .and_then(|q| q.as_i64())
        .ok_or_else(|| StoreError::Script("corrupt deduct record: quantity".into()))?;

    // Stock stays reduced; only the reservation hold is released.
    incr_by(shard, reserved_key, -quantity, now)?;
    record["status"] = "confirmed".into();
    record["settle_at"] = now_ms.into();
    write_record(shard, record_key, record, expires_at);

    Ok(pair(status::OK, status::SUCCESS))
}

fn run_cancel(
    shard: &mut Shard,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<Reply, StoreError> {
    let script = StoreScript::CancelDeduct;
    let [stock_key, reserved_key, record_key] = keys else {
        return Err(StoreError::Script("cancel_deduct: expected 3 keys".into()));
    };
    let now_ms = int_arg(script, args, 0)?;

    let Some((mut record, expires_at)) = load_record(shard, record_key, now)? else {
        return Ok(pair(status::ERR, status::DEDUCT_RECORD_NOT_FOUND));
    };
    match record_field(&record, "status").and_then(|s| s.as_str()) {
        Some("cancelled") => return Ok(pair(status::OK, status::ALREADY_CANCELLED)),
        // A confirmed sale cannot be undone through this path
        Some("confirmed") => return Ok(pair(status::ERR, status::ALREADY_CONFIRMED)),
        _ => {}
    }
    let quantity = record_field(&record, "quantity")
        .and_then(|q| q.as_i64())
        .ok_or_else(|| StoreError::Script("corrupt deduct record: quantity".into()))?;

    incr_by(shard, stock_key, quantity, now)?;
    incr_by(shard, reserved_key, -quantity, now)?;
    record["status"] = "cancelled".into();
    record["settle_at"] = now_ms.into();
    write_record(shard, record_key, record, expires_at);

    Ok(pair(status::OK, status::SUCCESS))
}

fn run_sliding_window(
    shard: &mut Shard,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<Reply, StoreError> {
    let script = StoreScript::SlidingWindow;
    let [window_key] = keys else {
        return Err(StoreError::Script("sliding_window: expected 1 key".into()));
    };
    let now_ms = int_arg(script, args, 0)?;
    let window_ms = int_arg(script, args, 1)?;
    let limit = int_arg(script, args, 2)?;
    let nonce = str_arg(script, args, 3)?;

    if get_live(shard, window_key, now).is_none() {
        shard.insert(
            window_key.to_string(),
            Stored {
                entry: Entry::Window(BTreeSet::new()),
                expires_at: None,
            },
        );
    }
    let Some(stored) = shard.get_mut(window_key.as_str()) else {
        return Err(StoreError::Script("sliding_window: window vanished".into()));
    };
    stored.expires_at = Some(now + Duration::from_millis(window_ms as u64));
    let Entry::Window(window) = &mut stored.entry else {
        return Err(StoreError::WrongType(window_key.to_string()));
    };

    let cutoff = now_ms - window_ms;
    window.retain(|(ts, _)| *ts > cutoff);
    let admitted = (window.len() as i64) < limit;
    if admitted {
        window.insert((now_ms, nonce.to_string()));
    }

    Ok(Reply::Int(if admitted { 1 } else { 0 }))
}

fn run_sync_stock(
    shard: &mut Shard,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<Reply, StoreError> {
    let script = StoreScript::SyncStock;
    let [stock_key] = keys else {
        return Err(StoreError::Script("sync_stock: expected 1 key".into()));
    };
    let amount = int_arg(script, args, 0)?;
    let ttl = Duration::from_secs(int_arg(script, args, 1)? as u64);
    shard.insert(
        stock_key.to_string(),
        Stored {
            entry: Entry::Text(amount.to_string()),
            expires_at: Some(now + ttl),
        },
    );
    Ok(Reply::Int(1))
}

fn run_compare_del(
    shard: &mut Shard,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<Reply, StoreError> {
    let script = StoreScript::CompareAndDelete;
    let [lock_key] = keys else {
        return Err(StoreError::Script("compare_and_delete: expected 1 key".into()));
    };
    let token = str_arg(script, args, 0)?;
    match get_text(shard, lock_key, now)? {
        Some(held) if held == token => {
            shard.remove(lock_key);
            Ok(Reply::Int(1))
        }
        _ => Ok(Reply::Int(0)),
    }
}

fn run_compare_expire(
    shard: &mut Shard,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<Reply, StoreError> {
    let script = StoreScript::CompareAndExpire;
    let [lock_key] = keys else {
        return Err(StoreError::Script("compare_and_expire: expected 1 key".into()));
    };
    let token = str_arg(script, args, 0)?;
    let ttl_ms = int_arg(script, args, 1)?;
    match get_text(shard, lock_key, now)? {
        Some(held) if held == token => {
            set_expiry(shard, lock_key, Duration::from_millis(ttl_ms as u64), now);
            Ok(Reply::Int(1))
        }
        _ => Ok(Reply::Int(0)),
    }
}
