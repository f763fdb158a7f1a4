//! Server-side script catalog
//!
//! Every multi-key atomic program the engine relies on has a stable
//! name here. A backend dispatches on the name; the in-memory backend
//! interprets them directly under the slot lock, which gives the same
//! atomicity a scripting server provides.

/// The atomic programs the engine runs against the hot store.
///
/// Key and argument layouts are documented per variant and must be
/// honored by callers; the inventory and limiter modules are the only
/// call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScript {
    /// Reserve stock with the per-user cap enforced in-script.
    ///
    /// KEYS: [stock, reserved, deduct_log, purchase_count, deduct_record]
    /// ARGS: [deduct_id, quantity, record_ttl_secs, limit_per_user,
    ///        purchase_ttl_secs, now_unix_ms]
    /// Reply: Multi[Int status, Text message, Int remaining]
    TryDeduct,

    /// Settle a reservation: release `reserved`, keep stock deducted.
    ///
    /// KEYS: [deduct_record, reserved]
    /// ARGS: [now_unix_ms]
    /// Reply: Multi[Int status, Text message]
    ConfirmDeduct,

    /// Roll back a reservation: restore stock, release `reserved`.
    ///
    /// KEYS: [stock, reserved, deduct_record]
    /// ARGS: [now_unix_ms]
    /// Reply: Multi[Int status, Text message]
    CancelDeduct,

    /// Sliding-window rate probe over a sorted set.
    ///
    /// KEYS: [window]
    /// ARGS: [now_unix_ms, window_ms, limit, nonce]
    /// Reply: Int (1 admitted, 0 denied)
    SlidingWindow,

    /// Overwrite available stock with a TTL (prewarm / repair).
    ///
    /// KEYS: [stock]
    /// ARGS: [amount, ttl_secs]
    /// Reply: Int 1
    SyncStock,

    /// Delete the key only when it holds the given token.
    ///
    /// KEYS: [lock]
    /// ARGS: [token]
    /// Reply: Int (1 deleted, 0 token mismatch or absent)
    CompareAndDelete,

    /// Refresh the TTL only when the key holds the given token.
    ///
    /// KEYS: [lock]
    /// ARGS: [token, ttl_ms]
    /// Reply: Int (1 extended, 0 token mismatch or absent)
    CompareAndExpire,
}

impl StoreScript {
    /// Stable script name, the dispatch key for networked backends
    pub fn name(&self) -> &'static str {
        match self {
            StoreScript::TryDeduct => "try_deduct",
            StoreScript::ConfirmDeduct => "confirm_deduct",
            StoreScript::CancelDeduct => "cancel_deduct",
            StoreScript::SlidingWindow => "sliding_window",
            StoreScript::SyncStock => "sync_stock",
            StoreScript::CompareAndDelete => "compare_and_delete",
            StoreScript::CompareAndExpire => "compare_and_expire",
        }
    }
}

/// Status/message pairs shared by the TCC scripts and their callers
pub mod status {
    pub const OK: i64 = 1;
    pub const ERR: i64 = 0;

    pub const SUCCESS: &str = "success";
    pub const PURCHASE_LIMIT_EXCEEDED: &str = "purchase_limit_exceeded";
    pub const INSUFFICIENT_STOCK: &str = "insufficient_stock";
    pub const DEDUCT_RECORD_NOT_FOUND: &str = "deduct_record_not_found";
    pub const ALREADY_CONFIRMED: &str = "already_confirmed";
    pub const ALREADY_CANCELLED: &str = "already_cancelled";
}
