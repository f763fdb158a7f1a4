//! Reservation records and script outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reservation lifecycle. Transitions are try→confirmed and
/// try→cancelled only; the scripts never resurrect a terminal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeductStatus {
    Try,
    Confirmed,
    Cancelled,
}

impl DeductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeductStatus::Try => "try",
            DeductStatus::Confirmed => "confirmed",
            DeductStatus::Cancelled => "cancelled",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeductStatus::Try)
    }
}

impl fmt::Display for DeductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The reservation payload, stored as JSON in both the per-activity
/// deduct log and the standalone record key. Written by the TryDeduct
/// script; settled in place by Confirm/Cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductRecord {
    pub deduct_id: String,
    pub quantity: i64,
    pub status: DeductStatus,
    /// Unix millis of the Try
    pub try_at: i64,
    /// Unix millis of the Confirm/Cancel, if settled
    pub settle_at: Option<i64>,
}

/// Outcome of a Try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOutcome {
    /// Reserved; `remaining` is available stock after the deduction
    Reserved { remaining: i64 },
    /// Per-user cap would be exceeded; nothing moved
    LimitExceeded,
    /// Not enough stock; `current` is what is left
    InsufficientStock { current: i64 },
}

/// Outcome of a Confirm or Cancel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Fresh transition applied
    Settled,
    /// Repeat of the same terminal state: idempotent success
    AlreadySettled,
    /// Record expired or never existed
    RecordNotFound,
    /// The opposite terminal state holds; nothing moved
    Conflict,
}

impl SettleOutcome {
    /// Whether the settlement may be treated as done
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, SettleOutcome::Settled | SettleOutcome::AlreadySettled)
    }
}
