//! Activity model
//!
//! One activity is a single flash sale of one goods item, time-boxed
//! and stock-capped. The same struct serves as the durable row and as
//! the hot-store config snapshot (`activity:config:<id>`), serialized
//! as JSON.

use crate::core_types::{ActivityId, Cents, GoodsId, Quantity, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activity lifecycle status, stored as SMALLINT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum ActivityStatus {
    NotStarted = 0,
    Running = 1,
    Ended = 2,
    Paused = 3,
    Cancelled = 4,
}

impl ActivityStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ActivityStatus::NotStarted),
            1 => Some(ActivityStatus::Running),
            2 => Some(ActivityStatus::Ended),
            3 => Some(ActivityStatus::Paused),
            4 => Some(ActivityStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::NotStarted => "NOT_STARTED",
            ActivityStatus::Running => "RUNNING",
            ActivityStatus::Ended => "ENDED",
            ActivityStatus::Paused => "PAUSED",
            ActivityStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Prewarm marker, stored as SMALLINT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum PrewarmStatus {
    Cold = 0,
    Warmed = 1,
}

impl PrewarmStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PrewarmStatus::Cold),
            1 => Some(PrewarmStatus::Warmed),
            _ => None,
        }
    }
}

/// A flash-sale activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub goods_id: GoodsId,
    /// Sale price in minor units
    pub unit_price: Cents,
    pub total_stock: Quantity,
    pub sold_count: Quantity,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub limit_per_user: Quantity,
    pub status: ActivityStatus,
    /// Fraction of users admitted during progressive rollout, in [0,1]
    pub gray_ratio: f64,
    pub gray_whitelist: Vec<UserId>,
    pub prewarm_status: PrewarmStatus,
}

impl Activity {
    /// Units still sellable according to the durable store
    #[inline]
    pub fn available(&self) -> Quantity {
        self.total_stock - self.sold_count
    }

    /// Whether `now` falls inside the sale window and the activity is
    /// running
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == ActivityStatus::Running && self.start_at <= now && now < self.end_at
    }

    /// Gray-control admission. Full exposure when `gray_ratio` is 0
    /// (rollout disabled) or >= 1; whitelisted users always pass;
    /// otherwise the user id's percentile decides.
    pub fn admits_gray(&self, user_id: UserId) -> bool {
        if self.gray_ratio == 0.0 || self.gray_ratio >= 1.0 {
            return true;
        }
        if self.gray_whitelist.contains(&user_id) {
            return true;
        }
        ((user_id.rem_euclid(100)) as f64) < self.gray_ratio * 100.0
    }
}
