//! Hot-store key layout
//!
//! Every per-activity key embeds the `{activity_id}` hash-tag so a
//! clustered deployment keeps the TCC working set in one slot. Key
//! shapes are the store contract; nothing else in the crate formats
//! these strings.

use crate::core_types::{ActivityId, UserId};

pub fn stock(activity_id: ActivityId) -> String {
    format!("stock:{{{}}}", activity_id)
}

pub fn reserved(activity_id: ActivityId) -> String {
    format!("stock:reserved:{{{}}}", activity_id)
}

pub fn deduct_log(activity_id: ActivityId) -> String {
    format!("stock:deduct_log:{{{}}}", activity_id)
}

pub fn deduct_record(activity_id: ActivityId, deduct_id: &str) -> String {
    format!("deduct_record:{{{}}}:{}", activity_id, deduct_id)
}

pub fn purchase_count(activity_id: ActivityId, user_id: UserId) -> String {
    format!("purchase_count:{{{}}}:{}", activity_id, user_id)
}

pub fn sale_result(request_id: &str, user_id: UserId) -> String {
    format!("seckill:result:{}:{}", request_id, user_id)
}

pub fn activity_config(activity_id: ActivityId) -> String {
    format!("activity:config:{}", activity_id)
}

pub fn blacklist_user(user_id: UserId) -> String {
    format!("blacklist:user:{}", user_id)
}

pub fn blacklist_activity_user(activity_id: ActivityId, user_id: UserId) -> String {
    format!("blacklist:activity:{}:user:{}", activity_id, user_id)
}

pub fn admin_lock(name: &str, activity_id: ActivityId) -> String {
    format!("lock:{}:{}", name, activity_id)
}
