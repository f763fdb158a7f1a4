//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Activity ID - a single flash sale of one goods item.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - Primary key of `seckill_activities`, embedded in every hot-store
///   key as the `{activity_id}` hash-tag
pub type ActivityId = i64;

/// User ID - globally unique, immutable after assignment.
pub type UserId = i64;

/// Goods ID - the item on sale.
pub type GoodsId = i64;

/// Order ID - snowflake-generated, unique within the system.
pub type OrderId = i64;

/// Money in integer minor units (cents). No floating arithmetic
/// anywhere on prices.
pub type Cents = i64;

/// Stock quantity in units.
pub type Quantity = i64;
