//! Activity domain: the durable flash-sale definition and its
//! repository.

mod models;
mod repository;

pub use models::{Activity, ActivityStatus, PrewarmStatus};
pub use repository::{ActivityStore, MemoryActivityStore, PgActivityRepository, StockLogEntry};
