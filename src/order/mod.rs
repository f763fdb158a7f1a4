//! Order domain: durable order rows, their repository, and the
//! asynchronous settlement worker.

mod models;
mod repository;
mod worker;

pub use models::{Order, OrderDetail, OrderStatus};
pub use repository::{MemoryOrderStore, OrderStore, PgOrderRepository};
pub use worker::OrderWorker;
