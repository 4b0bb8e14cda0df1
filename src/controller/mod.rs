//! Controller module
//!
//! Implements the event-driven reconciliation of MayastorPool resources.

pub mod finalizer;
mod pool_operator;
pub mod status;
mod work_queue;

pub use pool_operator::PoolOperator;
pub use status::StatusPublisher;
pub use work_queue::WorkQueue;
