//! Queues connecting the pipeline stages.
//!
//! The capture daemon moves request records between stages exclusively
//! through these queues: a record is popped from one and pushed onto the
//! next, so it is never reachable from two stages at once.

mod fifo;
mod priority;

pub use fifo::TsQueue;
pub use priority::PriorityQueue;
