//! Batch lifecycle
//!
//! A batch builds the application, fans shards out, waits for all of
//! them, aggregates and publishes.

mod controller;
mod state;

pub use controller::BatchController;
pub use state::BatchState;
