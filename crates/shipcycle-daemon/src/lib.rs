//! shipcycle-daemon: async side of the build-and-ship cycle.
//! Durable store, collaborator seams, the cycle state machine, the queue
//! worker, the health monitor and the admin facade tying them together.

pub mod collaborators;
pub mod health;
pub mod orchestrator;
pub mod pipeline;
pub mod run_queue;
pub mod store;

#[cfg(test)]
mod testing;

pub use orchestrator::Orchestrator;
pub use shipcycle_core::types;
