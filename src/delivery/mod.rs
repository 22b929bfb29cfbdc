//! Deferred reply delivery: the orchestrator and the queue that schedules it.

pub mod orchestrator;
pub mod queue;

#[cfg(test)]
pub(crate) mod test_support;

pub use orchestrator::{DEFAULT_DELIVERY_TIMEOUT, DeliveryJob, Orchestrator};
pub use queue::{DeliveryQueue, DeliveryWorker, spawn_delivery_worker};
