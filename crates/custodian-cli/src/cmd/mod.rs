pub mod enqueue;
pub mod pending;
pub mod preflight;
pub mod queue;
pub mod scheduler;
pub mod workflow;
