pub mod action;
pub mod builtin;
pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod io;
pub mod notify;
pub mod orchestrator;
pub mod paths;
pub mod policy;
pub mod preflight;
pub mod queue;
pub mod run_state;
pub mod scheduler;
pub mod trigger;
pub mod types;
pub mod workflow;

pub use error::{CustodianError, Result};
