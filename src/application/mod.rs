//! Application layer: the collection saga and the services around it.
//!
//! `orchestrator` owns the collection state machine, `allocation` picks and
//! commits collectors, `compensation` undoes side effects of cancelled or
//! failed steps, and `workers` feeds all of them from the message bus.

pub mod allocation;
pub mod compensation;
pub mod orchestrator;
pub mod workers;
