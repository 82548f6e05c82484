//! Application layer for reload-server.
//!
//! Knows *when* to reload (one console line = one broadcast) but not how
//! lines are read or how browsers are reached.

pub mod console_trigger;

pub use console_trigger::{reload_payload, run_console_trigger, TriggerError};
