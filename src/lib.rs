//! Pluggable host telemetry agent.
//!
//! Probes sample host metrics on a shared poll interval; sinks forward
//! them, buffering and retrying where the backend needs it. Both are
//! declared in a YAML definition whose values support `${...}` variable
//! expressions.

pub mod component;
pub mod config;
pub mod error;
pub mod metric;
pub mod probe;
pub mod registry;
pub mod runtime;
pub mod sink;
