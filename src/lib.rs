//! codeloop library crate
//!
//! Exposes the workflow core so the binary, benchmarks and other front ends
//! share one implementation.

pub mod app;
pub mod config;
pub mod keyring;
pub mod language;
pub mod remote;
pub mod sanitize;
pub mod store;
pub mod view;
pub mod workflow;
