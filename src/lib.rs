//! Transaction simulation and exactly-once execution.
//!
//! Callers preview a transfer, refund or payment stream against current
//! account state, get back a time-bounded simulation with warnings and
//! blocking errors, and may later execute exactly that simulation once.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
