//! Command handlers for fairq CLI
//!
//! This module contains the handlers for queue inspection, enqueueing and
//! redelivery sweeps.

pub mod queue;
pub mod sweep;
