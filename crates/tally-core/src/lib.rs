//! # tally-core
//!
//! Shared types for the tally expense service.
//!
//! - [`expense::Expense`]: the expense record as stored and pushed to clients
//! - [`expense::ExpenseEvent`]: an immutable change notification routed by owner
//! - [`logging`]: `tracing` subscriber setup used by the binary and tests

#![deny(unsafe_code)]

pub mod expense;
pub mod logging;

pub use expense::{Expense, ExpenseEvent};
