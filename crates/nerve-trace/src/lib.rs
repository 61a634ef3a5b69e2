//! Column-oriented trace output for nerve simulations
//!
//! Rows are tab-delimited with simulated time in column 0 (`$t`). Columns
//! appear as they are first traced; each time the column set grows, a
//! header row naming the new columns is emitted before the next data row.
//! Column metadata ("modes") goes to a `<file>.columns` sidecar in the
//! `N2A.schema=3` text format, so existing plotting tools can consume the
//! output directly.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod output;

pub use error::{Result, TraceError};
pub use output::TraceWriter;

/// Trace crate version for compatibility checking
pub const TRACE_VERSION: u32 = 1;
