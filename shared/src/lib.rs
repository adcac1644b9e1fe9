//! Shared types and utilities for Sightline
//!
//! This crate contains the record types, API classification tables, and
//! trace-format codecs used by both the capture agent and the trace parser.

pub mod format;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{classify::*, records::*};
