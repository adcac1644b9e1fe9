//! Sightline trace parser
//!
//! Reads a trace file produced by the capture agent back into typed,
//! read-only records: header validation, section iteration with per-kind
//! handlers, and a merged model cross-linking calls to counter samples,
//! occupancy data, and resolved symbols.
//!
//! Only a corrupt or unsupported header aborts a parse; every other anomaly
//! (malformed record, unknown section, truncation, marker nesting mismatch)
//! is recovered and surfaced as a count in the completeness report.

pub mod handlers;
pub mod model;
pub mod reader;

pub use handlers::{DataHandler, Demangler, HandlerOutput, PassthroughDemangler, SkipReason};
pub use model::{CompletenessReport, MarkerEvent, MarkerForest, MarkerNode, SymbolTable, TraceModel};
pub use reader::{parse_file, parse_file_with, ParseError, TraceReader};
