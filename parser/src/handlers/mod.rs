//! Section data handlers
//!
//! One capability interface for every record kind: a handler parses raw
//! records of its section into typed values (or skips them with a reason)
//! and finalizes into a tagged payload the model is assembled from.

pub mod api;
pub mod counters;
pub mod marker;
pub mod occupancy;
pub mod symbols;

use thiserror::Error;

use sightline_shared::format::codec::RawRecord;
use sightline_shared::format::{DecodeError, SectionKind};
use sightline_shared::types::records::{
    ApiCallRecord, ApiFamily, CounterSample, OccupancyRecord, SymbolEntry,
};

use crate::model::MarkerForest;

pub use symbols::{Demangler, PassthroughDemangler};

/// Why one record was skipped; recoverable, counted, never fatal
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("malformed record: {0}")]
    Malformed(#[from] DecodeError),

    #[error("{0}")]
    Invalid(String),
}

/// Typed payload produced by a finalized handler
#[derive(Debug)]
pub enum HandlerOutput {
    ApiCalls {
        family: ApiFamily,
        calls: Vec<ApiCallRecord>,
    },
    CounterSamples(Vec<CounterSample>),
    Markers(MarkerForest),
    Occupancy(Vec<OccupancyRecord>),
    Symbols(Vec<SymbolEntry>),
}

/// Capability implemented by every section handler
pub trait DataHandler {
    /// Section kind this handler consumes
    fn section_kind(&self) -> SectionKind;

    /// Parse one raw record into the accumulated set
    fn parse_record(&mut self, raw: &RawRecord) -> Result<(), SkipReason>;

    /// Finalize the accumulated set into a validated collection
    fn finalize(self: Box<Self>) -> HandlerOutput;
}

/// The full default handler set: both API families, counter samples,
/// perf markers, occupancy, and the symbol table
pub fn default_handlers() -> Vec<Box<dyn DataHandler>> {
    vec![
        Box::new(api::ApiCallHandler::new(ApiFamily::OpenCl)),
        Box::new(api::ApiCallHandler::new(ApiFamily::Hsa)),
        Box::new(counters::CounterSampleHandler::new()),
        Box::new(marker::PerfMarkerHandler::new()),
        Box::new(occupancy::OccupancyHandler::new()),
        Box::new(symbols::SymbolTableHandler::new()),
    ]
}
