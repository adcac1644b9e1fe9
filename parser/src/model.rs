//! Merged trace model
//!
//! The read-only view assembled after all sections are consumed: call
//! records ordered by global start time, cross-linked to counter samples,
//! occupancy records, and resolved symbols, plus the completeness report
//! consumers use to judge how much of the capture survived.

use std::collections::HashMap;

use serde::Serialize;

use sightline_shared::types::classify::ApiCategory;
use sightline_shared::types::records::{
    ApiCallRecord, CallId, CounterSample, OccupancyRecord, SymbolEntry, Tid, TraceFooter,
    TraceHeader,
};

use crate::handlers::{Demangler, HandlerOutput};

/// One reconstructed marker region; `depth` is 1 for roots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerNode {
    pub name: String,
    pub group: String,
    pub tid: Tid,
    pub begin_ns: u64,
    pub end_ns: u64,
    pub depth: u32,
    pub children: Vec<MarkerNode>,
}

impl MarkerNode {
    fn max_depth(&self) -> u32 {
        self.children
            .iter()
            .map(MarkerNode::max_depth)
            .max()
            .unwrap_or(self.depth)
    }
}

/// A marker demoted to a flat event because its begin/end pair never matched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerEvent {
    pub name: String,
    pub group: String,
    pub tid: Tid,
    pub ts_ns: u64,
}

/// All reconstructed marker regions, per thread, plus demoted flat events
#[derive(Debug, Default, Serialize)]
pub struct MarkerForest {
    /// Completed regions of every thread, in begin order
    pub roots: Vec<MarkerNode>,

    /// Unmatched begin/end events demoted to flat events
    pub flat: Vec<MarkerEvent>,

    /// Number of begin/end mismatches observed while reconstructing
    pub nesting_warnings: u64,
}

impl MarkerForest {
    pub fn roots_for_thread(&self, tid: Tid) -> impl Iterator<Item = &MarkerNode> {
        self.roots.iter().filter(move |n| n.tid == tid)
    }

    /// Deepest nesting level across all threads; 0 when there are no regions
    pub fn max_depth(&self) -> u32 {
        self.roots.iter().map(MarkerNode::max_depth).max().unwrap_or(0)
    }
}

/// Address-to-name mapping produced from the symbol section
#[derive(Debug, Default, Serialize)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    #[serde(skip)]
    by_address: HashMap<u64, usize>,
}

impl SymbolTable {
    pub(crate) fn new(mut entries: Vec<SymbolEntry>, demangler: &dyn Demangler) -> Self {
        for entry in &mut entries {
            entry.demangled = demangler.demangle(&entry.mangled);
        }
        let by_address = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.address, i))
            .collect();
        Self { entries, by_address }
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    pub fn resolve(&self, address: u64) -> Option<&SymbolEntry> {
        self.by_address.get(&address).map(|&i| &self.entries[i])
    }

    /// Demangled name when the collaborator produced one, else the mangled
    pub fn display_name(&self, address: u64) -> Option<&str> {
        self.resolve(address)
            .map(|e| e.demangled.as_deref().unwrap_or(&e.mangled))
    }
}

/// Counts consumers use to judge completeness of a parsed trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    /// Records the writer dropped at capacity (from the footer)
    pub dropped_records: u64,

    /// Capture degradations noted by the agent (from the footer)
    pub degraded_captures: u64,

    /// Records skipped because they failed to parse
    pub malformed_records: u64,

    /// Sections skipped because no handler was registered for their tag
    pub unknown_sections: u64,

    /// Samples or occupancy records referencing an absent call id
    pub dangling_links: u64,

    /// Marker begin/end mismatches demoted to flat events
    pub nesting_warnings: u64,

    /// File ended before its footer or mid-section
    pub truncated: bool,
}

/// Counts accumulated by the reader while iterating sections
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ParseCounts {
    pub malformed_records: u64,
    pub unknown_sections: u64,
    pub truncated: bool,
}

/// The merged, read-only result of one parse
#[derive(Debug)]
pub struct TraceModel {
    header: TraceHeader,
    footer: Option<TraceFooter>,
    calls: Vec<ApiCallRecord>,
    call_index: HashMap<CallId, usize>,
    samples: Vec<CounterSample>,
    sample_by_call: HashMap<CallId, usize>,
    occupancy: Vec<OccupancyRecord>,
    occupancy_by_call: HashMap<CallId, usize>,
    markers: MarkerForest,
    symbols: SymbolTable,
    report: CompletenessReport,
}

impl TraceModel {
    pub(crate) fn build(
        header: TraceHeader,
        footer: Option<TraceFooter>,
        outputs: Vec<HandlerOutput>,
        counts: ParseCounts,
        demangler: &dyn Demangler,
    ) -> Self {
        let mut calls = Vec::new();
        let mut samples = Vec::new();
        let mut occupancy = Vec::new();
        let mut markers = MarkerForest::default();
        let mut symbols = Vec::new();

        for output in outputs {
            match output {
                HandlerOutput::ApiCalls { calls: c, .. } => calls.extend(c),
                HandlerOutput::CounterSamples(s) => samples.extend(s),
                HandlerOutput::Markers(forest) => markers = forest,
                HandlerOutput::Occupancy(o) => occupancy.extend(o),
                HandlerOutput::Symbols(s) => symbols.extend(s),
            }
        }

        calls.sort_by_key(|c| (c.start_ns, c.call_id));
        let call_index: HashMap<CallId, usize> = calls
            .iter()
            .enumerate()
            .map(|(i, c)| (c.call_id, i))
            .collect();

        let mut dangling_links = 0;
        samples.retain(|s| {
            let linked = call_index.contains_key(&s.call_id);
            if !linked {
                dangling_links += 1;
            }
            linked
        });
        let sample_by_call = samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.call_id, i))
            .collect();

        occupancy.retain(|o| {
            let linked = call_index.contains_key(&o.call_id);
            if !linked {
                dangling_links += 1;
            }
            linked
        });
        let occupancy_by_call = occupancy
            .iter()
            .enumerate()
            .map(|(i, o)| (o.call_id, i))
            .collect();

        let report = CompletenessReport {
            dropped_records: footer.map_or(0, |f| f.dropped),
            degraded_captures: footer.map_or(0, |f| f.degraded),
            malformed_records: counts.malformed_records,
            unknown_sections: counts.unknown_sections,
            dangling_links,
            nesting_warnings: markers.nesting_warnings,
            // A file whose footer is missing or lacks a clean-shutdown flag
            // did not survive to an orderly finish
            truncated: counts.truncated || !footer.is_some_and(|f| f.clean),
        };

        Self {
            header,
            footer,
            calls,
            call_index,
            samples,
            sample_by_call,
            occupancy,
            occupancy_by_call,
            markers,
            symbols: SymbolTable::new(symbols, demangler),
            report,
        }
    }

    pub fn header(&self) -> &TraceHeader {
        &self.header
    }

    pub fn footer(&self) -> Option<&TraceFooter> {
        self.footer.as_ref()
    }

    pub fn report(&self) -> &CompletenessReport {
        &self.report
    }

    /// All call records, ordered by global start time
    pub fn calls(&self) -> &[ApiCallRecord] {
        &self.calls
    }

    pub fn call(&self, call_id: CallId) -> Option<&ApiCallRecord> {
        self.call_index.get(&call_id).map(|&i| &self.calls[i])
    }

    pub fn calls_for_thread(&self, tid: Tid) -> impl Iterator<Item = &ApiCallRecord> {
        self.calls.iter().filter(move |c| c.tid == tid)
    }

    pub fn calls_in_category(
        &self,
        category: ApiCategory,
    ) -> impl Iterator<Item = &ApiCallRecord> {
        self.calls.iter().filter(move |c| c.category == category)
    }

    /// Thread ids present in the trace, ascending
    pub fn threads(&self) -> Vec<Tid> {
        let mut tids: Vec<Tid> = self.calls.iter().map(|c| c.tid).collect();
        tids.sort_unstable();
        tids.dedup();
        tids
    }

    pub fn samples(&self) -> &[CounterSample] {
        &self.samples
    }

    pub fn sample_for(&self, call_id: CallId) -> Option<&CounterSample> {
        self.sample_by_call.get(&call_id).map(|&i| &self.samples[i])
    }

    pub fn occupancy(&self) -> &[OccupancyRecord] {
        &self.occupancy
    }

    pub fn occupancy_for(&self, call_id: CallId) -> Option<&OccupancyRecord> {
        self.occupancy_by_call
            .get(&call_id)
            .map(|&i| &self.occupancy[i])
    }

    pub fn markers(&self) -> &MarkerForest {
        &self.markers
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Export the merged model for downstream consumers
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct ModelJson<'a> {
            header: &'a TraceHeader,
            calls: &'a [ApiCallRecord],
            samples: &'a [CounterSample],
            occupancy: &'a [OccupancyRecord],
            markers: &'a MarkerForest,
            symbols: &'a [SymbolEntry],
            report: &'a CompletenessReport,
        }
        serde_json::to_string_pretty(&ModelJson {
            header: &self.header,
            calls: &self.calls,
            samples: &self.samples,
            occupancy: &self.occupancy,
            markers: &self.markers,
            symbols: self.symbols.entries(),
            report: &self.report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::PassthroughDemangler;
    use sightline_shared::types::records::ApiFamily;

    fn header() -> TraceHeader {
        TraceHeader {
            version_major: 1,
            version_minor: 0,
            producer_version: "0.1.0".into(),
            application: "t".into(),
            application_args: String::new(),
            working_directory: String::new(),
            os_version: String::new(),
            pid: 1,
            trace_start_ns: 0,
            counters: vec![],
            excluded_apis: vec![],
        }
    }

    fn call(call_id: u64, tid: u32, start_ns: u64) -> ApiCallRecord {
        ApiCallRecord {
            call_id,
            family: ApiFamily::OpenCl,
            name: "clFlush".into(),
            category: ApiCategory::Synchronization,
            tid,
            start_ns,
            end_ns: start_ns + 5,
            args: String::new(),
            ret: "0".into(),
            sample_id: None,
            repeat: 1,
        }
    }

    #[test]
    fn test_calls_sorted_by_start_time() {
        let outputs = vec![HandlerOutput::ApiCalls {
            family: ApiFamily::OpenCl,
            calls: vec![call(2, 1, 300), call(1, 1, 100), call(3, 2, 200)],
        }];
        let model = TraceModel::build(
            header(),
            Some(TraceFooter {
                dropped: 0,
                degraded: 0,
                clean: true,
            }),
            outputs,
            ParseCounts::default(),
            &PassthroughDemangler,
        );
        let starts: Vec<u64> = model.calls().iter().map(|c| c.start_ns).collect();
        assert_eq!(starts, vec![100, 200, 300]);
        assert_eq!(model.threads(), vec![1, 2]);
        assert!(!model.report().truncated);
    }

    #[test]
    fn test_dangling_sample_dropped_and_counted() {
        let outputs = vec![
            HandlerOutput::ApiCalls {
                family: ApiFamily::OpenCl,
                calls: vec![call(1, 1, 100)],
            },
            HandlerOutput::CounterSamples(vec![CounterSample {
                sample_id: 1,
                call_id: 99,
                values: vec![],
            }]),
        ];
        let model = TraceModel::build(
            header(),
            None,
            outputs,
            ParseCounts::default(),
            &PassthroughDemangler,
        );
        assert!(model.samples().is_empty());
        assert_eq!(model.report().dangling_links, 1);
        // No footer means the file was truncated
        assert!(model.report().truncated);
    }

    #[test]
    fn test_missing_footer_zeroes_loss_counts() {
        let model = TraceModel::build(
            header(),
            None,
            vec![],
            ParseCounts::default(),
            &PassthroughDemangler,
        );
        assert_eq!(model.report().dropped_records, 0);
        assert!(model.footer().is_none());
    }
}
