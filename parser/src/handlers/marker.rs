//! Perf-marker section handler
//!
//! Maintains a per-thread stack while parsing so begin/end nesting is
//! validated as records arrive. A marker left unmatched at end-of-input is
//! demoted to a flat event and counted as a nesting warning, never a
//! parse failure; completed regions nested inside it are preserved.

use std::collections::HashMap;

use sightline_shared::format::codec::{decode_marker, RawRecord};
use sightline_shared::format::SectionKind;
use sightline_shared::types::records::{MarkerKind, Tid};

use super::{DataHandler, HandlerOutput, SkipReason};
use crate::model::{MarkerEvent, MarkerForest, MarkerNode};

struct OpenMarker {
    name: String,
    group: String,
    begin_ns: u64,
    children: Vec<MarkerNode>,
}

#[derive(Default)]
struct ThreadState {
    stack: Vec<OpenMarker>,
    roots: Vec<MarkerNode>,
}

pub struct PerfMarkerHandler {
    threads: HashMap<Tid, ThreadState>,
    flat: Vec<MarkerEvent>,
    nesting_warnings: u64,
}

impl PerfMarkerHandler {
    pub fn new() -> Self {
        Self {
            threads: HashMap::new(),
            flat: Vec::new(),
            nesting_warnings: 0,
        }
    }
}

impl Default for PerfMarkerHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DataHandler for PerfMarkerHandler {
    fn section_kind(&self) -> SectionKind {
        SectionKind::PerfMarker
    }

    fn parse_record(&mut self, raw: &RawRecord) -> Result<(), SkipReason> {
        let record = decode_marker(raw)?;
        let state = self.threads.entry(record.tid).or_default();

        match record.kind {
            MarkerKind::Begin => {
                state.stack.push(OpenMarker {
                    name: record.name,
                    group: record.group,
                    begin_ns: record.ts_ns,
                    children: Vec::new(),
                });
            }
            MarkerKind::End => match state.stack.pop() {
                Some(open) => {
                    let depth = state.stack.len() as u32 + 1;
                    let node = MarkerNode {
                        name: open.name,
                        group: open.group,
                        tid: record.tid,
                        begin_ns: open.begin_ns,
                        end_ns: record.ts_ns,
                        depth,
                        children: open.children,
                    };
                    match state.stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => state.roots.push(node),
                    }
                }
                None => {
                    // End with no open region: demote to a flat event
                    self.nesting_warnings += 1;
                    self.flat.push(MarkerEvent {
                        name: record.name,
                        group: record.group,
                        tid: record.tid,
                        ts_ns: record.ts_ns,
                    });
                }
            },
        }
        Ok(())
    }

    fn finalize(self: Box<Self>) -> HandlerOutput {
        let mut roots = Vec::new();
        let mut flat = self.flat;
        let mut nesting_warnings = self.nesting_warnings;

        for (tid, mut state) in self.threads {
            // Unwind unmatched opens innermost-first; their completed
            // children stay in the forest one level up.
            while let Some(open) = state.stack.pop() {
                nesting_warnings += 1;
                flat.push(MarkerEvent {
                    name: open.name,
                    group: open.group,
                    tid,
                    ts_ns: open.begin_ns,
                });
                let mut promoted = open.children;
                shift_depth(&mut promoted);
                match state.stack.last_mut() {
                    Some(parent) => parent.children.extend(promoted),
                    None => state.roots.extend(promoted),
                }
            }
            roots.extend(state.roots);
        }

        roots.sort_by_key(|n| (n.begin_ns, n.tid));
        flat.sort_by_key(|e| (e.ts_ns, e.tid));

        HandlerOutput::Markers(MarkerForest {
            roots,
            flat,
            nesting_warnings,
        })
    }
}

fn shift_depth(nodes: &mut [MarkerNode]) {
    for node in nodes {
        node.depth -= 1;
        shift_depth(&mut node.children);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_shared::format::codec::encode_marker;
    use sightline_shared::types::records::MarkerRecord;

    fn feed(handler: &mut PerfMarkerHandler, record: MarkerRecord) {
        let raw = RawRecord::from_line(1, &encode_marker(&record)).unwrap();
        handler.parse_record(&raw).unwrap();
    }

    fn begin(tid: u32, ts_ns: u64, name: &str) -> MarkerRecord {
        MarkerRecord {
            kind: MarkerKind::Begin,
            tid,
            ts_ns,
            name: name.into(),
            group: String::new(),
        }
    }

    fn end(tid: u32, ts_ns: u64) -> MarkerRecord {
        MarkerRecord {
            kind: MarkerKind::End,
            tid,
            ts_ns,
            name: String::new(),
            group: String::new(),
        }
    }

    fn forest(handler: PerfMarkerHandler) -> MarkerForest {
        match Box::new(handler).finalize() {
            HandlerOutput::Markers(f) => f,
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_three_level_nesting() {
        let mut handler = PerfMarkerHandler::new();
        feed(&mut handler, begin(1, 10, "A"));
        feed(&mut handler, begin(1, 20, "B"));
        feed(&mut handler, begin(1, 30, "C"));
        feed(&mut handler, end(1, 40));
        feed(&mut handler, end(1, 50));
        feed(&mut handler, end(1, 60));

        let forest = forest(handler);
        assert_eq!(forest.nesting_warnings, 0);
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.max_depth(), 3);

        let a = &forest.roots[0];
        assert_eq!(a.name, "A");
        assert_eq!((a.begin_ns, a.end_ns, a.depth), (10, 60, 1));
        let b = &a.children[0];
        assert_eq!(b.name, "B");
        assert_eq!(b.depth, 2);
        let c = &b.children[0];
        assert_eq!(c.name, "C");
        assert_eq!((c.begin_ns, c.end_ns, c.depth), (30, 40, 3));
    }

    #[test]
    fn test_unmatched_open_demoted_to_flat_event() {
        let mut handler = PerfMarkerHandler::new();
        feed(&mut handler, begin(1, 10, "left-open"));

        let forest = forest(handler);
        assert_eq!(forest.nesting_warnings, 1);
        assert!(forest.roots.is_empty());
        assert_eq!(forest.flat.len(), 1);
        assert_eq!(forest.flat[0].name, "left-open");
        assert_eq!(forest.flat[0].ts_ns, 10);
    }

    #[test]
    fn test_unmatched_open_keeps_completed_children() {
        let mut handler = PerfMarkerHandler::new();
        feed(&mut handler, begin(1, 10, "outer"));
        feed(&mut handler, begin(1, 20, "inner"));
        feed(&mut handler, end(1, 30));
        // "outer" never ends

        let forest = forest(handler);
        assert_eq!(forest.nesting_warnings, 1);
        assert_eq!(forest.flat.len(), 1);
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.roots[0].name, "inner");
        assert_eq!(forest.roots[0].depth, 1);
    }

    #[test]
    fn test_stray_end_demoted() {
        let mut handler = PerfMarkerHandler::new();
        feed(&mut handler, end(1, 5));
        feed(&mut handler, begin(1, 10, "ok"));
        feed(&mut handler, end(1, 20));

        let forest = forest(handler);
        assert_eq!(forest.nesting_warnings, 1);
        assert_eq!(forest.flat.len(), 1);
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.roots[0].name, "ok");
    }

    #[test]
    fn test_threads_nest_independently() {
        let mut handler = PerfMarkerHandler::new();
        feed(&mut handler, begin(1, 10, "t1"));
        feed(&mut handler, begin(2, 15, "t2"));
        feed(&mut handler, end(1, 20));
        feed(&mut handler, end(2, 25));

        let forest = forest(handler);
        assert_eq!(forest.nesting_warnings, 0);
        assert_eq!(forest.roots.len(), 2);
        assert_eq!(forest.roots_for_thread(1).count(), 1);
        assert_eq!(forest.roots_for_thread(2).count(), 1);
        assert_eq!(forest.max_depth(), 1);
    }
}
