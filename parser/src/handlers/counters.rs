//! Counter-sample section handler

use std::collections::HashSet;

use sightline_shared::format::codec::{decode_counter_sample, RawRecord};
use sightline_shared::format::SectionKind;
use sightline_shared::types::records::CounterSample;

use super::{DataHandler, HandlerOutput, SkipReason};

/// Accumulates counter samples; each sample belongs to exactly one dispatch
/// call, so a duplicate sample id or call id is skipped
pub struct CounterSampleHandler {
    samples: Vec<CounterSample>,
    seen_sample_ids: HashSet<u64>,
    seen_call_ids: HashSet<u64>,
}

impl CounterSampleHandler {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            seen_sample_ids: HashSet::new(),
            seen_call_ids: HashSet::new(),
        }
    }
}

impl Default for CounterSampleHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DataHandler for CounterSampleHandler {
    fn section_kind(&self) -> SectionKind {
        SectionKind::Counters
    }

    fn parse_record(&mut self, raw: &RawRecord) -> Result<(), SkipReason> {
        let sample = decode_counter_sample(raw)?;
        if !self.seen_sample_ids.insert(sample.sample_id) {
            return Err(SkipReason::Invalid(format!(
                "duplicate sample id {}",
                sample.sample_id
            )));
        }
        if !self.seen_call_ids.insert(sample.call_id) {
            return Err(SkipReason::Invalid(format!(
                "second sample for call id {}",
                sample.call_id
            )));
        }
        self.samples.push(sample);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> HandlerOutput {
        HandlerOutput::CounterSamples(self.samples)
    }
}
