//! Occupancy section handler

use std::collections::HashSet;

use sightline_shared::format::codec::{decode_occupancy, RawRecord};
use sightline_shared::format::SectionKind;
use sightline_shared::types::records::OccupancyRecord;

use super::{DataHandler, HandlerOutput, SkipReason};

/// Accumulates occupancy records; one per dispatch call id
pub struct OccupancyHandler {
    records: Vec<OccupancyRecord>,
    seen_call_ids: HashSet<u64>,
}

impl OccupancyHandler {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            seen_call_ids: HashSet::new(),
        }
    }
}

impl Default for OccupancyHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DataHandler for OccupancyHandler {
    fn section_kind(&self) -> SectionKind {
        SectionKind::Occupancy
    }

    fn parse_record(&mut self, raw: &RawRecord) -> Result<(), SkipReason> {
        let record = decode_occupancy(raw)?;
        if !self.seen_call_ids.insert(record.call_id) {
            return Err(SkipReason::Invalid(format!(
                "second occupancy record for call id {}",
                record.call_id
            )));
        }
        if !(0.0..=100.0).contains(&record.occupancy_pct) {
            return Err(SkipReason::Invalid(format!(
                "occupancy {} out of range",
                record.occupancy_pct
            )));
        }
        self.records.push(record);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> HandlerOutput {
        HandlerOutput::Occupancy(self.records)
    }
}
