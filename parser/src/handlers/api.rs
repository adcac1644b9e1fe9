//! API-call section handler, one instance per family

use std::collections::HashSet;

use sightline_shared::format::codec::{decode_api_call, RawRecord};
use sightline_shared::format::SectionKind;
use sightline_shared::types::records::{ApiCallRecord, ApiFamily};

use super::{DataHandler, HandlerOutput, SkipReason};

/// Accumulates the call records of one API family.
///
/// Call ids must be unique within a file; a duplicate is skipped with a
/// reason rather than silently shadowing the earlier record.
pub struct ApiCallHandler {
    family: ApiFamily,
    calls: Vec<ApiCallRecord>,
    seen_ids: HashSet<u64>,
}

impl ApiCallHandler {
    pub fn new(family: ApiFamily) -> Self {
        Self {
            family,
            calls: Vec::new(),
            seen_ids: HashSet::new(),
        }
    }
}

impl DataHandler for ApiCallHandler {
    fn section_kind(&self) -> SectionKind {
        SectionKind::Api(self.family)
    }

    fn parse_record(&mut self, raw: &RawRecord) -> Result<(), SkipReason> {
        let record = decode_api_call(self.family, raw)?;
        if !self.seen_ids.insert(record.call_id) {
            return Err(SkipReason::Invalid(format!(
                "duplicate call id {}",
                record.call_id
            )));
        }
        self.calls.push(record);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> HandlerOutput {
        HandlerOutput::ApiCalls {
            family: self.family,
            calls: self.calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_shared::format::codec::encode_api_call;
    use sightline_shared::types::classify::ApiCategory;

    fn record(call_id: u64) -> ApiCallRecord {
        ApiCallRecord {
            call_id,
            family: ApiFamily::OpenCl,
            name: "clFlush".into(),
            category: ApiCategory::Synchronization,
            tid: 3,
            start_ns: 10,
            end_ns: 20,
            args: "command_queue=0x1".into(),
            ret: "0".into(),
            sample_id: None,
            repeat: 1,
        }
    }

    fn raw(line: &str) -> RawRecord {
        RawRecord::from_line(1, line).unwrap()
    }

    #[test]
    fn test_accumulates_records() {
        let mut handler = ApiCallHandler::new(ApiFamily::OpenCl);
        handler
            .parse_record(&raw(&encode_api_call(&record(1))))
            .unwrap();
        handler
            .parse_record(&raw(&encode_api_call(&record(2))))
            .unwrap();
        match Box::new(handler).finalize() {
            HandlerOutput::ApiCalls { family, calls } => {
                assert_eq!(family, ApiFamily::OpenCl);
                assert_eq!(calls.len(), 2);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_call_id_skipped() {
        let mut handler = ApiCallHandler::new(ApiFamily::OpenCl);
        handler
            .parse_record(&raw(&encode_api_call(&record(7))))
            .unwrap();
        let err = handler
            .parse_record(&raw(&encode_api_call(&record(7))))
            .unwrap_err();
        assert!(matches!(err, SkipReason::Invalid(_)));
    }

    #[test]
    fn test_malformed_record_skipped() {
        let mut handler = ApiCallHandler::new(ApiFamily::OpenCl);
        let err = handler.parse_record(&raw("not|enough|fields")).unwrap_err();
        assert!(matches!(err, SkipReason::Malformed(_)));
    }
}
