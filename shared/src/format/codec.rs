//! Record codecs
//!
//! One encode/decode pair per record kind. Decoders accept trailing extra
//! fields so a minor-version producer can add columns without breaking old
//! readers; missing fields are an error.

use crate::format::escape::{join_fields, split_fields};
use crate::format::{DecodeError, LIST_SEPARATOR, PARAM_VALUE_DELIMITER};
use crate::types::classify::ApiCategory;
use crate::types::records::{
    ApiCallRecord, ApiFamily, CounterSample, MarkerKind, MarkerRecord, OccupancyRecord,
    SymbolEntry,
};

/// One record line split into unescaped fields, with its position for
/// skip diagnostics
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub line_no: u64,
    pub fields: Vec<String>,
}

impl RawRecord {
    /// Split a record line into a raw record
    pub fn from_line(line_no: u64, line: &str) -> Result<Self, DecodeError> {
        Ok(RawRecord {
            line_no,
            fields: split_fields(line)?,
        })
    }

    fn expect(&self, want: usize) -> Result<(), DecodeError> {
        if self.fields.len() < want {
            return Err(DecodeError::FieldCount {
                want,
                got: self.fields.len(),
            });
        }
        Ok(())
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidInt {
        field,
        value: value.to_string(),
    })
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidInt {
        field,
        value: value.to_string(),
    })
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidFloat {
        field,
        value: value.to_string(),
    })
}

// ---------------------------------------------------------------------------
// API call records
// ---------------------------------------------------------------------------

const API_FIELDS: usize = 10;

/// Encode an API call record; the family is carried by the section tag
pub fn encode_api_call(rec: &ApiCallRecord) -> String {
    join_fields([
        rec.call_id.to_string().as_str(),
        rec.tid.to_string().as_str(),
        rec.name.as_str(),
        rec.category.as_str(),
        rec.start_ns.to_string().as_str(),
        rec.end_ns.to_string().as_str(),
        rec.args.as_str(),
        rec.ret.as_str(),
        rec.sample_id
            .map(|id| id.to_string())
            .unwrap_or_default()
            .as_str(),
        rec.repeat.to_string().as_str(),
    ])
}

pub fn decode_api_call(family: ApiFamily, raw: &RawRecord) -> Result<ApiCallRecord, DecodeError> {
    raw.expect(API_FIELDS)?;
    let f = &raw.fields;
    let category = ApiCategory::from_str(&f[3]).ok_or_else(|| DecodeError::UnknownTag {
        what: "category",
        value: f[3].clone(),
    })?;
    let sample_id = if f[8].is_empty() {
        None
    } else {
        Some(parse_u64("sample_id", &f[8])?)
    };
    Ok(ApiCallRecord {
        call_id: parse_u64("call_id", &f[0])?,
        family,
        name: f[2].clone(),
        category,
        tid: parse_u32("tid", &f[1])?,
        start_ns: parse_u64("start_ns", &f[4])?,
        end_ns: parse_u64("end_ns", &f[5])?,
        args: f[6].clone(),
        ret: f[7].clone(),
        sample_id,
        repeat: parse_u32("repeat", &f[9])?,
    })
}

// ---------------------------------------------------------------------------
// Counter samples
// ---------------------------------------------------------------------------

const COUNTER_FIELDS: usize = 3;

pub fn encode_counter_sample(sample: &CounterSample) -> String {
    let pairs = sample
        .values
        .iter()
        .map(|(name, value)| format!("{name}{PARAM_VALUE_DELIMITER}{value}"))
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string());
    join_fields([
        sample.sample_id.to_string().as_str(),
        sample.call_id.to_string().as_str(),
        pairs.as_str(),
    ])
}

pub fn decode_counter_sample(raw: &RawRecord) -> Result<CounterSample, DecodeError> {
    raw.expect(COUNTER_FIELDS)?;
    let f = &raw.fields;
    let mut values = Vec::new();
    if !f[2].is_empty() {
        for pair in f[2].split(LIST_SEPARATOR) {
            let (name, value) =
                pair.split_once(PARAM_VALUE_DELIMITER)
                    .ok_or_else(|| DecodeError::UnknownTag {
                        what: "counter pair",
                        value: pair.to_string(),
                    })?;
            values.push((name.to_string(), parse_u64("counter value", value)?));
        }
    }
    Ok(CounterSample {
        sample_id: parse_u64("sample_id", &f[0])?,
        call_id: parse_u64("call_id", &f[1])?,
        values,
    })
}

// ---------------------------------------------------------------------------
// Perf markers
// ---------------------------------------------------------------------------

const MARKER_FIELDS: usize = 5;

pub fn encode_marker(rec: &MarkerRecord) -> String {
    let kind = match rec.kind {
        MarkerKind::Begin => "B",
        MarkerKind::End => "E",
    };
    join_fields([
        kind,
        rec.tid.to_string().as_str(),
        rec.ts_ns.to_string().as_str(),
        rec.name.as_str(),
        rec.group.as_str(),
    ])
}

pub fn decode_marker(raw: &RawRecord) -> Result<MarkerRecord, DecodeError> {
    raw.expect(MARKER_FIELDS)?;
    let f = &raw.fields;
    let kind = match f[0].as_str() {
        "B" => MarkerKind::Begin,
        "E" => MarkerKind::End,
        other => {
            return Err(DecodeError::UnknownTag {
                what: "marker kind",
                value: other.to_string(),
            })
        }
    };
    Ok(MarkerRecord {
        kind,
        tid: parse_u32("tid", &f[1])?,
        ts_ns: parse_u64("ts_ns", &f[2])?,
        name: f[3].clone(),
        group: f[4].clone(),
    })
}

// ---------------------------------------------------------------------------
// Occupancy
// ---------------------------------------------------------------------------

const OCCUPANCY_FIELDS: usize = 17;

pub fn encode_occupancy(rec: &OccupancyRecord) -> String {
    join_fields([
        rec.call_id.to_string().as_str(),
        rec.tid.to_string().as_str(),
        rec.kernel_name.as_str(),
        rec.device_name.as_str(),
        rec.compute_units.to_string().as_str(),
        rec.simds_per_cu.to_string().as_str(),
        rec.max_waves_per_cu.to_string().as_str(),
        rec.wavefront_size.to_string().as_str(),
        rec.work_group_size.to_string().as_str(),
        rec.waves_per_work_group.to_string().as_str(),
        rec.vgprs_used.to_string().as_str(),
        rec.vgprs_max.to_string().as_str(),
        rec.sgprs_used.to_string().as_str(),
        rec.sgprs_max.to_string().as_str(),
        rec.lds_used.to_string().as_str(),
        rec.lds_max.to_string().as_str(),
        format!("{:.4}", rec.occupancy_pct).as_str(),
    ])
}

pub fn decode_occupancy(raw: &RawRecord) -> Result<OccupancyRecord, DecodeError> {
    raw.expect(OCCUPANCY_FIELDS)?;
    let f = &raw.fields;
    Ok(OccupancyRecord {
        call_id: parse_u64("call_id", &f[0])?,
        tid: parse_u32("tid", &f[1])?,
        kernel_name: f[2].clone(),
        device_name: f[3].clone(),
        compute_units: parse_u32("compute_units", &f[4])?,
        simds_per_cu: parse_u32("simds_per_cu", &f[5])?,
        max_waves_per_cu: parse_u32("max_waves_per_cu", &f[6])?,
        wavefront_size: parse_u32("wavefront_size", &f[7])?,
        work_group_size: parse_u32("work_group_size", &f[8])?,
        waves_per_work_group: parse_u32("waves_per_work_group", &f[9])?,
        vgprs_used: parse_u32("vgprs_used", &f[10])?,
        vgprs_max: parse_u32("vgprs_max", &f[11])?,
        sgprs_used: parse_u32("sgprs_used", &f[12])?,
        sgprs_max: parse_u32("sgprs_max", &f[13])?,
        lds_used: parse_u32("lds_used", &f[14])?,
        lds_max: parse_u32("lds_max", &f[15])?,
        occupancy_pct: parse_f64("occupancy_pct", &f[16])?,
    })
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

const SYMBOL_FIELDS: usize = 2;

pub fn encode_symbol(rec: &SymbolEntry) -> String {
    // The demangled name is never written; it is resolved at parse time
    join_fields([format!("{:x}", rec.address).as_str(), rec.mangled.as_str()])
}

pub fn decode_symbol(raw: &RawRecord) -> Result<SymbolEntry, DecodeError> {
    raw.expect(SYMBOL_FIELDS)?;
    let f = &raw.fields;
    let address = u64::from_str_radix(&f[0], 16).map_err(|_| DecodeError::InvalidInt {
        field: "address",
        value: f[0].clone(),
    })?;
    Ok(SymbolEntry {
        address,
        mangled: f[1].clone(),
        demangled: None,
    })
}
