//! Trace file format
//!
//! The format shared by the capture writer and the parser: a line-oriented,
//! sectioned, versioned text file.
//!
//! ```text
//! #TraceFileVersion=1.0
//! #ProfilerVersion=0.1.0
//! #Application=matmul
//! #ProcessID=4242
//! #TraceStartTime=1700000000000000000
//! #Counters=Wavefronts,VALUUtilization
//! @section ocl-api 2
//! 1|17|clGetPlatformIDs|query|100|180|num_entries=1|0||1
//! 2|17|clFinish|sync|200|950|command_queue=0x10|0||1
//! @section perfmarker 1
//! B|17|120|frame|render
//! @footer
//! #Dropped=0
//! #Degraded=0
//! #Clean=true
//! ```
//!
//! Records are one line each, fields joined by `|` with backslash escaping
//! (see [`escape`]), so a file truncated at any record boundary is a valid
//! prefix. Section headers carry a record count, so a reader can skip a
//! section whose tag it does not recognize without understanding its records.
//! Sections of one kind may repeat; the writer flushes batches incrementally.
//!
//! Schema changes bump the version: minor for additions old readers can
//! ignore, major for anything else. A reader rejects only a major mismatch.

pub mod codec;
pub mod escape;

use thiserror::Error;

use crate::types::records::{ApiFamily, TraceFooter, TraceHeader};

/// Format version written by this crate
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;

/// Field separator within a record line
pub const FIELD_SEPARATOR: char = '|';

/// Key/value delimiter in header and footer lines
pub const PARAM_VALUE_DELIMITER: char = '=';

/// Separator between `name=value` pairs in an argument snapshot
pub const ARG_SEPARATOR: char = ';';

/// Separator for list-valued header fields and counter pairs
pub const LIST_SEPARATOR: char = ',';

/// Prefix of header and footer metadata lines
pub const HEADER_LINE_PREFIX: char = '#';

/// First token of a section header line
pub const SECTION_MARKER: &str = "@section";

/// Marker line introducing the footer
pub const FOOTER_MARKER: &str = "@footer";

// Header keys
pub const KEY_TRACE_FILE_VERSION: &str = "TraceFileVersion";
pub const KEY_PROFILER_VERSION: &str = "ProfilerVersion";
pub const KEY_APPLICATION: &str = "Application";
pub const KEY_APPLICATION_ARGS: &str = "ApplicationArgs";
pub const KEY_WORKING_DIRECTORY: &str = "WorkingDirectory";
pub const KEY_OS_VERSION: &str = "OSVersion";
pub const KEY_PROCESS_ID: &str = "ProcessID";
pub const KEY_TRACE_START_TIME: &str = "TraceStartTime";
pub const KEY_TRACE_START_DISPLAY: &str = "TraceStartTimeDisplay";
pub const KEY_LIST_SEPARATOR: &str = "ListSeparator";
pub const KEY_COUNTERS: &str = "Counters";
pub const KEY_EXCLUDED_APIS: &str = "ExcludedAPIs";

// Footer keys
pub const KEY_DROPPED: &str = "Dropped";
pub const KEY_DEGRADED: &str = "Degraded";
pub const KEY_CLEAN: &str = "Clean";

/// Decoding failure for one line or field.
///
/// These are recoverable: the parser skips the offending record and
/// continues. Only an unreadable header aborts a parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record has {got} fields, expected {want}")]
    FieldCount { want: usize, got: usize },

    #[error("field `{field}`: invalid integer `{value}`")]
    InvalidInt { field: &'static str, value: String },

    #[error("field `{field}`: invalid float `{value}`")]
    InvalidFloat { field: &'static str, value: String },

    #[error("unknown {what} tag `{value}`")]
    UnknownTag { what: &'static str, value: String },

    #[error("dangling or unknown escape sequence")]
    BadEscape,

    #[error("malformed section header `{0}`")]
    BadSectionHeader(String),

    #[error("malformed metadata line `{0}`")]
    BadMetadataLine(String),
}

/// Kind tag of one trace-file section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Api(ApiFamily),
    Counters,
    PerfMarker,
    Occupancy,
    Symbol,
}

impl SectionKind {
    pub fn tag(&self) -> &'static str {
        match self {
            SectionKind::Api(ApiFamily::OpenCl) => "ocl-api",
            SectionKind::Api(ApiFamily::Hsa) => "hsa-api",
            SectionKind::Counters => "counters",
            SectionKind::PerfMarker => "perfmarker",
            SectionKind::Occupancy => "occupancy",
            SectionKind::Symbol => "symbol",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ocl-api" => Some(SectionKind::Api(ApiFamily::OpenCl)),
            "hsa-api" => Some(SectionKind::Api(ApiFamily::Hsa)),
            "counters" => Some(SectionKind::Counters),
            "perfmarker" => Some(SectionKind::PerfMarker),
            "occupancy" => Some(SectionKind::Occupancy),
            "symbol" => Some(SectionKind::Symbol),
            _ => None,
        }
    }
}

/// A section header parsed from a `@section` line: raw tag plus record count.
///
/// The tag stays raw so unknown kinds can be skipped and counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub tag: String,
    pub count: u64,
}

impl SectionHeader {
    /// Format as a `@section` line (without trailing newline)
    pub fn encode(&self) -> String {
        format!("{} {} {}", SECTION_MARKER, self.tag, self.count)
    }

    /// Parse a `@section` line; call only on lines starting with the marker
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let rest = line
            .strip_prefix(SECTION_MARKER)
            .ok_or_else(|| DecodeError::BadSectionHeader(line.to_string()))?;
        let mut parts = rest.split_whitespace();
        let tag = parts
            .next()
            .ok_or_else(|| DecodeError::BadSectionHeader(line.to_string()))?;
        let count = parts
            .next()
            .and_then(|c| c.parse::<u64>().ok())
            .ok_or_else(|| DecodeError::BadSectionHeader(line.to_string()))?;
        if parts.next().is_some() {
            return Err(DecodeError::BadSectionHeader(line.to_string()));
        }
        Ok(SectionHeader {
            tag: tag.to_string(),
            count,
        })
    }
}

/// Split a `#Key=Value` metadata line into key and value
pub fn metadata_line(line: &str) -> Result<(&str, &str), DecodeError> {
    let rest = line
        .strip_prefix(HEADER_LINE_PREFIX)
        .ok_or_else(|| DecodeError::BadMetadataLine(line.to_string()))?;
    rest.split_once(PARAM_VALUE_DELIMITER)
        .ok_or_else(|| DecodeError::BadMetadataLine(line.to_string()))
}

/// Render the header as its block of `#Key=Value` lines
pub fn encode_header(header: &TraceHeader) -> String {
    let mut out = String::new();
    let mut line = |key: &str, value: &str| {
        out.push(HEADER_LINE_PREFIX);
        out.push_str(key);
        out.push(PARAM_VALUE_DELIMITER);
        out.push_str(value);
        out.push('\n');
    };
    line(
        KEY_TRACE_FILE_VERSION,
        &format!("{}.{}", header.version_major, header.version_minor),
    );
    line(KEY_PROFILER_VERSION, &header.producer_version);
    line(KEY_APPLICATION, &header.application);
    line(KEY_APPLICATION_ARGS, &header.application_args);
    line(KEY_WORKING_DIRECTORY, &header.working_directory);
    line(KEY_OS_VERSION, &header.os_version);
    line(KEY_PROCESS_ID, &header.pid.to_string());
    line(KEY_TRACE_START_TIME, &header.trace_start_ns.to_string());
    line(
        KEY_TRACE_START_DISPLAY,
        &crate::utils::time::display_nanos(header.trace_start_ns),
    );
    line(KEY_LIST_SEPARATOR, &LIST_SEPARATOR.to_string());
    line(KEY_COUNTERS, &header.counters.join(&LIST_SEPARATOR.to_string()));
    line(
        KEY_EXCLUDED_APIS,
        &header.excluded_apis.join(&LIST_SEPARATOR.to_string()),
    );
    out
}

/// Parse the `TraceFileVersion` value into (major, minor)
pub fn parse_version(value: &str) -> Result<(u32, u32), DecodeError> {
    let bad = || DecodeError::InvalidInt {
        field: KEY_TRACE_FILE_VERSION,
        value: value.to_string(),
    };
    let (major, minor) = value.split_once('.').ok_or_else(bad)?;
    Ok((
        major.parse().map_err(|_| bad())?,
        minor.parse().map_err(|_| bad())?,
    ))
}

/// Render the footer block, including the `@footer` marker line
pub fn encode_footer(footer: &TraceFooter) -> String {
    format!(
        "{}\n{}{}{}{}\n{}{}{}{}\n{}{}{}{}\n",
        FOOTER_MARKER,
        HEADER_LINE_PREFIX,
        KEY_DROPPED,
        PARAM_VALUE_DELIMITER,
        footer.dropped,
        HEADER_LINE_PREFIX,
        KEY_DEGRADED,
        PARAM_VALUE_DELIMITER,
        footer.degraded,
        HEADER_LINE_PREFIX,
        KEY_CLEAN,
        PARAM_VALUE_DELIMITER,
        footer.clean,
    )
}

/// Split a comma-separated list value; an empty value is an empty list
pub fn split_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(LIST_SEPARATOR).map(str::to_string).collect()
    }
}
