//! Trace reader
//!
//! Opens a trace file, validates the header, iterates sections in file
//! order, and feeds records to the registered handlers. A corrupt or
//! unsupported header is the only fatal condition; unknown sections,
//! malformed records, and truncation are recovered and counted.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use sightline_shared::format::codec::RawRecord;
use sightline_shared::format::{
    metadata_line, parse_version, split_list, SectionHeader, FOOTER_MARKER, HEADER_LINE_PREFIX,
    KEY_APPLICATION, KEY_APPLICATION_ARGS, KEY_CLEAN, KEY_COUNTERS, KEY_DEGRADED, KEY_DROPPED,
    KEY_EXCLUDED_APIS, KEY_OS_VERSION, KEY_PROCESS_ID, KEY_PROFILER_VERSION,
    KEY_TRACE_FILE_VERSION, KEY_TRACE_START_TIME, KEY_WORKING_DIRECTORY, SECTION_MARKER,
    VERSION_MAJOR,
};
use sightline_shared::types::records::{TraceFooter, TraceHeader};

use crate::handlers::{default_handlers, DataHandler, Demangler, PassthroughDemangler};
use crate::model::{ParseCounts, TraceModel};

/// Fatal parse failure. Everything else is recovered and surfaced through
/// the completeness report.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to open trace file: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("unsupported trace file version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },
}

/// Parse a trace file with the default handler set
pub fn parse_file(path: impl AsRef<Path>) -> Result<TraceModel, ParseError> {
    TraceReader::new().parse(path)
}

/// Parse a trace file, resolving symbols through the given demangler
pub fn parse_file_with(
    path: impl AsRef<Path>,
    demangler: &dyn Demangler,
) -> Result<TraceModel, ParseError> {
    TraceReader::new().parse_with(path, demangler)
}

/// Section-dispatching trace file reader
pub struct TraceReader {
    handlers: Vec<Box<dyn DataHandler>>,
}

impl Default for TraceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceReader {
    /// Reader with the full default handler set
    pub fn new() -> Self {
        Self {
            handlers: default_handlers(),
        }
    }

    /// Reader with a caller-chosen handler set; sections without a handler
    /// are skipped and counted
    pub fn with_handlers(handlers: Vec<Box<dyn DataHandler>>) -> Self {
        Self { handlers }
    }

    pub fn parse(self, path: impl AsRef<Path>) -> Result<TraceModel, ParseError> {
        self.parse_with(path, &PassthroughDemangler)
    }

    pub fn parse_with(
        mut self,
        path: impl AsRef<Path>,
        demangler: &dyn Demangler,
    ) -> Result<TraceModel, ParseError> {
        let file = File::open(path.as_ref())?;
        let mut lines = LineSource::new(BufReader::new(file));

        let (header, mut pending) = read_header(&mut lines)?;

        let registry: HashMap<&'static str, usize> = self
            .handlers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.section_kind().tag(), i))
            .collect();

        let mut counts = ParseCounts::default();
        let mut footer = None;

        'sections: while let Some(line) = pending.take().or_else(|| lines.next_line()) {
            if line == FOOTER_MARKER {
                footer = Some(read_footer(&mut lines));
                break;
            }

            if !line.starts_with(SECTION_MARKER) {
                debug!(line_no = lines.line_no, "stray line outside any section");
                counts.malformed_records += 1;
                continue;
            }

            let section = match SectionHeader::decode(&line) {
                Ok(section) => section,
                Err(e) => {
                    // Framing is lost; everything before this line is intact
                    warn!(line_no = lines.line_no, error = %e, "malformed section header; stopping");
                    counts.truncated = true;
                    break;
                }
            };

            match registry.get(section.tag.as_str()).copied() {
                None => {
                    debug!(tag = %section.tag, count = section.count, "skipping unhandled section");
                    counts.unknown_sections += 1;
                    for _ in 0..section.count {
                        if lines.next_line().is_none() {
                            counts.truncated = true;
                            break 'sections;
                        }
                    }
                }
                Some(handler_idx) => {
                    for _ in 0..section.count {
                        let Some(record_line) = lines.next_line() else {
                            counts.truncated = true;
                            break 'sections;
                        };
                        match RawRecord::from_line(lines.line_no, &record_line) {
                            Ok(raw) => {
                                if let Err(reason) = self.handlers[handler_idx].parse_record(&raw)
                                {
                                    debug!(line_no = lines.line_no, %reason, "record skipped");
                                    counts.malformed_records += 1;
                                }
                            }
                            Err(e) => {
                                debug!(line_no = lines.line_no, error = %e, "record skipped");
                                counts.malformed_records += 1;
                            }
                        }
                    }
                }
            }
        }

        if lines.io_failed {
            counts.truncated = true;
        }

        let outputs = self
            .handlers
            .into_iter()
            .map(|h| h.finalize())
            .collect();
        Ok(TraceModel::build(header, footer, outputs, counts, demangler))
    }
}

struct LineSource<R> {
    lines: io::Lines<R>,
    line_no: u64,
    io_failed: bool,
}

impl<R: BufRead> LineSource<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            io_failed: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        match self.lines.next() {
            Some(Ok(line)) => {
                self.line_no += 1;
                Some(line)
            }
            Some(Err(e)) => {
                warn!(line_no = self.line_no, error = %e, "read failed; treating as truncation");
                self.io_failed = true;
                None
            }
            None => None,
        }
    }
}

/// Read and validate the header block.
///
/// Returns the header and the first non-header line, which already belongs
/// to the section phase.
fn read_header<R: BufRead>(
    lines: &mut LineSource<R>,
) -> Result<(TraceHeader, Option<String>), ParseError> {
    let first = lines
        .next_line()
        .ok_or_else(|| ParseError::CorruptHeader("empty file".to_string()))?;
    let (key, value) = metadata_line(&first)
        .map_err(|_| ParseError::CorruptHeader(format!("bad first line `{first}`")))?;
    if key != KEY_TRACE_FILE_VERSION {
        return Err(ParseError::CorruptHeader(format!(
            "expected {KEY_TRACE_FILE_VERSION}, found `{key}`"
        )));
    }
    let (major, minor) =
        parse_version(value).map_err(|e| ParseError::CorruptHeader(e.to_string()))?;
    if major != VERSION_MAJOR {
        return Err(ParseError::UnsupportedVersion { major, minor });
    }

    let mut header = TraceHeader {
        version_major: major,
        version_minor: minor,
        producer_version: String::new(),
        application: String::new(),
        application_args: String::new(),
        working_directory: String::new(),
        os_version: String::new(),
        pid: 0,
        trace_start_ns: 0,
        counters: Vec::new(),
        excluded_apis: Vec::new(),
    };

    loop {
        let Some(line) = lines.next_line() else {
            return Ok((header, None));
        };
        if !line.starts_with(HEADER_LINE_PREFIX) {
            return Ok((header, Some(line)));
        }
        match metadata_line(&line) {
            Ok((key, value)) => apply_header_field(&mut header, key, value),
            Err(_) => debug!(line_no = lines.line_no, "ignoring malformed header line"),
        }
    }
}

/// Apply one header key; unknown keys from newer minor versions are ignored
fn apply_header_field(header: &mut TraceHeader, key: &str, value: &str) {
    match key {
        KEY_PROFILER_VERSION => header.producer_version = value.to_string(),
        KEY_APPLICATION => header.application = value.to_string(),
        KEY_APPLICATION_ARGS => header.application_args = value.to_string(),
        KEY_WORKING_DIRECTORY => header.working_directory = value.to_string(),
        KEY_OS_VERSION => header.os_version = value.to_string(),
        KEY_PROCESS_ID => {
            if let Ok(pid) = value.parse() {
                header.pid = pid;
            }
        }
        KEY_TRACE_START_TIME => {
            if let Ok(ns) = value.parse() {
                header.trace_start_ns = ns;
            }
        }
        KEY_COUNTERS => header.counters = split_list(value),
        KEY_EXCLUDED_APIS => header.excluded_apis = split_list(value),
        _ => {}
    }
}

/// Read the `#Key=Value` lines after the `@footer` marker
fn read_footer<R: BufRead>(lines: &mut LineSource<R>) -> TraceFooter {
    let mut footer = TraceFooter {
        dropped: 0,
        degraded: 0,
        clean: false,
    };
    while let Some(line) = lines.next_line() {
        if !line.starts_with(HEADER_LINE_PREFIX) {
            break;
        }
        if let Ok((key, value)) = metadata_line(&line) {
            match key {
                KEY_DROPPED => footer.dropped = value.parse().unwrap_or(0),
                KEY_DEGRADED => footer.degraded = value.parse().unwrap_or(0),
                KEY_CLEAN => footer.clean = value == "true",
                _ => {}
            }
        }
    }
    footer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_trace(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const FOOTER: &str = "@footer\n#Dropped=0\n#Degraded=0\n#Clean=true\n";

    #[test]
    fn test_empty_file_is_corrupt_header() {
        let file = write_trace("");
        let err = parse_file(file.path()).unwrap_err();
        assert!(matches!(err, ParseError::CorruptHeader(_)));
    }

    #[test]
    fn test_garbage_first_line_is_corrupt_header() {
        let file = write_trace("this is not a trace\n");
        let err = parse_file(file.path()).unwrap_err();
        assert!(matches!(err, ParseError::CorruptHeader(_)));
    }

    #[test]
    fn test_unsupported_major_version() {
        let file = write_trace("#TraceFileVersion=2.0\n");
        let err = parse_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnsupportedVersion { major: 2, minor: 0 }
        ));
    }

    #[test]
    fn test_newer_minor_version_accepted() {
        let contents = format!("#TraceFileVersion=1.9\n#FutureKey=whatever\n{FOOTER}");
        let file = write_trace(&contents);
        let model = parse_file(file.path()).unwrap();
        assert_eq!(model.header().version_minor, 9);
        assert!(!model.report().truncated);
    }

    #[test]
    fn test_header_fields_parsed() {
        let contents = format!(
            "#TraceFileVersion=1.0\n#Application=matmul\n#ProcessID=77\n\
             #Counters=Wavefronts,VALUUtilization\n#ExcludedAPIs=clGetEventInfo\n{FOOTER}"
        );
        let file = write_trace(&contents);
        let model = parse_file(file.path()).unwrap();
        assert_eq!(model.header().application, "matmul");
        assert_eq!(model.header().pid, 77);
        assert_eq!(model.header().counters.len(), 2);
        assert_eq!(model.header().excluded_apis, vec!["clGetEventInfo"]);
    }

    #[test]
    fn test_missing_footer_marks_truncated() {
        let file = write_trace("#TraceFileVersion=1.0\n");
        let model = parse_file(file.path()).unwrap();
        assert!(model.report().truncated);
        assert!(model.footer().is_none());
    }

    #[test]
    fn test_unknown_section_between_known_sections() {
        let contents = format!(
            "#TraceFileVersion=1.0\n\
             @section ocl-api 1\n\
             1|5|clFlush|sync|10|20||0||1\n\
             @section gpu-timestamps 2\n\
             whatever|this|is\n\
             not|understood\n\
             @section ocl-api 1\n\
             2|5|clFinish|sync|30|40||0||1\n{FOOTER}"
        );
        let file = write_trace(&contents);
        let model = parse_file(file.path()).unwrap();
        assert_eq!(model.calls().len(), 2);
        assert_eq!(model.report().unknown_sections, 1);
        assert_eq!(model.report().malformed_records, 0);
        assert!(!model.report().truncated);
    }

    #[test]
    fn test_malformed_record_skipped_section_continues() {
        let contents = format!(
            "#TraceFileVersion=1.0\n\
             @section ocl-api 3\n\
             1|5|clFlush|sync|10|20||0||1\n\
             garbage\n\
             3|5|clFinish|sync|30|40||0||1\n{FOOTER}"
        );
        let file = write_trace(&contents);
        let model = parse_file(file.path()).unwrap();
        assert_eq!(model.calls().len(), 2);
        assert_eq!(model.report().malformed_records, 1);
    }

    #[test]
    fn test_short_section_marks_truncated() {
        let contents = "#TraceFileVersion=1.0\n\
             @section ocl-api 5\n\
             1|5|clFlush|sync|10|20||0||1\n";
        let file = write_trace(contents);
        let model = parse_file(file.path()).unwrap();
        assert_eq!(model.calls().len(), 1);
        assert!(model.report().truncated);
    }

    #[test]
    fn test_handler_subset_skips_other_sections() {
        use crate::handlers::api::ApiCallHandler;
        use sightline_shared::types::records::ApiFamily;

        let contents = format!(
            "#TraceFileVersion=1.0\n\
             @section perfmarker 1\n\
             B|5|10|frame|render\n\
             @section ocl-api 1\n\
             1|5|clFlush|sync|10|20||0||1\n{FOOTER}"
        );
        let file = write_trace(&contents);
        let reader = TraceReader::with_handlers(vec![Box::new(ApiCallHandler::new(
            ApiFamily::OpenCl,
        ))]);
        let model = reader.parse(file.path()).unwrap();
        assert_eq!(model.calls().len(), 1);
        assert_eq!(model.report().unknown_sections, 1);
    }
}
