use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tempfile::{tempdir, NamedTempFile};

use sightline_agent::writer::{TraceRecord, TraceWriter};
use sightline_agent::{CaptureConfig, CaptureSession, DispatchTable, NullCollector};
use sightline_parser::parse_file;
use sightline_shared::format::codec::{decode_api_call, RawRecord};
use sightline_shared::format::{SectionHeader, SectionKind};
use sightline_shared::types::classify::ApiCategory;
use sightline_shared::types::records::{ApiCallRecord, ApiFamily, ApiValue, TraceHeader};

fn test_header() -> TraceHeader {
    TraceHeader {
        version_major: 1,
        version_minor: 0,
        producer_version: "0.1.0".into(),
        application: "roundtrip".into(),
        application_args: String::new(),
        working_directory: "/tmp".into(),
        os_version: "linux x86_64".into(),
        pid: 42,
        trace_start_ns: 1_000,
        counters: vec![],
        excluded_apis: vec![],
    }
}

fn synthetic_call(call_id: u64, tid: u32) -> ApiCallRecord {
    ApiCallRecord {
        call_id,
        family: ApiFamily::OpenCl,
        name: "clEnqueueWriteBuffer".into(),
        category: ApiCategory::MemoryTransfer,
        tid,
        start_ns: 1_000 + call_id * 100,
        end_ns: 1_000 + call_id * 100 + 50,
        args: format!("command_queue=0x10;buffer=0x{call_id:x};blocking_write=1;offset=0;size=4096;ptr=0x7f00"),
        ret: "0".into(),
        sample_id: None,
        repeat: 1,
    }
}

fn write_synthetic_trace(path: &std::path::Path, n: u64) -> Result<()> {
    let writer = TraceWriter::create(path, &test_header(), 8192)?;
    for i in 0..n {
        assert!(writer.submit(TraceRecord::Api(synthetic_call(i + 1, 7))));
    }
    let report = writer.finish()?;
    assert_eq!(report.written, n);
    Ok(())
}

#[test]
fn test_roundtrip_exact_records() -> Result<()> {
    for n in [0u64, 1, 1000] {
        let dir = tempdir()?;
        let path = dir.path().join("trace.sltrace");
        write_synthetic_trace(&path, n)?;

        let model = parse_file(&path)?;
        assert_eq!(model.calls().len(), n as usize, "for n = {n}");
        assert!(!model.report().truncated);
        assert_eq!(model.report().malformed_records, 0);
        assert_eq!(model.header().application, "roundtrip");

        for (i, call) in model.calls().iter().enumerate() {
            assert_eq!(call, &synthetic_call(i as u64 + 1, 7));
        }
    }
    Ok(())
}

#[test]
fn test_truncation_at_every_line_boundary() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("trace.sltrace");
    write_synthetic_trace(&path, 30)?;

    let contents = fs::read_to_string(&path)?;
    let lines: Vec<&str> = contents.split_inclusive('\n').collect();

    for cut in 1..=lines.len() {
        let prefix: String = lines[..cut].concat();
        let mut file = NamedTempFile::new()?;
        file.write_all(prefix.as_bytes())?;
        file.flush()?;

        let model = parse_file(file.path())?;
        let expected = lines[..cut]
            .iter()
            .filter(|l| !l.starts_with('@') && !l.starts_with('#'))
            .count();
        assert_eq!(model.calls().len(), expected, "cut after line {cut}");
        assert_eq!(model.report().malformed_records, 0, "cut after line {cut}");

        if cut == lines.len() {
            assert!(!model.report().truncated);
        } else {
            assert!(model.report().truncated, "cut after line {cut}");
        }
    }
    Ok(())
}

#[test]
fn test_capture_roundtrip_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let trace_path = dir.path().join("trace.sltrace");
    let session = CaptureSession::begin(
        CaptureConfig::new(&trace_path),
        Arc::new(NullCollector),
    )?;

    let mut dispatch = DispatchTable::new(ApiFamily::OpenCl);
    dispatch.insert(
        "clEnqueueWriteBuffer",
        Arc::new(|_args: &[ApiValue]| ApiValue::Status(0)),
    );
    let table = session.install(&dispatch)?;

    for i in 0..100u64 {
        table.invoke(
            "clEnqueueWriteBuffer",
            &[
                ApiValue::Ptr(0x10),
                ApiValue::Ptr(0x2000 + i),
                ApiValue::U32(1),
                ApiValue::U64(0),
                ApiValue::U64(4096),
                ApiValue::Ptr(0x7f00),
            ],
        );
    }
    let report = session.finish()?;
    assert_eq!(report.written, 100);
    assert_eq!(report.dropped, 0);

    let model = parse_file(&trace_path)?;
    assert_eq!(model.calls().len(), 100);
    assert!(!model.report().truncated);
    assert_eq!(model.report().dropped_records, 0);
    assert_eq!(
        model.calls_in_category(ApiCategory::MemoryTransfer).count(),
        100
    );

    // Snapshots carry the per-name layout labels
    let first = &model.calls()[0];
    assert!(first.args.starts_with("command_queue=0x10;buffer=0x2000;"));
    assert_eq!(first.ret, "0");
    Ok(())
}

#[test]
fn test_eight_threads_hundred_records_each() -> Result<()> {
    let dir = tempdir()?;
    let trace_path = dir.path().join("trace.sltrace");
    let session = CaptureSession::begin(
        CaptureConfig::new(&trace_path),
        Arc::new(NullCollector),
    )?;

    let mut dispatch = DispatchTable::new(ApiFamily::OpenCl);
    dispatch.insert("clFlush", Arc::new(|_args: &[ApiValue]| ApiValue::Status(0)));
    let table = Arc::new(session.install(&dispatch)?);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let ret = table.invoke("clFlush", &[ApiValue::Ptr(0x10)]).unwrap();
                    assert_eq!(ret, ApiValue::Status(0));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let report = session.finish()?;
    assert_eq!(report.written, 800);
    assert_eq!(report.dropped, 0);

    let model = parse_file(&trace_path)?;
    assert_eq!(model.calls().len(), 800);
    assert_eq!(model.report().malformed_records, 0);

    let threads = model.threads();
    assert_eq!(threads.len(), 8);
    for tid in threads {
        assert_eq!(model.calls_for_thread(tid).count(), 100);
    }
    Ok(())
}

/// Per-thread record timestamps must be non-decreasing in file order, which
/// the sorted model view cannot show; scan the raw sections instead.
#[test]
fn test_per_thread_timestamps_non_decreasing_in_file_order() -> Result<()> {
    let dir = tempdir()?;
    let trace_path = dir.path().join("trace.sltrace");
    let session = CaptureSession::begin(
        CaptureConfig::new(&trace_path),
        Arc::new(NullCollector),
    )?;

    let mut dispatch = DispatchTable::new(ApiFamily::OpenCl);
    dispatch.insert("clFlush", Arc::new(|_args: &[ApiValue]| ApiValue::Status(0)));
    let table = Arc::new(session.install(&dispatch)?);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    table.invoke("clFlush", &[ApiValue::Ptr(0x10)]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    session.finish()?;

    let contents = fs::read_to_string(&trace_path)?;
    let mut family = None;
    let mut remaining = 0u64;
    let mut last_end: HashMap<u32, u64> = HashMap::new();
    let mut records = 0usize;

    for (line_no, line) in contents.lines().enumerate() {
        if line.starts_with("@section") {
            let section = SectionHeader::decode(line)?;
            family = match SectionKind::from_tag(&section.tag) {
                Some(SectionKind::Api(f)) => Some(f),
                _ => None,
            };
            remaining = section.count;
            continue;
        }
        if line.starts_with('#') || line.starts_with('@') || remaining == 0 {
            continue;
        }
        remaining -= 1;
        let Some(family) = family else { continue };

        let raw = RawRecord::from_line(line_no as u64 + 1, line)?;
        let record = decode_api_call(family, &raw)?;
        let last = last_end.entry(record.tid).or_insert(0);
        assert!(
            record.end_ns >= *last,
            "thread {} went backwards at line {}",
            record.tid,
            line_no + 1
        );
        *last = record.end_ns;
        records += 1;
    }
    assert_eq!(records, 200);
    Ok(())
}
