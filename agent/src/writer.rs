//! Trace writer
//!
//! Accepts finished records from any thread and appends them to the trace
//! file. The hot path is one lock-free enqueue; a sidecar thread drains the
//! queue in batches and performs all I/O, so a producer is never blocked on
//! the disk. When the queue is full the record is dropped (drop-new policy)
//! and counted; the count ends up in the file footer.
//!
//! Each drained batch is flushed as complete sections, so whatever has been
//! flushed is a valid, parseable prefix if the process dies mid-capture.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use tracing::warn;

use sightline_shared::format::codec::{
    encode_api_call, encode_counter_sample, encode_marker, encode_occupancy, encode_symbol,
};
use sightline_shared::format::{encode_footer, encode_header, SectionHeader, SectionKind};
use sightline_shared::types::records::{
    ApiCallRecord, ApiFamily, CounterSample, MarkerRecord, OccupancyRecord, SymbolEntry,
    TraceFooter, TraceHeader,
};

const BATCH_SIZE: usize = 256;
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Sections are flushed in this order within one batch so that a record is
/// always preceded by the call record it references.
const KIND_ORDER: [SectionKind; 6] = [
    SectionKind::Api(ApiFamily::OpenCl),
    SectionKind::Api(ApiFamily::Hsa),
    SectionKind::Counters,
    SectionKind::Occupancy,
    SectionKind::PerfMarker,
    SectionKind::Symbol,
];

/// One finished record queued for serialization
#[derive(Debug, Clone)]
pub enum TraceRecord {
    Api(ApiCallRecord),
    Counter(CounterSample),
    Marker(MarkerRecord),
    Occupancy(OccupancyRecord),
    Symbol(SymbolEntry),
}

impl TraceRecord {
    fn section_kind(&self) -> SectionKind {
        match self {
            TraceRecord::Api(rec) => SectionKind::Api(rec.family),
            TraceRecord::Counter(_) => SectionKind::Counters,
            TraceRecord::Marker(_) => SectionKind::PerfMarker,
            TraceRecord::Occupancy(_) => SectionKind::Occupancy,
            TraceRecord::Symbol(_) => SectionKind::Symbol,
        }
    }

    fn encode(&self) -> String {
        match self {
            TraceRecord::Api(rec) => encode_api_call(rec),
            TraceRecord::Counter(rec) => encode_counter_sample(rec),
            TraceRecord::Marker(rec) => encode_marker(rec),
            TraceRecord::Occupancy(rec) => encode_occupancy(rec),
            TraceRecord::Symbol(rec) => encode_symbol(rec),
        }
    }
}

/// Accounting returned by [`TraceWriter::finish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterReport {
    /// Records written to the file
    pub written: u64,

    /// Records dropped at capacity
    pub dropped: u64,

    /// Capture degradations noted by the interception agent
    pub degraded: u64,
}

/// Concurrency-safe, append-only trace serializer
pub struct TraceWriter {
    queue: Arc<ArrayQueue<TraceRecord>>,
    stop: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    degraded: Arc<AtomicU64>,
    sidecar: Mutex<Option<JoinHandle<io::Result<()>>>>,
    report: Mutex<Option<WriterReport>>,
}

impl TraceWriter {
    /// Create the trace file, write its header, and start the sidecar thread
    pub fn create(path: &Path, header: &TraceHeader, capacity: usize) -> io::Result<Self> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(encode_header(header).as_bytes())?;
        file.flush()?;

        let queue = Arc::new(ArrayQueue::new(capacity));
        let stop = Arc::new(AtomicBool::new(false));
        let written = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let degraded = Arc::new(AtomicU64::new(0));

        let sidecar = thread::Builder::new().name("sightline-writer".into()).spawn({
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let written = Arc::clone(&written);
            let dropped = Arc::clone(&dropped);
            let degraded = Arc::clone(&degraded);
            move || sidecar_worker(file, queue, stop, written, dropped, degraded)
        })?;

        Ok(Self {
            queue,
            stop,
            written,
            dropped,
            degraded,
            sidecar: Mutex::new(Some(sidecar)),
            report: Mutex::new(None),
        })
    }

    /// Enqueue one finished record (hot path).
    ///
    /// Returns false when the record was dropped at capacity.
    pub fn submit(&self, record: TraceRecord) -> bool {
        match self.queue.push(record) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Count one capture degradation for the footer
    pub fn note_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Drain outstanding records, write the footer, and stop the sidecar.
    ///
    /// Idempotent: later calls return the first report.
    pub fn finish(&self) -> io::Result<WriterReport> {
        if let Some(report) = *self.report.lock().expect("writer report lock poisoned") {
            return Ok(report);
        }

        self.stop.store(true, Ordering::SeqCst);
        let handle = self
            .sidecar
            .lock()
            .expect("writer sidecar lock poisoned")
            .take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(io::Error::other("trace writer thread panicked")),
            }
        }

        let report = WriterReport {
            written: self.written.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            degraded: self.degraded.load(Ordering::SeqCst),
        };
        *self.report.lock().expect("writer report lock poisoned") = Some(report);
        Ok(report)
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self
            .sidecar
            .lock()
            .expect("writer sidecar lock poisoned")
            .take();
        if let Some(handle) = handle {
            if let Ok(Err(e)) = handle.join() {
                warn!("trace writer shutdown failed: {e}");
            }
        }
    }
}

fn sidecar_worker(
    mut file: BufWriter<File>,
    queue: Arc<ArrayQueue<TraceRecord>>,
    stop: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    degraded: Arc<AtomicU64>,
) -> io::Result<()> {
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    loop {
        let stopping = stop.load(Ordering::SeqCst);

        while let Some(record) = queue.pop() {
            batch.push(record);
            if !stopping && batch.len() >= BATCH_SIZE {
                break;
            }
        }

        if !batch.is_empty() {
            write_batch(&mut file, &batch, &written)?;
            file.flush()?;
            batch.clear();
        } else if stopping {
            break;
        } else {
            thread::sleep(IDLE_SLEEP);
        }
    }

    let footer = TraceFooter {
        dropped: dropped.load(Ordering::SeqCst),
        degraded: degraded.load(Ordering::SeqCst),
        clean: true,
    };
    file.write_all(encode_footer(&footer).as_bytes())?;
    file.flush()
}

/// Write one batch as sections grouped by kind, in [`KIND_ORDER`]
fn write_batch(
    file: &mut BufWriter<File>,
    batch: &[TraceRecord],
    written: &AtomicU64,
) -> io::Result<()> {
    for kind in KIND_ORDER {
        let lines: Vec<String> = batch
            .iter()
            .filter(|r| r.section_kind() == kind)
            .map(TraceRecord::encode)
            .collect();
        if lines.is_empty() {
            continue;
        }

        let section = SectionHeader {
            tag: kind.tag().to_string(),
            count: lines.len() as u64,
        };
        writeln!(file, "{}", section.encode())?;
        for line in &lines {
            writeln!(file, "{line}")?;
        }
        written.fetch_add(lines.len() as u64, Ordering::Relaxed);
    }
    Ok(())
}
