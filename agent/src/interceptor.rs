//! Per-call interception logic
//!
//! A wrapper measures the call, snapshots its arguments, invokes the saved
//! real entry point, and hands the finished record to the writer. Nothing
//! here may panic, block on the device or disk (counter reads excepted, and
//! only when enabled), or change what the caller observes.
//!
//! In-flight timing lives on the wrapping call's own stack frame, so
//! reentrant wrapped calls nest naturally; the only thread-local state is
//! the pending slot used to collapse consecutive polling calls.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{debug, warn};

use sightline_shared::format::{ARG_SEPARATOR, PARAM_VALUE_DELIMITER};
use sightline_shared::types::classify::{classify, ApiCategory};
use sightline_shared::types::records::{
    ApiCallRecord, ApiFamily, ApiValue, CounterSample, MarkerKind, MarkerRecord,
};
use sightline_shared::utils::thread::current_tid;
use sightline_shared::utils::time::TraceClock;

use crate::apis::{EntryPointDesc, KERNEL_PARAM, WORK_GROUP_PARAM};
use crate::config::CaptureConfig;
use crate::counters::{CounterCollector, DispatchToken};
use crate::entry_table::EntryFn;
use crate::session::{self, KernelResources};
use crate::writer::{TraceRecord, TraceWriter};

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state of one capture session
pub(crate) struct AgentInner {
    pub(crate) id: u64,
    pub(crate) config: CaptureConfig,
    pub(crate) clock: TraceClock,
    pub(crate) writer: TraceWriter,
    pub(crate) collector: Arc<dyn CounterCollector>,

    /// True once `begin_session` on the collector succeeded
    pub(crate) counters_active: AtomicBool,

    /// Capture toggle; checked once per wrapped call
    pub(crate) enabled: AtomicBool,

    next_call_id: AtomicU64,
    next_sample_id: AtomicU64,

    /// Families currently installed, for idempotent install/uninstall
    pub(crate) installed: Mutex<BTreeSet<ApiFamily>>,

    /// Saved real queue-flush entry per family, for `flush_before_sample`
    pub(crate) sync_fns: Mutex<HashMap<ApiFamily, EntryFn>>,

    /// Kernel resource usage registered by name, for occupancy records
    pub(crate) kernels: RwLock<HashMap<String, KernelResources>>,
}

impl AgentInner {
    pub(crate) fn new(
        config: CaptureConfig,
        clock: TraceClock,
        writer: TraceWriter,
        collector: Arc<dyn CounterCollector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed),
            config,
            clock,
            writer,
            collector,
            counters_active: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            next_call_id: AtomicU64::new(1),
            next_sample_id: AtomicU64::new(1),
            installed: Mutex::new(BTreeSet::new()),
            sync_fns: Mutex::new(HashMap::new()),
            kernels: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Full wrapper body for one intercepted call
    pub(crate) fn intercepted_call(
        self: &Arc<Self>,
        family: ApiFamily,
        desc: &'static EntryPointDesc,
        real: &EntryFn,
        args: &[ApiValue],
    ) -> ApiValue {
        if !self.is_enabled() {
            self.flush_pending_polling();
            return real(args);
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let tid = current_tid();
        let start_ns = self.clock.now_ns();

        let ret = real(args);

        let end_ns = self.clock.now_ns();
        self.record_call(family, desc, args, &ret, call_id, tid, start_ns, end_ns);
        ret
    }

    /// Build and emit the record for a completed call; never fails
    #[allow(clippy::too_many_arguments)]
    fn record_call(
        self: &Arc<Self>,
        family: ApiFamily,
        desc: &'static EntryPointDesc,
        args: &[ApiValue],
        ret: &ApiValue,
        call_id: u64,
        tid: u32,
        start_ns: u64,
        end_ns: u64,
    ) {
        let snapshot = match self.snapshot_args(desc, args) {
            Some(s) => s,
            None => {
                self.note_degraded(desc.name, "argument snapshot failed");
                String::new()
            }
        };

        let mut record = ApiCallRecord {
            call_id,
            family,
            name: desc.name.to_string(),
            category: classify(family, desc.name),
            tid,
            start_ns,
            end_ns,
            args: snapshot,
            ret: ret.to_string(),
            sample_id: None,
            repeat: 1,
        };

        let mut sample = None;
        let mut occupancy = None;
        if desc.is_dispatch {
            let kernel_name = arg_value(desc, args, KERNEL_PARAM).map(|v| v.to_string());
            sample = self.sample_counters(family, call_id, kernel_name.as_deref());
            record.sample_id = sample.as_ref().map(|s| s.sample_id);
            occupancy = self.build_occupancy(desc, args, kernel_name.as_deref(), call_id, tid);
        }

        self.emit_call(record, sample, occupancy);
    }

    fn snapshot_args(&self, desc: &EntryPointDesc, args: &[ApiValue]) -> Option<String> {
        if args.len() != desc.params.len() {
            return None;
        }
        let mut out = String::new();
        for (i, (name, value)) in desc.params.iter().zip(args).enumerate() {
            if i > 0 {
                out.push(ARG_SEPARATOR);
            }
            out.push_str(name);
            out.push(PARAM_VALUE_DELIMITER);
            out.push_str(&value.to_string());
        }
        Some(out)
    }

    /// Read one counter sample for a completed dispatch, if collection is on
    fn sample_counters(
        &self,
        family: ApiFamily,
        call_id: u64,
        kernel_name: Option<&str>,
    ) -> Option<CounterSample> {
        if !self.counters_active.load(Ordering::Relaxed) {
            return None;
        }

        if self.config.flush_before_sample {
            let sync_fn = self
                .sync_fns
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&family)
                .cloned();
            match sync_fn {
                Some(f) => {
                    f(&[]);
                }
                None => debug!(family = %family, "no queue-flush entry saved for family"),
            }
        }

        let token = DispatchToken {
            call_id,
            kernel_name: kernel_name.map(str::to_string),
        };
        match self
            .collector
            .read_sample(&token, self.config.counter_timeout)
        {
            Ok(values) => Some(CounterSample {
                sample_id: self.next_sample_id.fetch_add(1, Ordering::Relaxed),
                call_id,
                values,
            }),
            Err(e) => {
                self.note_degraded("counter sample", &e.to_string());
                None
            }
        }
    }

    /// Build an occupancy record for a dispatch when the device limits and
    /// the kernel's resource usage are known
    fn build_occupancy(
        &self,
        desc: &EntryPointDesc,
        args: &[ApiValue],
        kernel_name: Option<&str>,
        call_id: u64,
        tid: u32,
    ) -> Option<sightline_shared::types::records::OccupancyRecord> {
        let limits = self.config.device.as_ref()?;
        let kernel_name = kernel_name?;
        let work_group_size = arg_value(desc, args, WORK_GROUP_PARAM).and_then(value_as_u32)?;
        let resources = self
            .kernels
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(kernel_name)
            .cloned()?;
        Some(session::compute_occupancy(
            limits,
            &resources,
            kernel_name,
            work_group_size,
            call_id,
            tid,
        ))
    }

    /// Emit a marker event; flushes the pending polling slot first so the
    /// marker cannot overtake an earlier call of this thread in file order
    pub(crate) fn emit_marker(&self, kind: MarkerKind, name: String, group: String) {
        if !self.is_enabled() {
            return;
        }
        self.flush_pending_polling();
        self.submit(TraceRecord::Marker(MarkerRecord {
            kind,
            tid: current_tid(),
            ts_ns: self.clock.now_ns(),
            name,
            group,
        }));
    }

    /// Hand a finished call record to the writer, or stash it for collapsing
    fn emit_call(
        self: &Arc<Self>,
        record: ApiCallRecord,
        sample: Option<CounterSample>,
        occupancy: Option<sightline_shared::types::records::OccupancyRecord>,
    ) {
        let collapsible = self.config.collapse_polling
            && record.category == ApiCategory::Polling
            && sample.is_none()
            && occupancy.is_none();
        if collapsible {
            self.stash_polling(record);
            return;
        }

        self.flush_pending_polling();
        self.submit(TraceRecord::Api(record));
        if let Some(sample) = sample {
            self.submit(TraceRecord::Counter(sample));
        }
        if let Some(occupancy) = occupancy {
            self.submit(TraceRecord::Occupancy(occupancy));
        }
    }

    /// Merge into this thread's pending polling record, or rotate it out
    fn stash_polling(self: &Arc<Self>, record: ApiCallRecord) {
        PENDING.with(|pending| {
            let mut store = pending.borrow_mut();
            let slots = &mut store.slots;
            if let Some(slot) = slots.iter_mut().find(|s| s.agent_id == self.id) {
                if slot.record.name == record.name
                    && slot.record.args == record.args
                    && slot.record.ret == record.ret
                {
                    slot.record.repeat += 1;
                    slot.record.end_ns = record.end_ns;
                    return;
                }
                let previous = std::mem::replace(&mut slot.record, record);
                self.submit(TraceRecord::Api(previous));
            } else {
                slots.push(PendingPolling {
                    agent_id: self.id,
                    agent: Arc::downgrade(self),
                    record,
                });
            }
        });
    }

    /// Flush this thread's pending polling record for this session, if any
    pub(crate) fn flush_pending_polling(&self) {
        let record = PENDING.with(|pending| {
            let mut store = pending.borrow_mut();
            let slots = &mut store.slots;
            slots
                .iter()
                .position(|s| s.agent_id == self.id)
                .map(|i| slots.swap_remove(i).record)
        });
        if let Some(record) = record {
            self.submit(TraceRecord::Api(record));
        }
    }

    pub(crate) fn submit(&self, record: TraceRecord) {
        if !self.writer.submit(record) {
            debug!("trace record dropped at capacity");
        }
    }

    pub(crate) fn note_degraded(&self, what: &str, reason: &str) {
        self.writer.note_degraded();
        warn!(what, reason, "capture degraded; call unaffected");
    }
}

/// Look up an argument by its descriptor parameter name
fn arg_value<'a>(
    desc: &EntryPointDesc,
    args: &'a [ApiValue],
    param: &str,
) -> Option<&'a ApiValue> {
    desc.params
        .iter()
        .position(|p| *p == param)
        .and_then(|i| args.get(i))
}

fn value_as_u32(value: &ApiValue) -> Option<u32> {
    match value {
        ApiValue::U32(v) => Some(*v),
        ApiValue::U64(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

/// Pending polling record of one session on this thread
struct PendingPolling {
    agent_id: u64,
    agent: Weak<AgentInner>,
    record: ApiCallRecord,
}

/// Per-thread pending store; flushes surviving records at thread exit
struct PendingStore {
    slots: Vec<PendingPolling>,
}

impl Drop for PendingStore {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            if let Some(agent) = slot.agent.upgrade() {
                agent.submit(TraceRecord::Api(slot.record));
            }
        }
    }
}

thread_local! {
    static PENDING: RefCell<PendingStore> = RefCell::new(PendingStore { slots: Vec::new() });
}
