//! Capture session
//!
//! The explicit installation context for one capture: owns the writer, the
//! counter collaborator, and all interception state. Sessions are
//! independent; tests construct as many as they need.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use sightline_shared::format::{VERSION_MAJOR, VERSION_MINOR};
use sightline_shared::types::records::{ApiFamily, MarkerKind, SymbolEntry, TraceHeader};
use sightline_shared::utils::time::TraceClock;

use crate::apis;
use crate::config::{CaptureConfig, DeviceLimits};
use crate::counters::CounterCollector;
use crate::entry_table::{build_wrapper_table, DispatchTable, InstallError, WrapperTable};
use crate::interceptor::AgentInner;
use crate::markers::MarkerScope;
use crate::writer::{TraceRecord, TraceWriter};

/// Resource usage of one kernel, registered by name for occupancy records
#[derive(Debug, Clone, Default)]
pub struct KernelResources {
    pub vgprs_used: u32,
    pub sgprs_used: u32,
    pub lds_used: u32,
}

/// Final accounting for one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    pub written: u64,
    pub dropped: u64,
    pub degraded: u64,
}

/// One capture session inside the profiled process
pub struct CaptureSession {
    inner: Arc<AgentInner>,
}

impl CaptureSession {
    /// Start capturing: create the trace file, write its header, and bring
    /// up the counter collaborator if counters were requested.
    ///
    /// A counter backend failure degrades to capture without samples; it
    /// does not fail the session.
    pub fn begin(config: CaptureConfig, collector: Arc<dyn CounterCollector>) -> Result<Self> {
        config.validate()?;

        let clock = TraceClock::start();
        let header = build_header(&config, &clock);
        let writer = TraceWriter::create(&config.output_path, &header, config.queue_capacity)
            .with_context(|| {
                format!("failed to create trace file {}", config.output_path.display())
            })?;

        let inner = AgentInner::new(config, clock, writer, collector);

        if !inner.config.counters.is_empty() {
            match start_counters(&inner) {
                Ok(()) => inner.counters_active.store(true, Ordering::Relaxed),
                Err(e) => warn!("counter collection unavailable: {e:#}"),
            }
        }

        info!(
            path = %inner.config.output_path.display(),
            "capture session started"
        );
        Ok(Self { inner })
    }

    /// Produce the wrapper table for one API family.
    ///
    /// Rejects a second install of the same family within this session; the
    /// injection collaborator swaps tables exactly once per family.
    pub fn install(&self, dispatch: &DispatchTable) -> Result<WrapperTable, InstallError> {
        let family = dispatch.family();
        {
            let mut installed = self
                .inner
                .installed
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !installed.insert(family) {
                return Err(InstallError::AlreadyInstalled(family));
            }
        }

        if let Some(sync_name) = apis::sync_entry_point(family) {
            if let Some(real) = dispatch.get(sync_name) {
                self.inner
                    .sync_fns
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(family, Arc::clone(real));
            }
        }

        Ok(build_wrapper_table(&self.inner, dispatch))
    }

    /// Release a family so a later session (or reinstall) can wrap it again
    pub fn uninstall(&self, family: ApiFamily) -> Result<(), InstallError> {
        let removed = self
            .inner
            .installed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&family);
        if !removed {
            return Err(InstallError::NotInstalled(family));
        }
        self.inner
            .sync_fns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&family);
        Ok(())
    }

    /// Toggle capture. Records already accepted by the writer are still
    /// written; wrappers become pass-throughs while disabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Open a named timing region on the calling thread
    pub fn begin_marker(&self, name: impl Into<String>, group: impl Into<String>) {
        self.inner
            .emit_marker(MarkerKind::Begin, name.into(), group.into());
    }

    /// Close the innermost open region on the calling thread
    pub fn end_marker(&self) {
        self.inner
            .emit_marker(MarkerKind::End, String::new(), String::new());
    }

    /// Begin a marker region that ends when the guard drops
    pub fn marker_scope(
        &self,
        name: impl Into<String>,
        group: impl Into<String>,
    ) -> MarkerScope<'_> {
        self.begin_marker(name, group);
        MarkerScope::new(self)
    }

    /// Register a kernel's resource usage for occupancy records
    pub fn register_kernel(&self, name: impl Into<String>, resources: KernelResources) {
        self.inner
            .kernels
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.into(), resources);
    }

    /// Record one kernel-symbol entry; demangling happens at parse time
    pub fn add_symbol(&self, address: u64, mangled: impl Into<String>) {
        self.inner.flush_pending_polling();
        self.inner.submit(TraceRecord::Symbol(SymbolEntry {
            address,
            mangled: mangled.into(),
            demangled: None,
        }));
    }

    /// Stop capturing, drain the writer, and write the footer
    pub fn finish(self) -> Result<CaptureReport> {
        self.set_enabled(false);
        self.inner.flush_pending_polling();
        let report = self
            .inner
            .writer
            .finish()
            .context("failed to finalize trace file")?;
        info!(
            written = report.written,
            dropped = report.dropped,
            degraded = report.degraded,
            "capture session finished"
        );
        Ok(CaptureReport {
            written: report.written,
            dropped: report.dropped,
            degraded: report.degraded,
        })
    }
}

fn build_header(config: &CaptureConfig, clock: &TraceClock) -> TraceHeader {
    TraceHeader {
        version_major: VERSION_MAJOR,
        version_minor: VERSION_MINOR,
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        application: config.application.clone(),
        application_args: config.application_args.clone(),
        working_directory: std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default(),
        os_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        pid: std::process::id(),
        trace_start_ns: clock.start_ns(),
        counters: config.counters.clone(),
        excluded_apis: config.excluded_apis.iter().cloned().collect(),
    }
}

/// Validate requested counters against the backend and open the session
fn start_counters(inner: &Arc<AgentInner>) -> Result<()> {
    let available = inner.collector.list_available_counters()?;
    for name in &inner.config.counters {
        if !available.contains(name) {
            warn!(counter = %name, "requested counter not reported as available");
        }
    }
    inner.collector.begin_session(&inner.config.counters)
}

/// Wave-slot occupancy of one dispatch, limited by whichever resource runs
/// out first (wave slots, VGPRs, SGPRs, or LDS), at work-group granularity
pub(crate) fn compute_occupancy(
    limits: &DeviceLimits,
    resources: &KernelResources,
    kernel_name: &str,
    work_group_size: u32,
    call_id: u64,
    tid: u32,
) -> sightline_shared::types::records::OccupancyRecord {
    let waves_per_wg = work_group_size.div_ceil(limits.wavefront_size).max(1);

    let mut active_waves = limits.max_waves_per_cu;
    if resources.vgprs_used > 0 {
        let per_simd = limits.vgprs_max / resources.vgprs_used;
        active_waves = active_waves.min(per_simd.saturating_mul(limits.simds_per_cu));
    }
    if resources.sgprs_used > 0 {
        let per_simd = limits.sgprs_max / resources.sgprs_used;
        active_waves = active_waves.min(per_simd.saturating_mul(limits.simds_per_cu));
    }
    if resources.lds_used > 0 {
        let work_groups = limits.lds_max / resources.lds_used;
        active_waves = active_waves.min(work_groups.saturating_mul(waves_per_wg));
    }
    // Waves launch in whole work-groups
    active_waves = (active_waves / waves_per_wg) * waves_per_wg;

    let occupancy_pct = f64::from(active_waves) / f64::from(limits.max_waves_per_cu) * 100.0;

    sightline_shared::types::records::OccupancyRecord {
        call_id,
        tid,
        kernel_name: kernel_name.to_string(),
        device_name: limits.device_name.clone(),
        compute_units: limits.compute_units,
        simds_per_cu: limits.simds_per_cu,
        max_waves_per_cu: limits.max_waves_per_cu,
        wavefront_size: limits.wavefront_size,
        work_group_size,
        waves_per_work_group: waves_per_wg,
        vgprs_used: resources.vgprs_used,
        vgprs_max: limits.vgprs_max,
        sgprs_used: resources.sgprs_used,
        sgprs_max: limits.sgprs_max,
        lds_used: resources.lds_used,
        lds_max: limits.lds_max,
        occupancy_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            device_name: "gfx90a".into(),
            compute_units: 104,
            simds_per_cu: 4,
            max_waves_per_cu: 40,
            wavefront_size: 64,
            vgprs_max: 512,
            sgprs_max: 800,
            lds_max: 65536,
        }
    }

    #[test]
    fn test_occupancy_unconstrained_kernel() {
        let rec = compute_occupancy(&limits(), &KernelResources::default(), "k", 256, 1, 1);
        assert_eq!(rec.waves_per_work_group, 4);
        assert_eq!(rec.occupancy_pct, 100.0);
    }

    #[test]
    fn test_occupancy_vgpr_limited() {
        let resources = KernelResources {
            vgprs_used: 128,
            ..Default::default()
        };
        // 512/128 = 4 waves per SIMD, 4 SIMDs = 16 waves of 40 slots
        let rec = compute_occupancy(&limits(), &resources, "k", 64, 1, 1);
        assert_eq!(rec.occupancy_pct, 40.0);
    }

    #[test]
    fn test_occupancy_lds_limited() {
        let resources = KernelResources {
            lds_used: 32768,
            ..Default::default()
        };
        // 2 work-groups of 4 waves each = 8 of 40 slots
        let rec = compute_occupancy(&limits(), &resources, "k", 256, 1, 1);
        assert_eq!(rec.occupancy_pct, 20.0);
    }

    #[test]
    fn test_occupancy_rounds_to_whole_work_groups() {
        let resources = KernelResources {
            vgprs_used: 96,
            ..Default::default()
        };
        // 512/96 = 5 waves per SIMD, 4 SIMDs = 20 waves; work-groups of 3
        // waves fit 6 times = 18 waves
        let rec = compute_occupancy(&limits(), &resources, "k", 192, 1, 1);
        assert_eq!(rec.waves_per_work_group, 3);
        assert_eq!(rec.occupancy_pct, 45.0);
    }
}
