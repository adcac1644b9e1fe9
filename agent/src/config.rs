//! Configuration types for the capture agent

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Capture configuration.
///
/// The injection collaborator configures the agent through the environment
/// (`SIGHTLINE_*` variables); embedders may also construct this directly.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Trace file path
    pub output_path: PathBuf,

    /// Profiled application name recorded in the header
    pub application: String,

    /// Profiled application arguments recorded in the header
    pub application_args: String,

    /// Writer queue capacity; records beyond it are dropped, never blocked on
    pub queue_capacity: usize,

    /// Counters to collect per kernel dispatch (empty = no counter sampling)
    pub counters: Vec<String>,

    /// Upper bound on one counter read; the only blocking the agent may do
    pub counter_timeout: Duration,

    /// Issue a real queue flush before each counter read. Off by default:
    /// this is the one capture side effect visible to the host application.
    pub flush_before_sample: bool,

    /// Entry points left unwrapped entirely
    pub excluded_apis: BTreeSet<String>,

    /// Merge consecutive identical polling calls into one record
    pub collapse_polling: bool,

    /// Device limits for occupancy records (None = no occupancy capture)
    pub device: Option<DeviceLimits>,
}

/// Compute-resource limits of the device kernels are dispatched to
#[derive(Debug, Clone)]
pub struct DeviceLimits {
    pub device_name: String,
    pub compute_units: u32,
    pub simds_per_cu: u32,
    pub max_waves_per_cu: u32,
    pub wavefront_size: u32,
    pub vgprs_max: u32,
    pub sgprs_max: u32,
    pub lds_max: u32,
}

impl CaptureConfig {
    /// Default configuration writing to `output_path`
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            application: String::new(),
            application_args: String::new(),
            queue_capacity: 8192,
            counters: Vec::new(),
            counter_timeout: Duration::from_secs(1),
            flush_before_sample: false,
            excluded_apis: BTreeSet::new(),
            collapse_polling: true,
            device: None,
        }
    }

    /// Build a configuration from `SIGHTLINE_*` environment variables.
    ///
    /// `SIGHTLINE_OUTPUT` is required; everything else falls back to the
    /// defaults of [`CaptureConfig::new`].
    pub fn from_env() -> Result<Self> {
        let output = std::env::var("SIGHTLINE_OUTPUT")
            .context("SIGHTLINE_OUTPUT is not set")?;
        let mut config = Self::new(output);

        if let Ok(counters) = std::env::var("SIGHTLINE_COUNTERS") {
            config.counters = counters
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(excluded) = std::env::var("SIGHTLINE_EXCLUDED_APIS") {
            config.excluded_apis = excluded
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(capacity) = std::env::var("SIGHTLINE_QUEUE_CAPACITY") {
            config.queue_capacity = capacity
                .parse()
                .context("SIGHTLINE_QUEUE_CAPACITY is not a number")?;
        }
        if let Ok(ms) = std::env::var("SIGHTLINE_COUNTER_TIMEOUT_MS") {
            config.counter_timeout = Duration::from_millis(
                ms.parse()
                    .context("SIGHTLINE_COUNTER_TIMEOUT_MS is not a number")?,
            );
        }
        if let Ok(v) = std::env::var("SIGHTLINE_FLUSH_BEFORE_SAMPLE") {
            config.flush_before_sample = v == "1";
        }
        if let Ok(v) = std::env::var("SIGHTLINE_COLLAPSE_POLLING") {
            config.collapse_polling = v != "0";
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            anyhow::bail!("Queue capacity must be greater than 0");
        }

        if !self.counters.is_empty() && self.counter_timeout.is_zero() {
            anyhow::bail!("Counter timeout must be greater than 0 when counters are enabled");
        }

        if let Some(device) = &self.device {
            if device.wavefront_size == 0 || device.max_waves_per_cu == 0 {
                anyhow::bail!("Device limits must have nonzero wavefront size and wave slots");
            }
        }

        Ok(())
    }
}
