//! # siltop-core
//!
//! **Live Apple Silicon utilization and power, read from `powermetrics`.**
//!
//! `siltop-core` supervises a privileged `powermetrics` sampler, reads the
//! plist frames it appends to a file, and turns each one into display-ready
//! metrics scaled against the chip's rated ceilings.
//!
//! ## Quick Start
//!
//! ```no_run
//! use siltop_core::{Poll, RecordReader, SamplerConfig, Supervisor, detect_soc_info, normalize};
//!
//! let soc = detect_soc_info();
//! let mut supervisor = Supervisor::new(SamplerConfig::default());
//! let handle = supervisor.start(&siltop_core::timecode_now(), 1000, 10).unwrap();
//!
//! let mut reader = RecordReader::new(&handle.path);
//! if let Poll::Fresh(record) = reader.poll() {
//!     let snapshot = normalize(&record, &soc.capability);
//!     println!("CPU {:.1} W", snapshot.cpu.power.watts);
//! }
//! // Dropping the supervisor stops the sampler and deletes its output.
//! ```
//!
//! ## Architecture
//!
//! Supervisor → output file → RecordReader → normalize → MetricsSnapshot
//!
//! The sampler and the reader share nothing but the file. The reader only
//! ever returns a fully decoded frame: if the newest frame is still being
//! written it falls back one frame, and otherwise reports the cycle as
//! [`Unavailable`].

pub mod capability;
pub mod history;
pub mod memory;
pub mod normalize;
pub mod reader;
pub mod record;
pub mod soc;
pub mod store;
pub mod supervisor;

pub use capability::{CAPABILITY_TABLE, CapabilityEntry, DEFAULT_CAPABILITY, lookup, lookup_for_cores};
pub use history::PowerHistory;
pub use memory::MemoryMetrics;
pub use normalize::{
    ANE_MAX_POWER_W, BandwidthMetrics, ClusterKind, ClusterSummary, ClusterUsage, CoreUsage,
    CpuMetrics, GpuMetrics, MetricsSnapshot, PowerReading, normalize,
};
pub use reader::{
    FrameSource, Poll, RecordReader, Unavailable, latest_from_bytes, read_latest, read_tail,
};
pub use record::{DecodeError, RawTelemetryRecord, ThermalPressure, decode_frame};
pub use soc::{SocInfo, detect_soc_info};
pub use store::{RecordStore, StaleSweep, timecode_now};
pub use supervisor::{
    Elevation, LaunchSpec, Launcher, PowermetricsLauncher, SamplerConfig, SamplerError,
    SamplerHandle, Supervisor,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
