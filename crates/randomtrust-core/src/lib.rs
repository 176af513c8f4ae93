//! # randomtrust-core
//!
//! **Noise and chaos in, keyed keystream out.**
//!
//! `randomtrust-core` synthesizes an electrical-noise capture, lets it pick the
//! starting point of a Lorenz attractor, hashes both into an entropy pool and
//! derives a ChaCha20 key from it. The stream generator keeps its block
//! position in an external counter store so successive reads of one run never
//! reuse keystream.
//!
//! ## Quick Start
//!
//! ```no_run
//! use randomtrust_core::{EntropyMixer, MemoryCounterStore, StreamRng};
//! use uuid::Uuid;
//!
//! let mix = EntropyMixer::default().mix(Some(42), None).unwrap();
//! let store = MemoryCounterStore::default();
//! let rng = StreamRng::instantiate(Uuid::new_v4(), &mix.seed, &store).unwrap();
//! let bytes = rng.read(1024, &store).unwrap();
//! assert_eq!(bytes.len(), 1024);
//! ```
//!
//! ## Architecture
//!
//! NoiseSynthesizer → seed vector → ChaosSimulator
//! → SHA3-512 pool → HKDF-BLAKE2s seed → StreamRng → randomtrust-tests battery
//!
//! The [`service`] module wraps the pipeline with artifact, record and counter
//! persistence.

pub mod chaos;
pub mod conditioning;
pub mod config;
pub mod error;
pub mod mixer;
pub mod noise;
pub mod records;
pub mod rng;
pub mod service;
pub mod store;

pub use chaos::{ChaosSimulator, ChaosTrajectory, LorenzConfig};
pub use config::Settings;
pub use error::{InvalidInput, MixError, RngError, ServiceError, StoreError};
pub use mixer::{EntropyMetrics, EntropyMixResult, EntropyMixer};
pub use noise::{NoiseConfig, NoiseOverrides, NoiseSample, NoiseSynthesizer};
pub use records::{AuditRecord, ReportStatus, RunRecord, SimulationRecord, TestReportRecord};
pub use rng::{OutputFormat, RngOutput, StreamRng};
pub use service::{
    AnalysisService, AuditService, Backends, EntropyService, RngService, Services,
};
pub use store::{
    ArtifactStore, CounterKeyspace, CounterStore, FileCounterStore, FsArtifactStore,
    FsRecordStore, MemoryArtifactStore, MemoryCounterStore, MemoryRecordStore, RecordStore,
    RunState,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
