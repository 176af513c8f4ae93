//! Service layer: mixes entropy, runs generators, stores audits and analyses
//! stored payloads, persisting artifacts and records through the store traits.
//!
//! Artifact layout:
//!
//! | path | content |
//! |---|---|
//! | `entropy/sim_raw/{simulation_id}.bin` | noise signal, `f32` LE |
//! | `chaos/{simulation_id}.bin` | trajectory, `f32` LE |
//! | `runs/{run_id}/sequence.bin` | raw generated bytes |
//! | `audit/{audit_id}.bin` | uploaded bytes |
//!
//! Store failures are logged and surfaced as
//! [`ServiceError::DataUnavailable`] with a generic message.

use std::path::Path;
use std::sync::Arc;

use randomtrust_tests::{TestOutcome, bytes_to_bits, run_selected_tests};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::conditioning;
use crate::error::{InvalidInput, RngError, ServiceError, StoreError};
use crate::mixer::{EntropyMetrics, EntropyMixer};
use crate::noise::NoiseOverrides;
use crate::records::{AuditRecord, RunRecord, SimulationRecord, TestReportRecord};
use crate::rng::{OutputFormat, RngOutput, StreamRng};
use crate::store::{
    ArtifactStore, CounterStore, FileCounterStore, FsArtifactStore, FsRecordStore,
    MemoryArtifactStore, MemoryCounterStore, MemoryRecordStore, RecordStore,
};

/// Largest number of bytes one generation request may ask for.
pub const MAX_SEQUENCE_LENGTH: usize = 1_000_000;
/// Audit label length bounds in characters, after trimming.
pub const MIN_AUDIT_NAME_CHARS: usize = 3;
pub const MAX_AUDIT_NAME_CHARS: usize = 255;
pub const MAX_AUDIT_DESCRIPTION_CHARS: usize = 1_024;

fn unavailable(context: &str, err: StoreError) -> ServiceError {
    log::warn!("{context}: {err}");
    ServiceError::DataUnavailable(context.to_string())
}

fn rng_failure(err: RngError) -> ServiceError {
    match err {
        RngError::Store(e) => unavailable("counter store unavailable", e),
        other => ServiceError::Rng(other),
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// The three persistence collaborators shared by all services.
#[derive(Clone)]
pub struct Backends {
    pub counters: Arc<dyn CounterStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub records: Arc<dyn RecordStore>,
}

impl Backends {
    pub fn in_memory(settings: &Settings) -> Self {
        Self {
            counters: Arc::new(MemoryCounterStore::new(settings.keyspace())),
            artifacts: Arc::new(MemoryArtifactStore::new()),
            records: Arc::new(MemoryRecordStore::new()),
        }
    }

    /// File-backed stores below `settings.data_dir`.
    pub fn on_disk(settings: &Settings) -> Self {
        let root: &Path = &settings.data_dir;
        Self {
            counters: Arc::new(FileCounterStore::new(
                settings.counters_dir(),
                settings.keyspace(),
            )),
            artifacts: Arc::new(FsArtifactStore::new(root.join("artifacts"))),
            records: Arc::new(FsRecordStore::new(root)),
        }
    }
}

// ---------------------------------------------------------------------------
// Entropy
// ---------------------------------------------------------------------------

/// Result of a persisted mix.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEntropy {
    pub simulation_id: Uuid,
    #[serde(skip)]
    pub seed: [u8; 32],
    pub metrics: EntropyMetrics,
    pub record: SimulationRecord,
}

impl StoredEntropy {
    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }
}

#[derive(Clone)]
pub struct EntropyService {
    mixer: EntropyMixer,
    backends: Backends,
}

impl EntropyService {
    pub fn new(mixer: EntropyMixer, backends: Backends) -> Self {
        Self { mixer, backends }
    }

    pub fn mixer(&self) -> &EntropyMixer {
        &self.mixer
    }

    /// Mix, upload the noise and chaos artifacts, and persist a [`SimulationRecord`].
    pub fn create_entropy(
        &self,
        noise_seed: Option<u64>,
        overrides: Option<&NoiseOverrides>,
    ) -> Result<StoredEntropy, ServiceError> {
        if let Some(o) = overrides {
            o.validate()?;
            self.mixer.noise_config().with_overrides(o).validate()?;
        }
        let result = self.mixer.mix(noise_seed, overrides)?;
        let simulation_id = Uuid::new_v4();

        let artifacts = &self.backends.artifacts;
        let noise_raw_path = artifacts
            .put(
                &format!("entropy/sim_raw/{simulation_id}.bin"),
                &conditioning::signal_bytes(&result.noise_sample.signal),
            )
            .map_err(|e| unavailable("failed to store noise artifact", e))?;
        let chaos_raw_path = artifacts
            .put(
                &format!("chaos/{simulation_id}.bin"),
                &conditioning::trajectory_bytes(&result.chaos_trajectory),
            )
            .map_err(|e| unavailable("failed to store chaos artifact", e))?;

        let record = SimulationRecord {
            simulation_id,
            noise_seed,
            noise_config: result.noise_config,
            chaos_config: result.chaos_config,
            metrics: result.metrics,
            seed_hex: hex::encode(result.seed),
            pool_hash_hex: hex::encode(result.pool_hash),
            chaos_checksum: result.chaos_checksum.clone(),
            noise_raw_path,
            chaos_raw_path,
        };
        self.backends
            .records
            .add_simulation(record.clone())
            .map_err(|e| unavailable("failed to persist simulation", e))?;
        log::info!("simulation {simulation_id} stored");

        Ok(StoredEntropy {
            simulation_id,
            seed: result.seed,
            metrics: result.metrics,
            record,
        })
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSequence {
    pub run_id: Uuid,
    pub simulation_id: Uuid,
    pub format: OutputFormat,
    pub data: RngOutput,
    pub metrics: EntropyMetrics,
}

/// ASCII bit export of a stored run.
#[derive(Debug, Clone, Serialize)]
pub struct RunBitsExport {
    pub run_id: Uuid,
    pub bits_count: usize,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub filename: String,
}

#[derive(Clone)]
pub struct RngService {
    entropy: EntropyService,
    backends: Backends,
    default_min_bits: usize,
}

impl RngService {
    pub fn new(entropy: EntropyService, backends: Backends, default_min_bits: usize) -> Self {
        Self {
            entropy,
            backends,
            default_min_bits,
        }
    }

    /// Fresh entropy, a new run id, `length` generator bytes persisted at
    /// `runs/{run_id}/sequence.bin`, and a [`RunRecord`].
    pub fn generate(
        &self,
        length: usize,
        format: OutputFormat,
        noise_seed: Option<u64>,
        overrides: Option<&NoiseOverrides>,
    ) -> Result<GeneratedSequence, ServiceError> {
        if !(1..=MAX_SEQUENCE_LENGTH).contains(&length) {
            return Err(InvalidInput::new(
                "length",
                format!("must be within [1, {MAX_SEQUENCE_LENGTH}]"),
            )
            .into());
        }

        let stored = self.entropy.create_entropy(noise_seed, overrides)?;
        let run_id = Uuid::new_v4();
        let counters = self.backends.counters.as_ref();
        let rng = StreamRng::instantiate(run_id, &stored.seed, counters)
            .map_err(|e| unavailable("counter store unavailable", e))?;
        let payload = rng.read(length, counters).map_err(rng_failure)?;

        let export_path = self
            .backends
            .artifacts
            .put(&format!("runs/{run_id}/sequence.bin"), &payload)
            .map_err(|e| unavailable("failed to store sequence", e))?;

        let record = RunRecord {
            run_id,
            simulation_id: stored.simulation_id,
            format,
            length,
            entropy_metrics: stored.metrics,
            seed_hash: conditioning::blake2s_hex(&stored.seed),
            export_path: Some(export_path),
            run_checksum: conditioning::blake2s_hex(&payload),
        };
        self.backends
            .records
            .add_run(record)
            .map_err(|e| unavailable("failed to persist run", e))?;
        log::info!("run {run_id}: {length} bytes ({format})");

        Ok(GeneratedSequence {
            run_id,
            simulation_id: stored.simulation_id,
            format,
            data: RngOutput::render(payload, format),
            metrics: stored.metrics,
        })
    }

    /// `'0'`/`'1'` text of a stored run, refusing exports shorter than
    /// `min_bits` (default from settings).
    pub fn export_bits(
        &self,
        run_id: Uuid,
        min_bits: Option<usize>,
    ) -> Result<RunBitsExport, ServiceError> {
        let required = min_bits.unwrap_or(self.default_min_bits);
        let run = self
            .backends
            .records
            .get_run(run_id)
            .map_err(|e| unavailable("record store unavailable", e))?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "run",
                id: run_id.to_string(),
            })?;
        let path = run.export_path.ok_or_else(|| {
            ServiceError::DataUnavailable("run has no persisted sequence to export".into())
        })?;
        let payload = self
            .backends
            .artifacts
            .get(&path)
            .map_err(|e| unavailable("failed to fetch stored sequence", e))?;

        let text = conditioning::bits_text(&payload);
        let bits_count = text.len();
        if bits_count < required {
            return Err(ServiceError::InsufficientBits {
                available: bits_count,
                required,
            });
        }

        Ok(RunBitsExport {
            run_id,
            bits_count,
            content: text.into_bytes(),
            filename: format!("{run_id}_bits.txt"),
        })
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuditService {
    backends: Backends,
}

impl AuditService {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    /// Store an externally produced sequence for later analysis.
    pub fn store_sequence(
        &self,
        name: &str,
        description: Option<&str>,
        hex_payload: &str,
    ) -> Result<AuditRecord, ServiceError> {
        let name = name.trim();
        if !(MIN_AUDIT_NAME_CHARS..=MAX_AUDIT_NAME_CHARS).contains(&name.chars().count()) {
            return Err(InvalidInput::new(
                "name",
                format!("must be {MIN_AUDIT_NAME_CHARS} to {MAX_AUDIT_NAME_CHARS} characters"),
            )
            .into());
        }
        if description.is_some_and(|d| d.chars().count() > MAX_AUDIT_DESCRIPTION_CHARS) {
            return Err(InvalidInput::new(
                "description",
                format!("must be at most {MAX_AUDIT_DESCRIPTION_CHARS} characters"),
            )
            .into());
        }
        let payload = decode_hex(hex_payload)?;
        let audit_id = Uuid::new_v4();

        let result_path = self
            .backends
            .artifacts
            .put(&format!("audit/{audit_id}.bin"), &payload)
            .map_err(|e| unavailable("failed to store audit payload", e))?;

        let record = AuditRecord {
            audit_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            data_hash: conditioning::blake2s_hex(&payload),
            result_path,
        };
        self.backends
            .records
            .add_audit(record.clone())
            .map_err(|e| unavailable("failed to persist audit", e))?;
        log::info!("audit {audit_id}: {} bytes", payload.len());
        Ok(record)
    }
}

/// Decode hex, tolerating surrounding whitespace.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, InvalidInput> {
    hex::decode(input.trim()).map_err(|e| InvalidInput::new("hex", e.to_string()))
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunAnalysis {
    pub run_id: Uuid,
    pub export_path: String,
    pub outcomes: Vec<TestOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditAnalysis {
    pub audit_id: Uuid,
    pub data_hash: String,
    pub outcomes: Vec<TestOutcome>,
}

#[derive(Clone)]
pub struct AnalysisService {
    backends: Backends,
}

impl AnalysisService {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    /// Run the battery over a stored run and replace its stored reports.
    pub fn analyze_run(
        &self,
        run_id: Uuid,
        tests: Option<&[String]>,
    ) -> Result<RunAnalysis, ServiceError> {
        let records = &self.backends.records;
        let run = records
            .get_run(run_id)
            .map_err(|e| unavailable("record store unavailable", e))?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "run",
                id: run_id.to_string(),
            })?;
        let export_path = run
            .export_path
            .ok_or_else(|| ServiceError::DataUnavailable("run has no persisted payload".into()))?;
        let payload = self
            .backends
            .artifacts
            .get(&export_path)
            .map_err(|e| unavailable("failed to fetch stored payload", e))?;

        let outcomes = analyze_bytes(&payload, tests)?;
        let reports = outcomes
            .iter()
            .map(|o| TestReportRecord::from_outcome(run_id, o))
            .collect();
        records
            .replace_test_reports(run_id, reports)
            .map_err(|e| unavailable("failed to persist test reports", e))?;
        log::info!(
            "run {run_id}: {}/{} tests passed",
            outcomes.iter().filter(|o| o.passed).count(),
            outcomes.len()
        );

        Ok(RunAnalysis {
            run_id,
            export_path,
            outcomes,
        })
    }

    pub fn analyze_audit(
        &self,
        audit_id: Uuid,
        tests: Option<&[String]>,
    ) -> Result<AuditAnalysis, ServiceError> {
        let audit = self
            .backends
            .records
            .get_audit(audit_id)
            .map_err(|e| unavailable("record store unavailable", e))?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "audit upload",
                id: audit_id.to_string(),
            })?;
        let payload = self
            .backends
            .artifacts
            .get(&audit.result_path)
            .map_err(|e| unavailable("failed to fetch audit payload", e))?;
        let outcomes = analyze_bytes(&payload, tests)?;
        Ok(AuditAnalysis {
            audit_id,
            data_hash: audit.data_hash,
            outcomes,
        })
    }
}

/// Unpack `payload` MSB-first and run the selected tests.
pub fn analyze_bytes(
    payload: &[u8],
    tests: Option<&[String]>,
) -> Result<Vec<TestOutcome>, ServiceError> {
    let bits = bytes_to_bits(payload);
    Ok(run_selected_tests(&bits, tests)?)
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// All services over one set of backends.
#[derive(Clone)]
pub struct Services {
    pub entropy: EntropyService,
    pub rng: RngService,
    pub audit: AuditService,
    pub analysis: AnalysisService,
}

impl Services {
    pub fn new(settings: &Settings, backends: Backends) -> Self {
        let mixer = EntropyMixer::new(settings.noise, settings.chaos);
        let entropy = EntropyService::new(mixer, backends.clone());
        Self {
            rng: RngService::new(
                entropy.clone(),
                backends.clone(),
                settings.default_min_export_bits,
            ),
            entropy,
            audit: AuditService::new(backends.clone()),
            analysis: AnalysisService::new(backends),
        }
    }
}
