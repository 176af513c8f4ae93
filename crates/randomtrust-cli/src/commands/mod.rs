pub mod analyze;
pub mod audit;
pub mod export;
pub mod generate;
pub mod mix;

use std::path::Path;

use clap::Args;
use randomtrust_core::service::{MAX_SEQUENCE_LENGTH, decode_hex};
use randomtrust_core::{
    Backends, InvalidInput, NoiseOverrides, ServiceError, Services, Settings, StoreError,
};
use serde::Serialize;
use thiserror::Error;

/// Anything a command can fail with. Printed once by `main`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Invalid(#[from] InvalidInput),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("settings: {0}")]
    Settings(#[from] StoreError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load settings (file, then environment), validate them and open the
/// on-disk stores.
pub fn open_services(config: Option<&Path>) -> Result<(Settings, Services), CommandError> {
    let settings = match config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    }
    .apply_env();
    settings.validate()?;
    log::debug!(
        "environment {}, data dir {}",
        settings.environment,
        settings.data_dir.display()
    );
    let services = Services::new(&settings, Backends::on_disk(&settings));
    Ok((settings, services))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CommandError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// Noise parameter overrides shared by `mix` and `generate`.
#[derive(Debug, Clone, Default, Args)]
pub struct OverrideArgs {
    /// Capture length in milliseconds [50, 1000]
    #[arg(long)]
    pub duration_ms: Option<u32>,

    /// Mains hum amplitude [0, 1]
    #[arg(long)]
    pub hum_amplitude: Option<f64>,

    /// Band-limited noise amplitude [0, 1]
    #[arg(long)]
    pub noise_amplitude: Option<f64>,

    /// Fraction of samples carrying a spike [0, 0.2]
    #[arg(long)]
    pub spike_density: Option<f64>,

    /// Spike amplitude [0, 1]
    #[arg(long)]
    pub spike_amplitude: Option<f64>,

    /// Full override object as JSON; unknown keys are ignored. Flags win.
    #[arg(long)]
    pub overrides: Option<String>,
}

impl OverrideArgs {
    /// Merge JSON and flags into validated overrides, or `None` if nothing was given.
    pub fn resolve(&self) -> Result<Option<NoiseOverrides>, CommandError> {
        let mut merged = match &self.overrides {
            Some(json) => serde_json::from_str::<NoiseOverrides>(json)
                .map_err(|e| InvalidInput::new("overrides", e.to_string()))?,
            None => NoiseOverrides::default(),
        };
        merged.duration_ms = self.duration_ms.or(merged.duration_ms);
        merged.hum_amplitude = self.hum_amplitude.or(merged.hum_amplitude);
        merged.noise_amplitude = self.noise_amplitude.or(merged.noise_amplitude);
        merged.spike_density = self.spike_density.or(merged.spike_density);
        merged.spike_amplitude = self.spike_amplitude.or(merged.spike_amplitude);

        if merged.is_empty() {
            return Ok(None);
        }
        merged.validate()?;
        Ok(Some(merged))
    }
}

/// Generation length in `[1, 1_000_000]`.
pub fn parse_length(s: &str) -> Result<usize, String> {
    let n: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a positive integer"))?;
    if (1..=MAX_SEQUENCE_LENGTH).contains(&n) {
        Ok(n)
    } else {
        Err(format!("length must be within [1, {MAX_SEQUENCE_LENGTH}]"))
    }
}

/// Comma-separated test names; empty entries dropped. `None` runs everything.
pub fn parse_test_list(s: Option<&str>) -> Option<Vec<String>> {
    let names: Vec<String> = s?
        .split(',')
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() { None } else { Some(names) }
}

/// Bytes from exactly one of an inline hex string or a file holding hex.
pub fn read_hex_input(hex: Option<&str>, file: Option<&Path>) -> Result<Vec<u8>, CommandError> {
    match (hex, file) {
        (Some(h), None) => Ok(decode_hex(h)?),
        (None, Some(path)) => Ok(decode_hex(&std::fs::read_to_string(path)?)?),
        _ => Err(InvalidInput::new("input", "provide exactly one of --hex or --file").into()),
    }
}
