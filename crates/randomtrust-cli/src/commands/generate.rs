use randomtrust_core::{NoiseOverrides, OutputFormat, Services};

use super::{CommandError, print_json};

pub struct GenerateCommandConfig<'a> {
    pub length: usize,
    pub format: OutputFormat,
    pub noise_seed: Option<u64>,
    pub overrides: Option<&'a NoiseOverrides>,
}

pub fn run(services: &Services, cfg: GenerateCommandConfig<'_>) -> Result<(), CommandError> {
    let generated = services
        .rng
        .generate(cfg.length, cfg.format, cfg.noise_seed, cfg.overrides)?;
    log::info!(
        "run {} produced {} bytes from simulation {}",
        generated.run_id,
        cfg.length,
        generated.simulation_id
    );
    print_json(&generated)
}
