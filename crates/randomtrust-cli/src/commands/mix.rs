use randomtrust_core::{NoiseOverrides, Services};
use serde::Serialize;

use super::{CommandError, print_json};

#[derive(Serialize)]
struct MixView<'a> {
    #[serde(flatten)]
    stored: &'a randomtrust_core::service::StoredEntropy,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed_hex: Option<String>,
}

pub fn run(
    services: &Services,
    noise_seed: Option<u64>,
    overrides: Option<&NoiseOverrides>,
    show_seed: bool,
) -> Result<(), CommandError> {
    let stored = services.entropy.create_entropy(noise_seed, overrides)?;
    log::info!(
        "simulation {} stored ({:.2} dB SNR)",
        stored.simulation_id,
        stored.metrics.snr_db
    );
    print_json(&MixView {
        seed_hex: show_seed.then(|| stored.seed_hex()),
        stored: &stored,
    })
}
