//! Hybrid entropy mixer.
//!
//! Noise seeds the chaos: the first six signal samples pick the Lorenz
//! starting point, so both sources are bound to one noise seed. The quantised
//! signal and the `f32` trajectory are hashed into a SHA3-512 pool, and a
//! 32-byte generator seed is expanded from the pool with HKDF-BLAKE2s.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::chaos::{ChaosSimulator, ChaosTrajectory, LorenzConfig};
use crate::conditioning;
use crate::error::MixError;
use crate::noise::{NoiseConfig, NoiseOverrides, NoiseSample, NoiseSynthesizer};

const EPS: f64 = 1e-12;
const SEED_FLOOR: f64 = 1e-6;
const HKDF_INFO: &[u8] = b"RandomTrustEntropyMix";

/// Diagnostic metrics of one mix. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyMetrics {
    pub snr_db: f64,
    pub spectral_deviation_percent: f64,
    pub lyapunov_exponent: f64,
}

#[derive(Debug, Clone)]
pub struct EntropyMixResult {
    /// Generator key material.
    pub seed: [u8; 32],
    pub pool_hash: [u8; 64],
    /// Hex BLAKE2s-256 of the chaos bytes.
    pub chaos_checksum: String,
    pub noise_config: NoiseConfig,
    pub chaos_config: LorenzConfig,
    pub metrics: EntropyMetrics,
    pub noise_sample: NoiseSample,
    pub chaos_trajectory: ChaosTrajectory,
}

/// Combines [`NoiseSynthesizer`] and [`ChaosSimulator`] into a seed.
#[derive(Debug, Clone, Default)]
pub struct EntropyMixer {
    noise_config: NoiseConfig,
    chaos_config: LorenzConfig,
}

impl EntropyMixer {
    pub fn new(noise_config: NoiseConfig, chaos_config: LorenzConfig) -> Self {
        Self {
            noise_config,
            chaos_config,
        }
    }

    pub fn noise_config(&self) -> &NoiseConfig {
        &self.noise_config
    }

    pub fn chaos_config(&self) -> &LorenzConfig {
        &self.chaos_config
    }

    /// Run one mix. Identical `(noise_seed, overrides)` give identical
    /// `seed`, `pool_hash` and `chaos_checksum`.
    pub fn mix(
        &self,
        noise_seed: Option<u64>,
        overrides: Option<&NoiseOverrides>,
    ) -> Result<EntropyMixResult, MixError> {
        let noise_config = match overrides {
            Some(o) => self.noise_config.with_overrides(o),
            None => self.noise_config,
        };
        let noise_sample = NoiseSynthesizer::generate(noise_seed, &noise_config);

        let seed_vector = chaos_seed_vector(&noise_sample.signal);
        let chaos_trajectory = ChaosSimulator::run(Some(seed_vector.as_slice()), &self.chaos_config);

        let noise_bytes = conditioning::quantize_signal(&noise_sample.signal);
        let chaos_bytes = conditioning::trajectory_bytes(&chaos_trajectory);
        let pool_hash = conditioning::sha3_512(&[noise_bytes.as_slice(), chaos_bytes.as_slice()]);
        let chaos_checksum = conditioning::blake2s_hex(&chaos_bytes);

        let mut seed = [0u8; 32];
        conditioning::hkdf_blake2s(&pool_hash[..16], &pool_hash, HKDF_INFO, &mut seed)
            .map_err(|e| MixError::KeyDerivation(e.to_string()))?;

        let metrics = compute_metrics(&noise_sample, &chaos_trajectory, self.chaos_config.dt);

        log::debug!(
            "mix: {} noise bytes, {} chaos bytes, lyapunov {:.4}",
            noise_bytes.len(),
            chaos_bytes.len(),
            metrics.lyapunov_exponent
        );

        Ok(EntropyMixResult {
            seed,
            pool_hash,
            chaos_checksum,
            noise_config,
            chaos_config: self.chaos_config,
            metrics,
            noise_sample,
            chaos_trajectory,
        })
    }
}

/// Six wrap-padded samples folded into three by averaging `v[i]` with `v[i + 3]`.
fn chaos_seed_vector(signal: &[f32]) -> [f64; 3] {
    if signal.is_empty() {
        return [SEED_FLOOR; 3];
    }
    let six: [f64; 6] = std::array::from_fn(|i| f64::from(signal[i % signal.len()]));
    std::array::from_fn(|i| {
        let v = (six[i] + six[i + 3]) / 2.0;
        if v.abs() < SEED_FLOOR { SEED_FLOOR } else { v }
    })
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

fn compute_metrics(sample: &NoiseSample, trajectory: &[[f64; 3]], dt: f64) -> EntropyMetrics {
    EntropyMetrics {
        snr_db: snr_db(sample),
        spectral_deviation_percent: spectral_deviation_percent(&sample.signal),
        lyapunov_exponent: lyapunov_estimate(trajectory, dt),
    }
}

fn mean_square<I: Iterator<Item = f64>>(values: I, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    values.map(|x| x * x).sum::<f64>() / n as f64
}

/// Signal power against noise-plus-spike power, in dB.
pub fn snr_db(sample: &NoiseSample) -> f64 {
    let n = sample.len();
    let signal_power = mean_square(sample.signal.iter().map(|&x| f64::from(x)), n) + EPS;
    let noise_power = mean_square(
        sample
            .noise_component
            .iter()
            .zip(&sample.spike_component)
            .map(|(&a, &b)| f64::from(a) + f64::from(b)),
        n,
    ) + EPS;
    10.0 * (signal_power / noise_power).log10()
}

/// Mean absolute deviation of the one-sided magnitude spectrum from its
/// average, as a percentage of that average.
pub fn spectral_deviation_percent(signal: &[f32]) -> f64 {
    let n = signal.len();
    if n == 0 {
        return 0.0;
    }
    let mut buf: Vec<Complex<f64>> = signal
        .iter()
        .map(|&x| Complex::new(f64::from(x), 0.0))
        .collect();
    FftPlanner::<f64>::new().plan_fft_forward(n).process(&mut buf);

    let magnitudes: Vec<f64> = buf[..n / 2 + 1].iter().map(|c| c.norm()).collect();
    let avg = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64 + EPS;
    let deviation =
        magnitudes.iter().map(|m| (m - avg).abs() / avg).sum::<f64>() / magnitudes.len() as f64;
    deviation * 100.0
}

/// Mean log step length over `dt`, clamped at zero. Zero for fewer than two states.
pub fn lyapunov_estimate(trajectory: &[[f64; 3]], dt: f64) -> f64 {
    if trajectory.len() < 2 {
        return 0.0;
    }
    let logs: f64 = trajectory
        .windows(2)
        .map(|w| {
            let d = ((w[1][0] - w[0][0]).powi(2)
                + (w[1][1] - w[0][1]).powi(2)
                + (w[1][2] - w[0][2]).powi(2))
            .sqrt();
            (d.max(EPS) / dt).ln()
        })
        .sum();
    (logs / (trajectory.len() - 1) as f64).max(0.0)
}
