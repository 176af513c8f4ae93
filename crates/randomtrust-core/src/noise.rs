//! Synthetic electrical noise: mains hum + band-limited Gaussian noise + impulse spikes.
//!
//! The synthesizer is pure given a seed. With the same `(seed, config)` it
//! produces the same [`NoiseSample`] on every call; without a seed the PRNG is
//! keyed from the operating system.

use std::f64::consts::TAU;

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::InvalidInput;

const NORM_EPS: f64 = 1e-12;

/// Highest accepted sample rate in Hz.
pub const MAX_SAMPLE_RATE: u32 = 192_000;
/// Longest accepted capture in milliseconds.
pub const MAX_DURATION_MS: u32 = 1_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters of the noise synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Samples per second.
    pub sample_rate: u32,
    pub duration_ms: u32,
    /// Two mains-hum frequencies in Hz.
    pub hum_frequencies: (f64, f64),
    pub hum_amplitude: f64,
    /// Pass band `(low, high)` in Hz for the shaped noise.
    pub noise_bandwidth: (f64, f64),
    pub noise_amplitude: f64,
    /// Fraction of samples that carry a spike.
    pub spike_density: f64,
    pub spike_amplitude: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            duration_ms: 200,
            hum_frequencies: (50.0, 60.0),
            hum_amplitude: 0.35,
            noise_bandwidth: (40.0, 1_200.0),
            noise_amplitude: 0.45,
            spike_density: 0.01,
            spike_amplitude: 0.2,
        }
    }
}

impl NoiseConfig {
    /// `max(1, round(sample_rate * duration_ms / 1000))`.
    pub fn sample_count(&self) -> usize {
        let n = (f64::from(self.sample_rate) * f64::from(self.duration_ms) / 1000.0).round();
        (n as usize).max(1)
    }

    /// Field merge: every `Some` in `overrides` replaces the matching field.
    pub fn with_overrides(&self, overrides: &NoiseOverrides) -> NoiseConfig {
        NoiseConfig {
            sample_rate: overrides.sample_rate.unwrap_or(self.sample_rate),
            duration_ms: overrides.duration_ms.unwrap_or(self.duration_ms),
            hum_frequencies: overrides.hum_frequencies.unwrap_or(self.hum_frequencies),
            hum_amplitude: overrides.hum_amplitude.unwrap_or(self.hum_amplitude),
            noise_bandwidth: overrides.noise_bandwidth.unwrap_or(self.noise_bandwidth),
            noise_amplitude: overrides.noise_amplitude.unwrap_or(self.noise_amplitude),
            spike_density: overrides.spike_density.unwrap_or(self.spike_density),
            spike_amplitude: overrides.spike_amplitude.unwrap_or(self.spike_amplitude),
        }
    }

    /// Structural sanity checks: bounded rate and duration, finite
    /// parameters, an ordered pass band.
    pub fn validate(&self) -> Result<(), InvalidInput> {
        validate_sample_rate(self.sample_rate)?;
        if !(1..=MAX_DURATION_MS).contains(&self.duration_ms) {
            return Err(InvalidInput::new(
                "duration_ms",
                format!("must be within [1, {MAX_DURATION_MS}]"),
            ));
        }
        let finite = [
            ("hum_frequencies", self.hum_frequencies.0),
            ("hum_frequencies", self.hum_frequencies.1),
            ("hum_amplitude", self.hum_amplitude),
            ("noise_bandwidth", self.noise_bandwidth.0),
            ("noise_bandwidth", self.noise_bandwidth.1),
            ("noise_amplitude", self.noise_amplitude),
            ("spike_density", self.spike_density),
            ("spike_amplitude", self.spike_amplitude),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(InvalidInput::new(field, "must be finite"));
            }
        }
        if !(0.0..=1.0).contains(&self.spike_density) {
            return Err(InvalidInput::new("spike_density", "must be within [0, 1]"));
        }
        validate_band(self.noise_bandwidth)
    }
}

fn validate_sample_rate(rate: u32) -> Result<(), InvalidInput> {
    if !(1..=MAX_SAMPLE_RATE).contains(&rate) {
        return Err(InvalidInput::new(
            "sample_rate",
            format!("must be within [1, {MAX_SAMPLE_RATE}]"),
        ));
    }
    Ok(())
}

fn validate_band((low, high): (f64, f64)) -> Result<(), InvalidInput> {
    if low >= high {
        return Err(InvalidInput::new("noise_bandwidth", "low edge must be below high edge"));
    }
    Ok(())
}

/// Partial [`NoiseConfig`] supplied by a caller.
///
/// Deserializes from a JSON object; unknown keys are ignored and `null`
/// values count as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseOverrides {
    pub sample_rate: Option<u32>,
    pub duration_ms: Option<u32>,
    pub hum_frequencies: Option<(f64, f64)>,
    pub hum_amplitude: Option<f64>,
    pub noise_bandwidth: Option<(f64, f64)>,
    pub noise_amplitude: Option<f64>,
    pub spike_density: Option<f64>,
    pub spike_amplitude: Option<f64>,
}

impl NoiseOverrides {
    pub fn is_empty(&self) -> bool {
        *self == NoiseOverrides::default()
    }

    /// Range checks applied to untrusted overrides at the request boundary.
    pub fn validate(&self) -> Result<(), InvalidInput> {
        if self.duration_ms.is_some_and(|d| !(50..=1000).contains(&d)) {
            return Err(InvalidInput::new("duration_ms", "must be within [50, 1000]"));
        }
        let unit = [
            ("hum_amplitude", self.hum_amplitude),
            ("noise_amplitude", self.noise_amplitude),
            ("spike_amplitude", self.spike_amplitude),
        ];
        for (field, value) in unit {
            if value.is_some_and(|v| !(0.0..=1.0).contains(&v)) {
                return Err(InvalidInput::new(field, "must be within [0, 1]"));
            }
        }
        if self.spike_density.is_some_and(|v| !(0.0..=0.2).contains(&v)) {
            return Err(InvalidInput::new("spike_density", "must be within [0, 0.2]"));
        }
        if let Some(rate) = self.sample_rate {
            validate_sample_rate(rate)?;
        }
        for (field, band) in [
            ("hum_frequencies", self.hum_frequencies),
            ("noise_bandwidth", self.noise_bandwidth),
        ] {
            let valid = |x: f64| x.is_finite() && x >= 0.0;
            if band.is_some_and(|(a, b)| !(valid(a) && valid(b))) {
                return Err(InvalidInput::new(field, "must be finite and non-negative"));
            }
        }
        match self.noise_bandwidth {
            Some(band) => validate_band(band),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// One synthesized noise capture. All four vectors share the same length and
/// `signal[i] == hum[i] + noise[i] + spike[i]` up to `f32` rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSample {
    pub signal: Vec<f32>,
    pub hum_component: Vec<f32>,
    pub noise_component: Vec<f32>,
    pub spike_component: Vec<f32>,
}

impl NoiseSample {
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Stateless noise generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseSynthesizer;

impl NoiseSynthesizer {
    pub fn generate(seed: Option<u64>, config: &NoiseConfig) -> NoiseSample {
        let mut rng = ChaCha20Rng::seed_from_u64(seed.unwrap_or_else(os_seed));
        let n = config.sample_count();
        let duration_s = f64::from(config.duration_ms) / 1000.0;
        let step = duration_s / n as f64;

        // Hum: one random phase per frequency.
        let mut hum = vec![0.0f64; n];
        for freq in [config.hum_frequencies.0, config.hum_frequencies.1] {
            let phase = rng.random_range(0.0..TAU);
            for (i, h) in hum.iter_mut().enumerate() {
                let t = i as f64 * step;
                *h += config.hum_amplitude * (TAU * freq * t + phase).sin();
            }
        }

        let white = standard_normals(&mut rng, n);
        let mut noise = band_limit(&white, f64::from(config.sample_rate), config.noise_bandwidth);
        let norm = noise.iter().map(|x| x * x).sum::<f64>().sqrt();
        let scale = config.noise_amplitude / (norm + NORM_EPS);
        noise.iter_mut().for_each(|x| *x *= scale);

        let mut spikes = vec![0.0f64; n];
        let spike_count = ((config.spike_density * n as f64).floor() as usize).min(n);
        if spike_count > 0 {
            let positions = index::sample(&mut rng, n, spike_count);
            for pos in positions.into_iter() {
                spikes[pos] = config.spike_amplitude * rng.random_range(-1.0..1.0);
            }
        }

        let mut signal: Vec<f64> = (0..n).map(|i| hum[i] + noise[i] + spikes[i]).collect();

        let peak = signal.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        if peak > 0.0 {
            for v in [&mut signal, &mut hum, &mut noise, &mut spikes] {
                v.iter_mut().for_each(|x| *x /= peak);
            }
        }

        log::debug!(
            "noise: {n} samples, {spike_count} spikes, peak {peak:.4}, seeded={}",
            seed.is_some()
        );

        NoiseSample {
            signal: to_f32(&signal),
            hum_component: to_f32(&hum),
            noise_component: to_f32(&noise),
            spike_component: to_f32(&spikes),
        }
    }
}

fn os_seed() -> u64 {
    let mut buf = [0u8; 8];
    match getrandom::fill(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(err) => {
            log::warn!("OS entropy unavailable ({err}); falling back to thread rng");
            rand::random()
        }
    }
}

/// Box-Muller standard normals.
fn standard_normals<R: Rng>(rng: &mut R, n: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n + 1);
    while out.len() < n {
        // u1 in (0, 1] so ln(u1) is finite.
        let u1 = 1.0 - rng.random::<f64>();
        let u2 = rng.random::<f64>();
        let r = (-2.0 * u1.ln()).sqrt();
        out.push(r * (TAU * u2).cos());
        out.push(r * (TAU * u2).sin());
    }
    out.truncate(n);
    out
}

/// Zero every FFT bin whose absolute frequency falls outside `[low, high]`.
fn band_limit(input: &[f64], sample_rate: f64, (low, high): (f64, f64)) -> Vec<f64> {
    let n = input.len();
    let mut planner = FftPlanner::<f64>::new();
    let mut buf: Vec<Complex<f64>> = input.iter().map(|&x| Complex::new(x, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buf);

    for (k, bin) in buf.iter_mut().enumerate() {
        let folded = if k <= n / 2 { k } else { n - k };
        let freq = folded as f64 * sample_rate / n as f64;
        if freq < low || freq > high {
            *bin = Complex::new(0.0, 0.0);
        }
    }

    planner.plan_fft_inverse(n).process(&mut buf);
    buf.iter().map(|c| c.re / n as f64).collect()
}

fn to_f32(values: &[f64]) -> Vec<f32> {
    values.iter().map(|&x| x as f32).collect()
}
