//! Lorenz attractor integrated with forward Euler.

use serde::{Deserialize, Serialize};

use crate::error::InvalidInput;

/// Components with `|x|` at or below this are treated as zero when seeding.
const ZERO_TOLERANCE: f64 = 1e-8;
/// Replacement for zero seed components; a zero state collapses the dynamics.
const ZERO_REPLACEMENT: f64 = 1e-6;

/// Lorenz system parameters and integration settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LorenzConfig {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
    /// Euler step size.
    pub dt: f64,
    pub steps: usize,
}

impl Default for LorenzConfig {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
            dt: 1e-3,
            steps: 10_000,
        }
    }
}

impl LorenzConfig {
    pub fn validate(&self) -> Result<(), InvalidInput> {
        for (field, value) in [
            ("sigma", self.sigma),
            ("rho", self.rho),
            ("beta", self.beta),
            ("dt", self.dt),
        ] {
            if !value.is_finite() {
                return Err(InvalidInput::new(field, "must be finite"));
            }
        }
        if self.dt <= 0.0 {
            return Err(InvalidInput::new("dt", "must be positive"));
        }
        if self.steps == 0 {
            return Err(InvalidInput::new("steps", "must be at least 1"));
        }
        Ok(())
    }
}

/// Sequence of `[x, y, z]` states; `trajectory[i]` is the state after step `i`.
pub type ChaosTrajectory = Vec<[f64; 3]>;

/// Stateless Lorenz integrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaosSimulator;

impl ChaosSimulator {
    /// Integrate `config.steps` Euler steps from a state derived from `seed_vector`.
    pub fn run(seed_vector: Option<&[f64]>, config: &LorenzConfig) -> ChaosTrajectory {
        let mut state = initial_state(seed_vector);
        let mut trajectory = Vec::with_capacity(config.steps);

        for _ in 0..config.steps {
            let [x, y, z] = state;
            let dx = config.sigma * (y - x);
            let dy = x * (config.rho - z) - y;
            let dz = x * y - config.beta * z;
            state = [x + config.dt * dx, y + config.dt * dy, z + config.dt * dz];
            trajectory.push(state);
        }

        trajectory
    }
}

/// Default `(1, 1, 1)`; shorter vectors are wrap-padded, longer ones truncated.
pub fn initial_state(seed_vector: Option<&[f64]>) -> [f64; 3] {
    let seed = match seed_vector {
        Some(v) if !v.is_empty() => v,
        _ => &[1.0, 1.0, 1.0][..],
    };
    std::array::from_fn(|i| {
        let x = seed[i % seed.len()];
        if x.abs() <= ZERO_TOLERANCE {
            ZERO_REPLACEMENT
        } else {
            x
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_length_and_finite() {
        let cfg = LorenzConfig::default();
        let traj = ChaosSimulator::run(Some(&[0.1, -0.2, 0.3][..]), &cfg);
        assert_eq!(traj.len(), cfg.steps);
        assert!(traj.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_first_step_is_euler() {
        let cfg = LorenzConfig {
            steps: 1,
            ..LorenzConfig::default()
        };
        let traj = ChaosSimulator::run(None, &cfg);
        // From (1,1,1): dx = 0, dy = 26, dz = 1 - 8/3.
        let expected = [1.0, 1.0 + 0.026, 1.0 + 1e-3 * (1.0 - 8.0 / 3.0)];
        for (a, b) in traj[0].iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_initial_state_wraps_and_truncates() {
        assert_eq!(initial_state(Some(&[2.0][..])), [2.0, 2.0, 2.0]);
        assert_eq!(initial_state(Some(&[2.0, 3.0][..])), [2.0, 3.0, 2.0]);
        assert_eq!(initial_state(Some(&[1.0, 2.0, 3.0, 4.0][..])), [1.0, 2.0, 3.0]);
        assert_eq!(initial_state(None), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_initial_state_replaces_zeros() {
        assert_eq!(
            initial_state(Some(&[0.0, 5e-9, -3.0][..])),
            [ZERO_REPLACEMENT, ZERO_REPLACEMENT, -3.0]
        );
    }

    #[test]
    fn test_deterministic() {
        let cfg = LorenzConfig {
            steps: 500,
            ..LorenzConfig::default()
        };
        let a = ChaosSimulator::run(Some(&[0.5, 0.25, 0.125][..]), &cfg);
        let b = ChaosSimulator::run(Some(&[0.5, 0.25, 0.125][..]), &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(LorenzConfig::default().validate().is_ok());
        let bad = LorenzConfig {
            dt: 0.0,
            ..LorenzConfig::default()
        };
        assert_eq!(bad.validate().unwrap_err().field, "dt");
        let bad = LorenzConfig {
            steps: 0,
            ..LorenzConfig::default()
        };
        assert_eq!(bad.validate().unwrap_err().field, "steps");
        let bad = LorenzConfig {
            rho: f64::NAN,
            ..LorenzConfig::default()
        };
        assert_eq!(bad.validate().unwrap_err().field, "rho");
    }

    #[test]
    fn test_reference_trajectory() {
        let traj = ChaosSimulator::run(Some(&[0.5, 0.25, 0.125][..]), &LorenzConfig::default());
        assert_eq!(
            traj[9_999],
            [-6.008860312068168, -5.8939986771142605, 24.24709810276436]
        );
        assert_eq!(
            crate::conditioning::blake2s_hex(&crate::conditioning::trajectory_bytes(&traj)),
            "b37ca668b5abe044e8aa5608b4b425538b32041b7ea4579032339fe913968d45"
        );
    }
}
