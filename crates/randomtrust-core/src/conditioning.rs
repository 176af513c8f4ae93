//! Byte conditioning and digests.
//!
//! Every transformation between the floating-point entropy sources and bytes
//! lives here, together with the hash primitives applied to those bytes:
//!
//! ```text
//! NoiseSample.signal ─ quantize_signal ─┐
//!                                       ├─ SHA3-512 ─ pool_hash ─ HKDF-BLAKE2s ─ seed
//! ChaosTrajectory ─── trajectory_bytes ─┘
//!                          └─ BLAKE2s-256 ─ chaos_checksum
//! ```
//!
//! Float layouts are fixed: `f32`, little-endian IEEE-754.

use blake2::digest::consts::U16;
use blake2::{Blake2s, Blake2s256, Digest};
use hkdf::SimpleHkdf;
use sha3::Sha3_512;

// ---------------------------------------------------------------------------
// Float → byte packing
// ---------------------------------------------------------------------------

/// Map a signal in `[-1, 1]` onto `0..=255` via `clamp((s + 1) * 127.5)`.
///
/// Arithmetic stays in `f32` and the final cast truncates.
pub fn quantize_signal(signal: &[f32]) -> Vec<u8> {
    signal
        .iter()
        .map(|&s| ((s + 1.0) * 127.5).clamp(0.0, 255.0) as u8)
        .collect()
}

/// Raw `f32` little-endian bytes of a signal.
pub fn signal_bytes(signal: &[f32]) -> Vec<u8> {
    signal.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Trajectory states narrowed to `f32`, row-major `x, y, z`, little-endian.
pub fn trajectory_bytes(trajectory: &[[f64; 3]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(trajectory.len() * 12);
    for state in trajectory {
        for &v in state {
            out.extend_from_slice(&(v as f32).to_le_bytes());
        }
    }
    out
}

/// ASCII `'0'`/`'1'` rendering, 8 characters per byte, MSB first.
pub fn bits_text(payload: &[u8]) -> String {
    let mut out = String::with_capacity(payload.len() * 8);
    for byte in payload {
        out.push_str(&format!("{byte:08b}"));
    }
    out
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

pub fn sha3_512(parts: &[&[u8]]) -> [u8; 64] {
    let mut h = Sha3_512::new();
    for part in parts {
        h.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&h.finalize());
    out
}

pub fn blake2s_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake2s256::digest(data));
    out
}

/// Hex BLAKE2s-256, the checksum format used for artifacts and records.
pub fn blake2s_hex(data: &[u8]) -> String {
    hex::encode(blake2s_256(data))
}

/// BLAKE2s with a native 16-byte output (not a truncated 32-byte digest).
pub fn blake2s_128(parts: &[&[u8]]) -> [u8; 16] {
    let mut h = Blake2s::<U16>::new();
    for part in parts {
        h.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&h.finalize());
    out
}

/// HKDF-BLAKE2s-256 extract-and-expand into `out`.
pub fn hkdf_blake2s(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
    out: &mut [u8],
) -> Result<(), hkdf::InvalidLength> {
    SimpleHkdf::<Blake2s256>::new(Some(salt), ikm).expand(info, out)
}
