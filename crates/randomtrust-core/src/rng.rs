//! ChaCha20 stream generator with a persisted keystream position.
//!
//! The generator itself is immutable: key and nonce are fixed at
//! instantiation and the block counter lives in a [`CounterStore`]. Every
//! [`StreamRng::read`] starts at the stored block and then advances it by the
//! number of 64-byte blocks touched, so reads for one run draw from disjoint
//! keystream regions.
//!
//! The sequence is fetch, generate, then increment. If the increment fails
//! after bytes were produced, a retry regenerates the same region. Callers that
//! need stronger guarantees must treat a failed read as having consumed its
//! blocks.

use std::fmt;
use std::str::FromStr;

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::{ChaCha20, Key, Nonce};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conditioning;
use crate::error::{InvalidInput, RngError, StoreError};
use crate::store::{CounterStore, RunState};

/// ChaCha20 block size in bytes.
pub const BLOCK_SIZE: usize = 64;

/// Highest exclusive block index addressable by the 32-bit IETF counter.
const MAX_BLOCKS: u64 = u32::MAX as u64;

// ---------------------------------------------------------------------------
// Output format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Hex,
    Ints,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex => write!(f, "hex"),
            Self::Ints => write!(f, "ints"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hex" => Ok(Self::Hex),
            "ints" => Ok(Self::Ints),
            other => Err(InvalidInput::new(
                "format",
                format!("expected one of hex, ints (got {other:?})"),
            )),
        }
    }
}

/// Generator output rendered in an [`OutputFormat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RngOutput {
    /// Lowercase hex, two characters per byte.
    Hex(String),
    /// One integer in `0..=255` per byte.
    Ints(Vec<u8>),
}

impl RngOutput {
    pub fn render(bytes: Vec<u8>, format: OutputFormat) -> Self {
        match format {
            OutputFormat::Hex => Self::Hex(hex::encode(bytes)),
            OutputFormat::Ints => Self::Ints(bytes),
        }
    }

    /// Raw bytes behind the rendering.
    pub fn to_bytes(&self) -> Result<Vec<u8>, InvalidInput> {
        match self {
            Self::Hex(s) => hex::decode(s).map_err(|e| InvalidInput::new("hex", e.to_string())),
            Self::Ints(v) => Ok(v.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Keystream
// ---------------------------------------------------------------------------

/// `length` keystream bytes starting at block `initial + block`.
///
/// The 16-byte nonce is a 128-bit IV: bytes `0..4` are the little-endian
/// initial block counter and bytes `4..16` the IETF nonce. Starting at
/// block `b` is identical to starting at block 0 and discarding `b * 64` bytes.
pub fn keystream_at(
    key: &[u8; 32],
    nonce: &[u8; 16],
    block: u64,
    length: usize,
) -> Result<Vec<u8>, RngError> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let initial = u64::from(u32::from_le_bytes([nonce[0], nonce[1], nonce[2], nonce[3]]));
    let start = initial
        .checked_add(block)
        .ok_or(RngError::KeystreamExhausted)?;
    let end = start
        .checked_add(blocks_for(length))
        .ok_or(RngError::KeystreamExhausted)?;
    if end > MAX_BLOCKS {
        return Err(RngError::KeystreamExhausted);
    }

    let mut cipher = ChaCha20::new(Key::from_slice(key), Nonce::from_slice(&nonce[4..]));
    cipher
        .try_seek(start * BLOCK_SIZE as u64)
        .map_err(|_| RngError::KeystreamExhausted)?;
    let mut out = vec![0u8; length];
    cipher
        .try_apply_keystream(&mut out)
        .map_err(|_| RngError::KeystreamExhausted)?;
    Ok(out)
}

/// `ceil(length / 64)`.
pub fn blocks_for(length: usize) -> u64 {
    length.div_ceil(BLOCK_SIZE) as u64
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct StreamRng {
    run_id: Uuid,
    key: [u8; 32],
    nonce: [u8; 16],
}

impl fmt::Debug for StreamRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRng")
            .field("run_id", &self.run_id)
            .field("nonce", &hex::encode(self.nonce))
            .finish_non_exhaustive()
    }
}

impl StreamRng {
    /// Key the generator from `seed` and register the run with counter 0.
    ///
    /// The nonce is BLAKE2s-128 of `run_id bytes ‖ seed`, so one seed under
    /// two run ids never shares a keystream.
    pub fn instantiate(
        run_id: Uuid,
        seed: &[u8; 32],
        store: &dyn CounterStore,
    ) -> Result<Self, StoreError> {
        let nonce = derive_nonce(run_id, seed);
        let state = store.get_or_create(run_id, &hex::encode(seed), &hex::encode(nonce))?;
        log::debug!("rng {run_id}: registered at block {}", state.counter);
        Ok(Self {
            run_id,
            key: *seed,
            nonce,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn nonce(&self) -> &[u8; 16] {
        &self.nonce
    }

    /// Current persisted state of this run.
    pub fn state(&self, store: &dyn CounterStore) -> Result<RunState, RngError> {
        store
            .get(self.run_id)?
            .ok_or(RngError::UnknownRun(self.run_id))
    }

    /// Emit `length` bytes from the stored block and advance the counter by
    /// `ceil(length / 64)`. `length == 0` touches nothing.
    pub fn read(&self, length: usize, store: &dyn CounterStore) -> Result<Vec<u8>, RngError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let counter = self.state(store)?.counter;
        let bytes = keystream_at(&self.key, &self.nonce, counter, length)?;
        let blocks = blocks_for(length);
        let next = store.atomic_increment(self.run_id, blocks)?;
        log::debug!(
            "rng {}: {length} bytes from block {counter}, counter now {next}",
            self.run_id
        );
        Ok(bytes)
    }

    pub fn read_formatted(
        &self,
        length: usize,
        format: OutputFormat,
        store: &dyn CounterStore,
    ) -> Result<RngOutput, RngError> {
        Ok(RngOutput::render(self.read(length, store)?, format))
    }
}

pub fn derive_nonce(run_id: Uuid, seed: &[u8; 32]) -> [u8; 16] {
    conditioning::blake2s_128(&[run_id.as_bytes().as_slice(), seed.as_slice()])
}
