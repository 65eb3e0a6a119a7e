use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

use crate::{AudioCoreError, Result};

/// Beats-per-minute value. Always finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Tempo(f64);

impl Tempo {
    pub fn new(bpm: f64) -> Result<Self> {
        if bpm.is_finite() && bpm > 0.0 {
            Ok(Self(bpm))
        } else {
            Err(AudioCoreError::InvalidInput("tempo must be a positive BPM"))
        }
    }

    pub fn bpm(self) -> f64 {
        self.0
    }

    /// Seconds between consecutive beats.
    pub fn beat_interval_secs(self) -> f64 {
        60.0 / self.0
    }
}

impl TryFrom<f64> for Tempo {
    type Error = AudioCoreError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Tempo> for f64 {
    fn from(value: Tempo) -> Self {
        value.0
    }
}

/// Tempo cell shared between the control side and the scheduling loop.
///
/// The loop reads it on every pass instead of snapshotting it at start, so a
/// change lands on the next tick that has not been committed yet.
#[derive(Debug, Clone)]
pub struct SharedTempo {
    bits: Arc<AtomicU64>,
}

impl SharedTempo {
    pub fn new(tempo: Tempo) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(tempo.bpm().to_bits())),
        }
    }

    pub fn get(&self) -> Tempo {
        Tempo(f64::from_bits(self.bits.load(Ordering::Acquire)))
    }

    pub fn set(&self, tempo: Tempo) {
        self.bits.store(tempo.bpm().to_bits(), Ordering::Release);
    }
}

impl Default for SharedTempo {
    fn default() -> Self {
        Self::new(Tempo(120.0))
    }
}
