use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{AudioCoreError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub click: ClickConfig,
    pub encoder: EncoderConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects settings the scheduler or encoder cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.click.validate()?;
        self.encoder.validate()
    }
}

/// Timing constants for the look-ahead scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Horizon ahead of the clock within which ticks are committed.
    pub lookahead_secs: f64,
    /// Wall-clock period between scheduling passes.
    pub poll_interval_ms: u64,
    /// Safety margin between `start` and the first tick.
    pub start_offset_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: 0.1,
            poll_interval_ms: 25,
            start_offset_secs: 0.05,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lookahead_secs.is_finite() && self.lookahead_secs > 0.0) {
            return Err(AudioCoreError::InvalidInput(
                "scheduler lookahead must be positive",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AudioCoreError::InvalidInput(
                "scheduler poll interval must be at least 1ms",
            ));
        }
        // A pass must come around before the committed window runs dry.
        if self.poll_interval().as_secs_f64() >= self.lookahead_secs {
            return Err(AudioCoreError::InvalidInput(
                "scheduler poll interval must be shorter than the lookahead window",
            ));
        }
        if !(self.start_offset_secs.is_finite() && self.start_offset_secs >= 0.0) {
            return Err(AudioCoreError::InvalidInput(
                "scheduler start offset must not be negative",
            ));
        }
        Ok(())
    }
}

/// Shape of the synthesized metronome pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    pub frequency_hz: f32,
    pub duration_secs: f32,
    pub gain: f32,
    /// Level the envelope decays to by the end of the pulse.
    pub floor: f32,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1000.0,
            duration_secs: 0.05,
            gain: 1.0,
            floor: 0.001,
        }
    }
}

impl ClickConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.frequency_hz > 0.0 && self.duration_secs > 0.0) {
            return Err(AudioCoreError::InvalidInput(
                "click frequency and duration must be positive",
            ));
        }
        if !(self.floor > 0.0 && self.gain > 0.0) {
            return Err(AudioCoreError::InvalidInput(
                "click gain and floor must be positive",
            ));
        }
        Ok(())
    }
}

/// Parameters for the MP3 encoder and its worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub bitrate_kbps: u32,
    /// Samples fed to the encoder per call; 1152 is one MPEG-1 layer III frame.
    pub block_size: usize,
    pub workers: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 128,
            block_size: 1152,
            workers: 1,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(AudioCoreError::InvalidInput(
                "encoder block size must be positive",
            ));
        }
        if self.workers == 0 {
            return Err(AudioCoreError::InvalidInput(
                "encoder needs at least one worker",
            ));
        }
        if self.bitrate_kbps < 8 {
            return Err(AudioCoreError::InvalidInput(
                "encoder bitrate must be at least 8kbps",
            ));
        }
        Ok(())
    }
}
