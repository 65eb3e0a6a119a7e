//! PCM to constant-bitrate MP3 encoding.
//!
//! Samples are quantized to 16-bit, cut into fixed-size blocks and fed to a
//! stateful [`FrameEncoder`] strictly in order. The encoder may hold data
//! back between blocks, so empty chunks are skipped and a final flush
//! collects whatever is still buffered.

use std::{fs, path::Path};

use bytes::Bytes;
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, MonoPcm, Quality};

use crate::{AudioCoreError, EncoderConfig, Result};

/// MIME type reported for encoded artifacts.
pub const MP3_MIME: &str = "audio/mp3";

/// Largest chunk LAME can emit from a flush.
const FLUSH_BUFFER_BYTES: usize = 7200;

/// Converts a normalized sample to signed 16-bit PCM.
///
/// Input is clamped to [-1.0, 1.0] first. Negative values scale by 32768 and
/// non-negative ones by 32767, so both ends of the range are reachable.
/// NaN maps to silence.
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

pub fn quantize_block(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(quantize).collect()
}

/// Stateful block encoder. Blocks must be submitted in order.
pub trait FrameEncoder {
    /// Encodes one block. May return an empty chunk while data is buffered.
    fn encode_block(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;

    /// Emits everything still buffered. Called once after the last block.
    fn flush(&mut self) -> Result<Vec<u8>>;

    /// Constant bitrate actually produced, when the encoder knows it.
    fn bitrate_kbps(&self) -> Option<u32> {
        None
    }
}

/// Mono CBR encoder backed by LAME.
pub struct LameFrameEncoder {
    inner: mp3lame_encoder::Encoder,
    bitrate_kbps: u32,
}

impl LameFrameEncoder {
    /// Builds an encoder for `sample_rate`. The requested bitrate is lowered
    /// to the highest rate the MPEG version for that sample rate allows, with
    /// a warning, since LAME would otherwise cap it silently.
    pub fn new(sample_rate: u32, bitrate_kbps: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(AudioCoreError::InvalidInput("sample rate must be positive"));
        }

        let effective = effective_bitrate_kbps(sample_rate, bitrate_kbps);
        if effective < bitrate_kbps {
            tracing::warn!(
                sample_rate,
                requested_kbps = bitrate_kbps,
                effective_kbps = effective,
                "bitrate capped by MPEG version for this sample rate"
            );
        }

        let mut builder = Builder::new()
            .ok_or_else(|| AudioCoreError::encode_failure("cannot allocate LAME encoder"))?;
        builder
            .set_num_channels(1)
            .map_err(|err| lame_error("set channel count", err))?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(|err| lame_error("set sample rate", err))?;
        builder
            .set_brate(cbr_bitrate(effective))
            .map_err(|err| lame_error("set bitrate", err))?;
        builder
            .set_quality(Quality::Best)
            .map_err(|err| lame_error("set quality", err))?;

        let inner = builder
            .build()
            .map_err(|err| lame_error("initialise encoder", err))?;
        Ok(Self {
            inner,
            bitrate_kbps: effective,
        })
    }
}

impl FrameEncoder for LameFrameEncoder {
    fn encode_block(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let mut chunk = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(pcm.len()));
        self.inner
            .encode_to_vec(MonoPcm(pcm), &mut chunk)
            .map_err(|err| lame_error("encode block", err))?;
        Ok(chunk)
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        let mut chunk = Vec::with_capacity(FLUSH_BUFFER_BYTES);
        self.inner
            .flush_to_vec::<FlushNoGap>(&mut chunk)
            .map_err(|err| lame_error("flush", err))?;
        Ok(chunk)
    }

    fn bitrate_kbps(&self) -> Option<u32> {
        Some(self.bitrate_kbps)
    }
}

impl std::fmt::Debug for LameFrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LameFrameEncoder")
            .field("bitrate_kbps", &self.bitrate_kbps)
            .finish()
    }
}

fn lame_error(stage: &str, err: impl std::fmt::Debug) -> AudioCoreError {
    AudioCoreError::encode_failure(format!("LAME failed to {stage}: {err:?}"))
}

/// CBR rates LAME can be asked for, ascending.
const CBR_KBPS: [u32; 16] = [
    8, 16, 24, 32, 40, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];

/// Ceiling imposed by the MPEG version LAME picks for `sample_rate`:
/// MPEG-2.5 below 12 kHz, MPEG-2 up to 24 kHz, MPEG-1 above.
fn max_cbr_kbps(sample_rate: u32) -> u32 {
    match sample_rate {
        0..=12_000 => 64,
        12_001..=24_000 => 160,
        _ => 320,
    }
}

/// Bitrate LAME will really produce for `requested` at `sample_rate`.
fn effective_bitrate_kbps(sample_rate: u32, requested: u32) -> u32 {
    let ceiling = requested.min(max_cbr_kbps(sample_rate));
    CBR_KBPS
        .iter()
        .rev()
        .copied()
        .find(|&rate| rate <= ceiling)
        .unwrap_or(CBR_KBPS[0])
}

/// Highest CBR rate LAME offers that does not exceed `kbps`.
fn cbr_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=15 => Bitrate::Kbps8,
        16..=23 => Bitrate::Kbps16,
        24..=31 => Bitrate::Kbps24,
        32..=39 => Bitrate::Kbps32,
        40..=47 => Bitrate::Kbps40,
        48..=63 => Bitrate::Kbps48,
        64..=79 => Bitrate::Kbps64,
        80..=95 => Bitrate::Kbps80,
        96..=111 => Bitrate::Kbps96,
        112..=127 => Bitrate::Kbps112,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=223 => Bitrate::Kbps192,
        224..=255 => Bitrate::Kbps224,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

/// Encoded audio returned to the capture collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp3Artifact {
    bytes: Bytes,
    sample_rate: u32,
    sample_count: usize,
    bitrate_kbps: Option<u32>,
}

impl Mp3Artifact {
    pub fn new(bytes: impl Into<Bytes>, sample_rate: u32, sample_count: usize) -> Self {
        Self {
            bytes: bytes.into(),
            sample_rate,
            sample_count,
            bitrate_kbps: None,
        }
    }

    pub fn with_bitrate_kbps(mut self, bitrate_kbps: Option<u32>) -> Self {
        self.bitrate_kbps = bitrate_kbps;
        self
    }

    pub fn mime(&self) -> &'static str {
        MP3_MIME
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Bitrate the frames were encoded at, if the encoder reported one.
    pub fn bitrate_kbps(&self) -> Option<u32> {
        self.bitrate_kbps
    }

    /// Length of the source audio.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count as f64 / f64::from(self.sample_rate)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Runs one encode job from float samples to a finished artifact.
#[derive(Debug, Clone, Default)]
pub struct StreamingEncoder {
    config: EncoderConfig,
}

impl StreamingEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encodes with LAME at the configured bitrate.
    pub fn encode(&self, samples: &[f32], sample_rate: u32) -> Result<Mp3Artifact> {
        let mut encoder = LameFrameEncoder::new(sample_rate, self.config.bitrate_kbps)?;
        self.encode_with(&mut encoder, samples, sample_rate)
    }

    /// Drives `encoder` over `samples`, one block at a time, then flushes.
    pub fn encode_with<E: FrameEncoder + ?Sized>(
        &self,
        encoder: &mut E,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Mp3Artifact> {
        if sample_rate == 0 {
            return Err(AudioCoreError::InvalidInput("sample rate must be positive"));
        }
        if self.config.block_size == 0 {
            return Err(AudioCoreError::InvalidInput(
                "encoder block size must be positive",
            ));
        }

        let pcm = quantize_block(samples);
        let mut output = Vec::new();

        for block in pcm.chunks(self.config.block_size) {
            let chunk = encoder.encode_block(block)?;
            if !chunk.is_empty() {
                output.extend_from_slice(&chunk);
            }
        }

        let tail = encoder.flush()?;
        if !tail.is_empty() {
            output.extend_from_slice(&tail);
        }

        Ok(Mp3Artifact::new(output, sample_rate, samples.len())
            .with_bitrate_kbps(encoder.bitrate_kbps()))
    }
}
