use std::path::Path;

use crate::{AudioCoreError, Result};

/// Mono, normalized samples handed from capture to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl CapturedPcm {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Loads a WAV file as mono float PCM. Multi-channel files are averaged
/// down to one channel.
pub fn read_wav(path: impl AsRef<Path>) -> Result<CapturedPcm> {
    let reader = hound::WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AudioCoreError::InvalidInput("wav file declares no channels"));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = int_full_scale(spec.bits_per_sample)?;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let channels = usize::from(spec.channels);
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    tracing::debug!(
        path = %path.as_ref().display(),
        sample_rate = spec.sample_rate,
        channels,
        frames = samples.len(),
        "loaded capture"
    );
    Ok(CapturedPcm::new(samples, spec.sample_rate))
}

/// Magnitude of the most negative value an integer sample of `bits` width
/// can hold; dividing by it normalizes to [-1.0, 1.0).
fn int_full_scale(bits: u16) -> Result<f32> {
    if bits == 0 || bits > 32 {
        return Err(AudioCoreError::InvalidInput(
            "wav integer samples must be 1 to 32 bits wide",
        ));
    }
    Ok((1_i64 << (bits - 1)) as f32)
}

/// Writes mono PCM as a 32-bit float WAV file.
pub fn write_wav(path: impl AsRef<Path>, pcm: &CapturedPcm) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for sample in &pcm.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_wav_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let pcm = CapturedPcm::new(vec![0.0, 0.25, -0.5, 1.0], 22_050);

        write_wav(&path, &pcm).unwrap();
        assert_eq!(read_wav(&path).unwrap(), pcm);
    }

    #[test]
    fn stereo_int_wav_is_mixed_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for (left, right) in [(16_384_i16, 0_i16), (-32_768, -32_768)] {
            writer.write_sample(left).unwrap();
            writer.write_sample(right).unwrap();
        }
        writer.finalize().unwrap();

        let pcm = read_wav(&path).unwrap();
        assert_eq!(pcm.sample_rate, 48_000);
        assert_eq!(pcm.samples, vec![0.25, -1.0]);
        assert!((pcm.duration_secs() - 2.0 / 48_000.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_impossible_bit_depths() {
        assert!(matches!(
            int_full_scale(0),
            Err(AudioCoreError::InvalidInput(_))
        ));
        assert!(int_full_scale(33).is_err());
        assert_eq!(int_full_scale(16).unwrap(), 32_768.0);
        assert_eq!(int_full_scale(24).unwrap(), 8_388_608.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_wav("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, AudioCoreError::Wav(_)));
    }
}
