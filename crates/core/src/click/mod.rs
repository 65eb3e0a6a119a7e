use std::f32::consts::TAU;

use crate::ClickConfig;

/// Short decaying sine burst used as the metronome tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickVoice {
    frequency_hz: f32,
    duration_secs: f32,
    gain: f32,
    floor: f32,
}

impl ClickVoice {
    pub fn new(config: &ClickConfig) -> Self {
        Self {
            frequency_hz: config.frequency_hz,
            duration_secs: config.duration_secs,
            gain: config.gain,
            floor: config.floor.min(config.gain),
        }
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    /// Number of samples the pulse spans at `sample_rate`.
    pub fn len_at(&self, sample_rate: u32) -> usize {
        (self.duration_secs * sample_rate as f32).round() as usize
    }

    /// Amplitude envelope at `t` seconds into the pulse: an exponential ramp
    /// from `gain` down to `floor` over the pulse duration.
    pub fn envelope(&self, t: f32) -> f32 {
        let progress = (t / self.duration_secs).clamp(0.0, 1.0);
        self.gain * (self.floor / self.gain).powf(progress)
    }

    pub fn render(&self, sample_rate: u32) -> Vec<f32> {
        let len = self.len_at(sample_rate);
        let rate = sample_rate as f32;
        (0..len)
            .map(|i| {
                let t = i as f32 / rate;
                (TAU * self.frequency_hz * t).sin() * self.envelope(t)
            })
            .collect()
    }

    /// Adds the pulse into `buffer` starting at `offset`. Samples that would
    /// land past the end of the buffer are dropped.
    pub fn mix_into(&self, buffer: &mut [f32], offset: usize, sample_rate: u32) {
        if offset >= buffer.len() {
            return;
        }
        let pulse = self.render(sample_rate);
        for (out, sample) in buffer[offset..].iter_mut().zip(pulse) {
            *out += sample;
        }
    }
}

impl Default for ClickVoice {
    fn default() -> Self {
        Self::new(&ClickConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fifty_millisecond_pulse() {
        let voice = ClickVoice::default();
        let pulse = voice.render(48_000);
        assert_eq!(pulse.len(), 2_400);
        assert!(pulse.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn envelope_decays_to_floor() {
        let voice = ClickVoice::default();
        assert!((voice.envelope(0.0) - 1.0).abs() < 1e-6);
        assert!((voice.envelope(voice.duration_secs()) - 0.001).abs() < 1e-6);
        assert!(voice.envelope(0.01) > voice.envelope(0.02));
    }

    #[test]
    fn mix_truncates_at_buffer_end() {
        let voice = ClickVoice::default();
        let mut buffer = vec![0.0_f32; 1_000];
        voice.mix_into(&mut buffer, 990, 48_000);
        assert!(buffer[..990].iter().all(|s| *s == 0.0));
        assert!(buffer[991..].iter().any(|s| *s != 0.0));

        voice.mix_into(&mut buffer, 5_000, 48_000);
    }
}
