//! Real-time audio core for the metronome and freestyle recording features.
//!
//! Two independent components live here. The beat scheduler commits
//! metronome ticks to an [`AudioClock`] a short window ahead of time from an
//! imprecise timer loop, leaving sample-accurate playback to the clock. The
//! streaming encoder turns captured float PCM into a mono CBR MP3 on
//! dedicated worker threads and answers each request with a correlated
//! success or failure message.

pub mod capture;
pub mod click;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod metronome;
pub mod scheduler;
pub mod tempo;
pub mod worker;

pub use capture::{read_wav, write_wav, CapturedPcm};
pub use click::ClickVoice;
pub use clock::{AudioClock, ClockHandle, ClockState, ManualClock, RenderClock, Tick};
pub use config::{AppConfig, ClickConfig, EncoderConfig, SchedulerConfig};
pub use encoder::{
    quantize, quantize_block, FrameEncoder, LameFrameEncoder, Mp3Artifact, StreamingEncoder,
    MP3_MIME,
};
pub use error::{AudioCoreError, Result};
pub use metronome::Metronome;
pub use scheduler::ScheduleState;
pub use tempo::{SharedTempo, Tempo};
pub use worker::{EncodeMessage, EncodeReply, EncodeTicket, EncoderFactory, EncoderWorker, JobId};
