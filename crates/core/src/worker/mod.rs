//! Encoding off the caller's thread.
//!
//! ```text
//! [caller] --submit--> crossbeam::Sender<EncodeJob> --> [encoder thread(s)]
//!    ^                                                        |
//!    |                                                 StreamingEncoder
//!    |                                                        |
//!    +---- EncodeTicket <-- oneshot<EncodeMessage> <----------+
//! ```
//!
//! Each job carries its own reply channel and a [`JobId`], so any number of
//! encodes can be in flight without sharing a global result handler. Jobs
//! never unwind across the boundary: errors and panics alike come back as
//! [`EncodeReply::Failure`].

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::oneshot;

use crate::{
    AudioCoreError, EncoderConfig, FrameEncoder, LameFrameEncoder, Mp3Artifact, Result,
    StreamingEncoder,
};

/// Correlation id attached to every submitted job and its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encode-{}", self.0)
    }
}

/// Outcome of one job, as sent back across the worker boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeReply {
    Success { artifact: Mp3Artifact },
    Failure { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeMessage {
    pub job: JobId,
    pub reply: EncodeReply,
}

impl EncodeMessage {
    pub fn success(&self) -> bool {
        matches!(self.reply, EncodeReply::Success { .. })
    }

    pub fn into_result(self) -> Result<Mp3Artifact> {
        match self.reply {
            EncodeReply::Success { artifact } => Ok(artifact),
            EncodeReply::Failure { error } => Err(AudioCoreError::EncodeFailure(error)),
        }
    }
}

/// Builds the frame encoder for a job. Runs on the worker thread.
pub type EncoderFactory =
    Arc<dyn Fn(u32, &EncoderConfig) -> Result<Box<dyn FrameEncoder>> + Send + Sync>;

struct EncodeJob {
    id: JobId,
    samples: Vec<f32>,
    sample_rate: u32,
    reply_tx: oneshot::Sender<EncodeMessage>,
}

/// Pending result of a submitted job.
#[derive(Debug)]
pub struct EncodeTicket {
    id: JobId,
    reply_rx: oneshot::Receiver<EncodeMessage>,
}

impl EncodeTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Waits for the reply message. There is no built-in timeout; wrap this
    /// in `tokio::time::timeout` if one is needed.
    pub async fn message(self) -> EncodeMessage {
        let id = self.id;
        self.reply_rx.await.unwrap_or_else(|_| disconnected(id))
    }

    pub async fn outcome(self) -> Result<Mp3Artifact> {
        self.message().await.into_result()
    }

    /// Blocking variant of [`outcome`](Self::outcome). Must not be called
    /// from inside an async runtime.
    pub fn wait(self) -> Result<Mp3Artifact> {
        let id = self.id;
        self.reply_rx
            .blocking_recv()
            .unwrap_or_else(|_| disconnected(id))
            .into_result()
    }
}

fn disconnected(job: JobId) -> EncodeMessage {
    EncodeMessage {
        job,
        reply: EncodeReply::Failure {
            error: "encoder worker disconnected".to_string(),
        },
    }
}

/// Pool of dedicated encoder threads.
pub struct EncoderWorker {
    jobs: Option<Sender<EncodeJob>>,
    next_id: AtomicU64,
    threads: Vec<JoinHandle<()>>,
}

impl EncoderWorker {
    /// Spawns `config.workers` threads encoding with LAME.
    pub fn spawn(config: EncoderConfig) -> Result<Self> {
        Self::spawn_with_factory(config, Arc::new(lame_encoder))
    }

    pub fn spawn_with_factory(config: EncoderConfig, factory: EncoderFactory) -> Result<Self> {
        config.validate()?;
        let (jobs_tx, jobs_rx) = unbounded::<EncodeJob>();

        let mut threads = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let jobs_rx = jobs_rx.clone();
            let factory = factory.clone();
            let config = config.clone();
            let handle = thread::Builder::new()
                .name(format!("mp3-encoder-{index}"))
                .spawn(move || worker_loop(jobs_rx, config, factory))?;
            threads.push(handle);
        }

        tracing::debug!(workers = threads.len(), "encoder worker pool started");
        Ok(Self {
            jobs: Some(jobs_tx),
            next_id: AtomicU64::new(1),
            threads,
        })
    }

    /// Queues `samples` for encoding and returns immediately.
    pub fn submit(&self, samples: Vec<f32>, sample_rate: u32) -> EncodeTicket {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = EncodeJob {
            id,
            samples,
            sample_rate,
            reply_tx,
        };

        // If the pool is gone the job (and its reply sender) is dropped here,
        // which resolves the ticket as a disconnect failure.
        if let Some(jobs) = &self.jobs {
            if jobs.send(job).is_err() {
                tracing::warn!(%id, "encoder pool is not accepting jobs");
            }
        }

        EncodeTicket { id, reply_rx }
    }
}

impl Drop for EncoderWorker {
    fn drop(&mut self) {
        // Closing the queue lets every thread finish its current job and exit.
        self.jobs.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("encoder thread panicked");
            }
        }
    }
}

impl fmt::Debug for EncoderWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderWorker")
            .field("threads", &self.threads.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

fn lame_encoder(sample_rate: u32, config: &EncoderConfig) -> Result<Box<dyn FrameEncoder>> {
    let encoder = LameFrameEncoder::new(sample_rate, config.bitrate_kbps)?;
    Ok(Box::new(encoder))
}

fn worker_loop(jobs: Receiver<EncodeJob>, config: EncoderConfig, factory: EncoderFactory) {
    let encoder = StreamingEncoder::new(config.clone());

    for job in jobs.iter() {
        let started = Instant::now();
        let EncodeJob {
            id,
            samples,
            sample_rate,
            reply_tx,
        } = job;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut frames = factory(sample_rate, &config)?;
            encoder.encode_with(frames.as_mut(), &samples, sample_rate)
        }));

        let reply = match outcome {
            Ok(Ok(artifact)) => {
                tracing::info!(
                    %id,
                    bytes = artifact.len(),
                    audio_secs = artifact.duration_secs(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "encode finished"
                );
                EncodeReply::Success { artifact }
            }
            Ok(Err(err)) => {
                tracing::warn!(%id, %err, "encode failed");
                EncodeReply::Failure {
                    error: err.to_string(),
                }
            }
            Err(payload) => {
                let error = panic_message(payload.as_ref());
                tracing::warn!(%id, %error, "encoder panicked");
                EncodeReply::Failure {
                    error: format!("encoder panicked: {error}"),
                }
            }
        };

        // The caller may have dropped its ticket; nothing to deliver then.
        let _ = reply_tx.send(EncodeMessage { job: id, reply });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
