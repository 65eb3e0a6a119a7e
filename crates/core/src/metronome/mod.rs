//! Self-sustaining metronome built on the look-ahead scheduler.
//!
//! A background thread runs a [`ScheduleState::pass`] every poll interval.
//! Between passes it waits on a control channel, so `stop` cancels the
//! pending pass immediately instead of waiting for the timer to fire.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::{
    AudioClock, AudioCoreError, ClockHandle, Result, ScheduleState, SchedulerConfig, SharedTempo,
    Tempo,
};

/// Beat scheduler façade driven by a UI collaborator.
pub struct Metronome<C: AudioClock + 'static> {
    config: SchedulerConfig,
    clock: ClockHandle<C>,
    tempo: SharedTempo,
    driver: Option<Driver>,
}

struct Driver {
    stop_tx: Sender<()>,
    thread: JoinHandle<ScheduleState>,
}

impl<C: AudioClock + 'static> Metronome<C> {
    pub fn new(config: SchedulerConfig, clock: ClockHandle<C>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            tempo: SharedTempo::default(),
            driver: None,
        })
    }

    /// Starts ticking at `bpm`.
    ///
    /// The clock is created on the first call and reused afterwards. Calling
    /// `start` while already running restarts the loop: the old one is
    /// stopped first, so there is never more than one.
    pub fn start(&mut self, bpm: f64) -> Result<()> {
        let tempo = Tempo::new(bpm)?;

        if self.is_running() {
            tracing::info!(bpm, "metronome already running, restarting");
            self.stop();
        }

        let clock = self.clock.acquire()?;
        self.tempo.set(tempo);

        let state = ScheduleState::begin(clock.current_time(), &self.config);
        tracing::info!(
            bpm,
            first_tick = state.next_tick_time,
            "starting metronome"
        );

        let (stop_tx, stop_rx) = bounded(1);
        let shared_tempo = self.tempo.clone();
        let thread = thread::Builder::new()
            .name("beat-scheduler".into())
            .spawn(move || run_loop(state, clock, shared_tempo, stop_rx))
            .map_err(|err| {
                AudioCoreError::audio_unavailable(format!("cannot spawn scheduler thread: {err}"))
            })?;

        self.driver = Some(Driver { stop_tx, thread });
        Ok(())
    }

    /// Cancels the pending pass. Ticks already committed to the clock still
    /// sound; nothing new is committed once this returns. No-op when stopped.
    pub fn stop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        // A full channel or a finished loop both mean the loop is ending.
        let _ = driver.stop_tx.try_send(());
        match driver.thread.join() {
            Ok(state) => tracing::info!(
                ticks = state.ticks_committed(),
                "metronome stopped"
            ),
            Err(_) => tracing::warn!("scheduler thread panicked"),
        }
    }

    /// Updates the tempo read by the running loop. Ticks already committed
    /// keep their time.
    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        let tempo = Tempo::new(bpm)?;
        self.tempo.set(tempo);
        tracing::debug!(bpm, "tempo updated");
        Ok(())
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo.get()
    }

    /// True while the scheduling loop is alive. A loop that ended on its own
    /// (for example because the clock was closed) reports false.
    pub fn is_running(&self) -> bool {
        self.driver
            .as_ref()
            .map(|driver| !driver.thread.is_finished())
            .unwrap_or(false)
    }

    /// The clock, once it has been created.
    pub fn clock(&self) -> Option<&Arc<C>> {
        self.clock.get()
    }

    /// Stops the loop and closes the clock. The metronome cannot be started
    /// again afterwards.
    pub fn dispose(&mut self) {
        self.stop();
        self.clock.dispose();
    }
}

impl<C: AudioClock + 'static> Drop for Metronome<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: AudioClock + 'static> std::fmt::Debug for Metronome<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metronome")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("tempo", &self.tempo.get())
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_loop<C: AudioClock>(
    mut state: ScheduleState,
    clock: Arc<C>,
    tempo: SharedTempo,
    stop_rx: Receiver<()>,
) -> ScheduleState {
    loop {
        if let Err(err) = state.pass(clock.as_ref(), tempo.get()) {
            tracing::warn!(%err, "scheduling pass failed, stopping metronome");
            break;
        }

        match stop_rx.recv_timeout(state.poll_interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    state.halt();
    state
}
