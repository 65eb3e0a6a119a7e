//! Audio clock capability.
//!
//! The scheduling loop only decides *which* ticks to commit; an
//! [`AudioClock`] decides *when* they sound. Implementations must place a
//! committed tick at exactly its timestamp on their own timeline, no matter
//! how late the scheduling pass that committed it ran.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::{AudioCoreError, ClickVoice, Result};

/// A metronome tick committed to the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Zero-based beat number since the last `start`.
    pub index: u64,
    /// Absolute audio-clock time in seconds.
    pub time: f64,
}

/// Lifecycle state of an audio clock resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Running,
    /// Time is frozen until [`AudioClock::resume`] succeeds.
    Suspended,
    /// Released for good; every further call fails.
    Closed,
}

/// Monotonic time source plus a schedule-at-time primitive.
pub trait AudioClock: Send + Sync {
    /// Current clock time in seconds. Never decreases.
    fn current_time(&self) -> f64;

    /// Commits a click to sound at `tick.time`.
    fn schedule_click(&self, tick: Tick) -> Result<()>;

    fn state(&self) -> ClockState;

    fn resume(&self) -> Result<()>;

    fn suspend(&self);

    fn close(&self);
}

type ClockFactory<C> = Box<dyn FnMut() -> Result<C> + Send>;

/// Owned handle to a lazily created audio clock.
///
/// The clock is created on the first [`acquire`](Self::acquire), reused by
/// every later call and resumed whenever it is found suspended. It is only
/// torn down by [`dispose`](Self::dispose), after which the handle refuses
/// to hand out a clock again.
pub struct ClockHandle<C> {
    factory: ClockFactory<C>,
    clock: Option<Arc<C>>,
    disposed: bool,
}

impl<C: AudioClock> ClockHandle<C> {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> Result<C> + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            clock: None,
            disposed: false,
        }
    }

    /// Returns the clock, creating it on first use and resuming it if it
    /// was suspended. Failures surface as [`AudioCoreError::AudioUnavailable`].
    pub fn acquire(&mut self) -> Result<Arc<C>> {
        if self.disposed {
            return Err(AudioCoreError::audio_unavailable(
                "audio clock has been disposed",
            ));
        }

        let reusable = self
            .clock
            .as_ref()
            .filter(|clock| clock.state() != ClockState::Closed)
            .cloned();

        let clock = match reusable {
            Some(clock) => clock,
            None => {
                let created = (self.factory)().map_err(into_unavailable)?;
                tracing::debug!("created audio clock");
                let created = Arc::new(created);
                self.clock = Some(created.clone());
                created
            }
        };

        if clock.state() == ClockState::Suspended {
            tracing::debug!("resuming suspended audio clock");
            clock.resume().map_err(into_unavailable)?;
        }

        Ok(clock)
    }

    /// The clock, if it has been created and not disposed.
    pub fn get(&self) -> Option<&Arc<C>> {
        self.clock.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Closes the clock and releases it. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.close();
            tracing::debug!("disposed audio clock");
        }
        self.disposed = true;
    }
}

impl<C> fmt::Debug for ClockHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockHandle")
            .field("created", &self.clock.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}

fn into_unavailable(err: AudioCoreError) -> AudioCoreError {
    match err {
        AudioCoreError::AudioUnavailable(_) => err,
        other => AudioCoreError::AudioUnavailable(other.to_string()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Clock state stays consistent across a panicking holder; every update
    // is a single assignment or push.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand-driven clock for tests. Time only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualInner>,
}

#[derive(Debug)]
struct ManualInner {
    now: f64,
    state: ClockState,
    ticks: Vec<Tick>,
    refuse_resume: bool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    pub fn starting_at(now: f64) -> Self {
        Self {
            inner: Mutex::new(ManualInner {
                now,
                state: ClockState::Running,
                ticks: Vec::new(),
                refuse_resume: false,
            }),
        }
    }

    /// A clock that starts suspended, like one created before any user gesture.
    pub fn suspended() -> Self {
        let clock = Self::new();
        lock(&clock.inner).state = ClockState::Suspended;
        clock
    }

    pub fn set_time(&self, now: f64) {
        let mut inner = lock(&self.inner);
        inner.now = inner.now.max(now);
    }

    pub fn advance(&self, delta: f64) {
        let mut inner = lock(&self.inner);
        inner.now += delta.max(0.0);
    }

    /// Makes every later `resume` fail.
    pub fn refuse_resume(&self, refuse: bool) {
        lock(&self.inner).refuse_resume = refuse;
    }

    /// Every tick committed so far, in commit order.
    pub fn ticks(&self) -> Vec<Tick> {
        lock(&self.inner).ticks.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for ManualClock {
    fn current_time(&self) -> f64 {
        lock(&self.inner).now
    }

    fn schedule_click(&self, tick: Tick) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.state == ClockState::Closed {
            return Err(AudioCoreError::audio_unavailable("clock is closed"));
        }
        inner.ticks.push(tick);
        Ok(())
    }

    fn state(&self) -> ClockState {
        lock(&self.inner).state
    }

    fn resume(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        match inner.state {
            ClockState::Closed => Err(AudioCoreError::audio_unavailable("clock is closed")),
            ClockState::Suspended if inner.refuse_resume => Err(
                AudioCoreError::audio_unavailable("resume requires a user gesture"),
            ),
            _ => {
                inner.state = ClockState::Running;
                Ok(())
            }
        }
    }

    fn suspend(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == ClockState::Running {
            inner.state = ClockState::Suspended;
        }
    }

    fn close(&self) {
        lock(&self.inner).state = ClockState::Closed;
    }
}

/// Software audio clock that renders its committed ticks to PCM.
///
/// Time comes from a monotonic [`Instant`] and freezes while suspended.
/// Ticks are kept on a timeline and mixed in at the exact sample that
/// matches their timestamp when [`render`](Self::render) is called.
#[derive(Debug)]
pub struct RenderClock {
    origin: Instant,
    inner: Mutex<RenderInner>,
}

#[derive(Debug)]
struct RenderInner {
    state: ClockState,
    paused_total: f64,
    suspended_at: Option<f64>,
    timeline: Vec<Tick>,
}

impl RenderClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Mutex::new(RenderInner {
                state: ClockState::Running,
                paused_total: 0.0,
                suspended_at: None,
                timeline: Vec::new(),
            }),
        }
    }

    fn time_locked(&self, inner: &RenderInner) -> f64 {
        match inner.suspended_at {
            Some(frozen) => frozen,
            None => self.origin.elapsed().as_secs_f64() - inner.paused_total,
        }
    }

    pub fn timeline(&self) -> Vec<Tick> {
        lock(&self.inner).timeline.clone()
    }

    /// Renders every committed tick into a mono buffer starting at clock
    /// time zero. The buffer spans at least `min_secs` and always fits the
    /// last pulse.
    pub fn render(&self, voice: &ClickVoice, sample_rate: u32, min_secs: f64) -> Vec<f32> {
        let timeline = self.timeline();
        let rate = f64::from(sample_rate);
        let pulse_len = voice.len_at(sample_rate);

        let needed = timeline
            .iter()
            .map(|tick| tick_offset(tick.time, rate) + pulse_len)
            .max()
            .unwrap_or(0);
        let len = needed.max((min_secs.max(0.0) * rate).round() as usize);

        let mut buffer = vec![0.0_f32; len];
        for tick in &timeline {
            voice.mix_into(&mut buffer, tick_offset(tick.time, rate), sample_rate);
        }
        buffer
    }
}

fn tick_offset(time: f64, rate: f64) -> usize {
    (time.max(0.0) * rate).round() as usize
}

impl Default for RenderClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for RenderClock {
    fn current_time(&self) -> f64 {
        let inner = lock(&self.inner);
        self.time_locked(&inner)
    }

    fn schedule_click(&self, tick: Tick) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.state == ClockState::Closed {
            return Err(AudioCoreError::audio_unavailable("clock is closed"));
        }
        inner.timeline.push(tick);
        Ok(())
    }

    fn state(&self) -> ClockState {
        lock(&self.inner).state
    }

    fn resume(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        match inner.state {
            ClockState::Closed => Err(AudioCoreError::audio_unavailable("clock is closed")),
            ClockState::Running => Ok(()),
            ClockState::Suspended => {
                if let Some(frozen) = inner.suspended_at.take() {
                    let wall = self.origin.elapsed().as_secs_f64();
                    inner.paused_total = wall - frozen;
                }
                inner.state = ClockState::Running;
                Ok(())
            }
        }
    }

    fn suspend(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == ClockState::Running {
            let now = self.time_locked(&inner);
            inner.suspended_at = Some(now);
            inner.state = ClockState::Suspended;
        }
    }

    fn close(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == ClockState::Suspended {
            // Keep reporting the frozen time after close.
            inner.state = ClockState::Closed;
            return;
        }
        let now = self.time_locked(&inner);
        inner.suspended_at = Some(now);
        inner.state = ClockState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn handle_creates_clock_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let mut handle = ClockHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ManualClock::new())
        });

        assert!(handle.get().is_none());
        let first = handle.acquire().unwrap();
        let second = handle.acquire().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_resumes_suspended_clock() {
        let mut handle = ClockHandle::new(|| Ok(ManualClock::suspended()));
        let clock = handle.acquire().unwrap();
        assert_eq!(clock.state(), ClockState::Running);

        clock.suspend();
        let clock = handle.acquire().unwrap();
        assert_eq!(clock.state(), ClockState::Running);
    }

    #[test]
    fn factory_failure_is_audio_unavailable() {
        let mut handle: ClockHandle<ManualClock> =
            ClockHandle::new(|| Err(AudioCoreError::msg("no output device")));
        let err = handle.acquire().unwrap_err();
        assert!(matches!(err, AudioCoreError::AudioUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn refused_resume_is_audio_unavailable() {
        let mut handle = ClockHandle::new(|| {
            let clock = ManualClock::suspended();
            clock.refuse_resume(true);
            Ok(clock)
        });
        let err = handle.acquire().unwrap_err();
        assert!(matches!(err, AudioCoreError::AudioUnavailable(_)));
    }

    #[test]
    fn disposed_handle_refuses_acquire() {
        let mut handle = ClockHandle::new(|| Ok(ManualClock::new()));
        let clock = handle.acquire().unwrap();
        handle.dispose();
        handle.dispose();

        assert_eq!(clock.state(), ClockState::Closed);
        assert!(handle.is_disposed());
        assert!(matches!(
            handle.acquire(),
            Err(AudioCoreError::AudioUnavailable(_))
        ));
    }

    #[test]
    fn manual_clock_never_moves_backwards() {
        let clock = ManualClock::starting_at(2.0);
        clock.set_time(1.0);
        assert_eq!(clock.current_time(), 2.0);
        clock.advance(0.5);
        assert_eq!(clock.current_time(), 2.5);
    }

    #[test]
    fn render_clock_freezes_while_suspended() {
        let clock = RenderClock::new();
        clock.suspend();
        let frozen = clock.current_time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.current_time(), frozen);

        clock.resume().unwrap();
        assert!(clock.current_time() >= frozen);
    }

    #[test]
    fn render_places_ticks_on_exact_samples() {
        let clock = RenderClock::new();
        clock.schedule_click(Tick { index: 0, time: 0.5 }).unwrap();
        clock.schedule_click(Tick { index: 1, time: 1.0 }).unwrap();

        let voice = ClickVoice::default();
        let rate = 8_000;
        let pcm = clock.render(&voice, rate, 2.0);

        assert_eq!(pcm.len(), 16_000);
        assert!(pcm[..4_000].iter().all(|s| *s == 0.0));
        // The pulse starts at phase zero, so the first non-silent sample
        // follows the tick sample directly.
        assert!(pcm[4_001] != 0.0);
        assert!(pcm[4_400..8_000].iter().all(|s| *s == 0.0));
        assert!(pcm[8_001] != 0.0);
    }

    #[test]
    fn clock_survives_a_panicking_lock_holder() {
        let clock = Arc::new(ManualClock::starting_at(1.0));
        let poisoner = clock.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("holder died");
        })
        .join();
        assert!(joined.is_err());
        assert!(clock.inner.is_poisoned());

        assert_eq!(clock.current_time(), 1.0);
        clock.schedule_click(Tick { index: 0, time: 1.5 }).unwrap();
        assert_eq!(clock.ticks().len(), 1);
        assert_eq!(clock.state(), ClockState::Running);
    }

    #[test]
    fn closed_render_clock_rejects_ticks() {
        let clock = RenderClock::new();
        clock.close();
        assert!(clock.schedule_click(Tick { index: 0, time: 0.0 }).is_err());
        assert!(clock.resume().is_err());
    }
}
