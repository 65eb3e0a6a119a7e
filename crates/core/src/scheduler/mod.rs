use std::time::Duration;

use crate::{AudioClock, Result, SchedulerConfig, Tempo, Tick};

/// State of one look-ahead scheduling run.
///
/// Created by [`ScheduleState::begin`], advanced by [`ScheduleState::pass`]
/// and thrown away on stop. `next_tick_time` only ever moves forward, one
/// whole beat at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleState {
    pub running: bool,
    pub next_tick_time: f64,
    pub lookahead_window: f64,
    pub poll_interval: Duration,
    next_index: u64,
}

impl ScheduleState {
    /// Starts a run whose first tick lands `start_offset` after `now`.
    pub fn begin(now: f64, config: &SchedulerConfig) -> Self {
        Self {
            running: true,
            next_tick_time: now + config.start_offset_secs,
            lookahead_window: config.lookahead_secs,
            poll_interval: config.poll_interval(),
            next_index: 0,
        }
    }

    /// Number of ticks committed since `begin`.
    pub fn ticks_committed(&self) -> u64 {
        self.next_index
    }

    /// Commits every tick that falls before `now + lookahead_window` and
    /// returns how many were committed.
    ///
    /// `tempo` is read per call, so a change only affects ticks committed
    /// from this pass on.
    pub fn pass<C: AudioClock + ?Sized>(&mut self, clock: &C, tempo: Tempo) -> Result<usize> {
        if !self.running {
            return Ok(0);
        }

        let horizon = clock.current_time() + self.lookahead_window;
        let interval = tempo.beat_interval_secs();
        let mut committed = 0;

        while self.next_tick_time < horizon {
            clock.schedule_click(Tick {
                index: self.next_index,
                time: self.next_tick_time,
            })?;
            self.next_index += 1;
            self.next_tick_time += interval;
            committed += 1;
        }

        tracing::debug!(
            committed,
            next_tick_time = self.next_tick_time,
            bpm = tempo.bpm(),
            "scheduling pass"
        );
        Ok(committed)
    }

    pub fn halt(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    fn tempo(bpm: f64) -> Tempo {
        Tempo::new(bpm).unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    #[test]
    fn first_tick_lands_after_safety_margin() {
        let clock = ManualClock::starting_at(3.0);
        let mut state = ScheduleState::begin(clock.current_time(), &config());
        assert!(state.running);
        assert!((state.next_tick_time - 3.05).abs() < 1e-9);

        assert_eq!(state.pass(&clock, tempo(60.0)).unwrap(), 1);
        let ticks = clock.ticks();
        assert_eq!(ticks[0].index, 0);
        assert!((ticks[0].time - 3.05).abs() < 1e-9);
    }

    #[test]
    fn ticks_advance_by_whole_beats() {
        let clock = ManualClock::new();
        let mut state = ScheduleState::begin(0.0, &config());

        for _ in 0..400 {
            state.pass(&clock, tempo(120.0)).unwrap();
            clock.advance(0.025);
        }

        let ticks = clock.ticks();
        assert!(ticks.len() > 10);
        for pair in ticks.windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
            assert!((pair[1].time - pair[0].time - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn every_tick_in_window_is_committed_once() {
        let clock = ManualClock::new();
        let mut state = ScheduleState::begin(0.0, &config());

        // A late pass has to catch up on everything that fell into the window.
        clock.set_time(2.0);
        let committed = state.pass(&clock, tempo(240.0)).unwrap();
        let ticks = clock.ticks();
        assert_eq!(committed, ticks.len());
        assert!(ticks.iter().all(|t| t.time < 2.1));
        assert!(state.next_tick_time >= 2.1);

        // Nothing new fits until the clock moves.
        assert_eq!(state.pass(&clock, tempo(240.0)).unwrap(), 0);
        assert_eq!(clock.ticks().len(), ticks.len());
    }

    #[test]
    fn tempo_change_applies_to_uncommitted_ticks_only() {
        let clock = ManualClock::new();
        let mut state = ScheduleState::begin(0.0, &config());
        let mut bpm = tempo(60.0);

        let mut now = 0.0;
        while now < 5.0 {
            if now >= 2.5 {
                bpm = tempo(120.0);
            }
            clock.set_time(now);
            state.pass(&clock, bpm).unwrap();
            now += 0.025;
        }

        let times: Vec<f64> = clock.ticks().iter().map(|t| t.time).collect();
        // Ticks at 0.05, 1.05 and 2.05 were committed under 60bpm; the one
        // at 3.05 was committed after the change but is still a full beat
        // after 2.05. Spacing halves from there on.
        let expected = [0.05, 1.05, 2.05, 3.05, 3.55, 4.05, 4.55, 5.05];
        assert_eq!(times.len(), expected.len());
        for (actual, expected) in times.iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
        }
    }

    #[test]
    fn halted_state_commits_nothing() {
        let clock = ManualClock::new();
        let mut state = ScheduleState::begin(0.0, &config());
        state.halt();
        assert_eq!(state.pass(&clock, tempo(120.0)).unwrap(), 0);
        assert!(clock.ticks().is_empty());
    }

    #[test]
    fn closed_clock_fails_the_pass() {
        let clock = ManualClock::new();
        clock.close();
        let mut state = ScheduleState::begin(0.0, &config());
        assert!(state.pass(&clock, tempo(120.0)).is_err());
    }
}
