//! Per-second countdown for a linking code

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::lock;

/// How long a linking code stays valid
pub const DEFAULT_LIFETIME_SECS: u32 = 120;

/// Remaining seconds at which the code is shown as expiring
pub const DEFAULT_THRESHOLD_SECS: u32 = 30;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// Seconds left after a decrement
    Tick(u32),
    /// Counter reached the expiring threshold (fires once per run)
    Threshold,
    /// Counter reached zero; no further events follow
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub remaining: u32,
    pub threshold: u32,
    pub expiring: bool,
    pub terminal: bool,
}

impl TimerState {
    pub fn new(duration_secs: u32, threshold_secs: u32) -> Self {
        Self {
            remaining: duration_secs,
            threshold: threshold_secs,
            expiring: false,
            terminal: false,
        }
    }

    /// Advance by one second
    pub fn step(&mut self) -> Vec<CountdownEvent> {
        if self.terminal {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(3);
        self.remaining = self.remaining.saturating_sub(1);
        events.push(CountdownEvent::Tick(self.remaining));
        events.extend(self.settle());
        events
    }

    /// Threshold/expiry transitions owed by the current counter value.
    /// A run that starts at or under the threshold owes one before its first tick.
    fn settle(&mut self) -> Vec<CountdownEvent> {
        let mut events = Vec::new();
        if !self.expiring && self.remaining <= self.threshold {
            self.expiring = true;
            events.push(CountdownEvent::Threshold);
        }
        if self.remaining == 0 && !self.terminal {
            self.terminal = true;
            events.push(CountdownEvent::Expired);
        }
        events
    }
}

struct Shared {
    state: TimerState,
    live: bool,
}

struct Run {
    shared: Arc<Mutex<Shared>>,
    handle: JoinHandle<()>,
}

/// Owns at most one ticking run. Starting again replaces the previous run.
///
/// The sink is invoked while the run's lock is held, so once `stop` returns no
/// invocation is in progress and none will follow. A sink must not call back
/// into the countdown that owns it.
#[derive(Default)]
pub struct Countdown {
    run: Option<Run>,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn start<F>(&mut self, duration_secs: u32, threshold_secs: u32, sink: F)
    where
        F: FnMut(CountdownEvent) + Send + 'static,
    {
        self.start_from(TimerState::new(duration_secs, threshold_secs), sink);
    }

    /// Resume ticking from an earlier snapshot
    pub fn start_from<F>(&mut self, state: TimerState, mut sink: F)
    where
        F: FnMut(CountdownEvent) + Send + 'static,
    {
        self.stop();
        if state.terminal {
            return;
        }

        let shared = Arc::new(Mutex::new(Shared { state, live: true }));
        let task_shared = Arc::clone(&shared);

        let handle = tokio::spawn(async move {
            {
                let mut guard = lock(&task_shared);
                let owed = guard.state.settle();
                for event in owed {
                    sink(event);
                }
                if guard.state.terminal {
                    guard.live = false;
                    return;
                }
            }

            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let mut guard = lock(&task_shared);
                if !guard.live {
                    break;
                }
                for event in guard.state.step() {
                    sink(event);
                }
                if guard.state.terminal {
                    tracing::debug!("Countdown expired");
                    guard.live = false;
                    break;
                }
            }
        });

        self.run = Some(Run { shared, handle });
    }

    /// Cancel ticking. Safe to call repeatedly and after expiry.
    pub fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            lock(&run.shared).live = false;
            run.handle.abort();
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .map(|run| lock(&run.shared).live)
            .unwrap_or(false)
    }

    /// Current state of the active run, if any
    pub fn snapshot(&self) -> Option<TimerState> {
        self.run.as_ref().map(|run| lock(&run.shared).state)
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn recorder() -> (Arc<Mutex<Vec<CountdownEvent>>>, impl FnMut(CountdownEvent) + Send + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        (events, move |e| sink_events.lock().unwrap().push(e))
    }

    fn count(events: &[CountdownEvent], pred: impl Fn(&CountdownEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn step_sequence() {
        let mut state = TimerState::new(3, 2);
        assert_eq!(state.step(), vec![CountdownEvent::Tick(2), CountdownEvent::Threshold]);
        assert_eq!(state.step(), vec![CountdownEvent::Tick(1)]);
        assert_eq!(state.step(), vec![CountdownEvent::Tick(0), CountdownEvent::Expired]);
        assert!(state.terminal);
        assert!(state.step().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_to_expiry() {
        let (events, sink) = recorder();
        let mut countdown = Countdown::new();
        countdown.start(5, 3, sink);

        sleep(Duration::from_millis(5500)).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                CountdownEvent::Tick(4),
                CountdownEvent::Tick(3),
                CountdownEvent::Threshold,
                CountdownEvent::Tick(2),
                CountdownEvent::Tick(1),
                CountdownEvent::Tick(0),
                CountdownEvent::Expired,
            ]
        );
        assert!(!countdown.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_and_expire_counts_hold_for_any_duration() {
        for duration in [0u32, 1, 2, 29, 30, 31, 45] {
            let (events, sink) = recorder();
            let mut countdown = Countdown::new();
            countdown.start(duration, 30, sink);

            sleep(Duration::from_secs(duration as u64) + Duration::from_millis(500)).await;
            // nothing after expiry
            sleep(Duration::from_secs(5)).await;

            let events = events.lock().unwrap();
            let ticks = count(&events, |e| matches!(e, CountdownEvent::Tick(_)));
            assert_eq!(ticks, duration as usize, "ticks for {duration}");
            assert_eq!(count(&events, |e| *e == CountdownEvent::Expired), 1, "expiry for {duration}");
            assert_eq!(count(&events, |e| *e == CountdownEvent::Threshold), 1, "threshold for {duration}");
            assert_eq!(events.last(), Some(&CountdownEvent::Expired));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_fires_on_first_crossing() {
        let (events, sink) = recorder();
        let mut countdown = Countdown::new();
        countdown.start(33, 30, sink);

        sleep(Duration::from_millis(2500)).await;
        assert!(!events.lock().unwrap().contains(&CountdownEvent::Threshold));

        sleep(Duration::from_secs(1)).await;
        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&CountdownEvent::Threshold));
        assert_eq!(events[events.len() - 2], CountdownEvent::Tick(30));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() {
        let (events, sink) = recorder();
        let mut countdown = Countdown::new();
        countdown.start(10, 3, sink);

        sleep(Duration::from_millis(2500)).await;
        countdown.stop();
        countdown.stop();
        assert!(!countdown.is_running());

        sleep(Duration::from_secs(20)).await;
        countdown.stop();
        assert_eq!(*events.lock().unwrap(), vec![CountdownEvent::Tick(9), CountdownEvent::Tick(8)]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_run() {
        let (first, sink) = recorder();
        let mut countdown = Countdown::new();
        countdown.start(10, 3, sink);
        sleep(Duration::from_millis(3500)).await;

        let (second, sink) = recorder();
        countdown.start(10, 3, sink);
        sleep(Duration::from_millis(1500)).await;

        assert_eq!(first.lock().unwrap().len(), 3);
        assert_eq!(*second.lock().unwrap(), vec![CountdownEvent::Tick(9)]);
        assert_eq!(countdown.snapshot().map(|s| s.remaining), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_keeps_threshold_flag() {
        let mut state = TimerState::new(5, 3);
        state.step();
        state.step();
        assert!(state.expiring);

        let (events, sink) = recorder();
        let mut countdown = Countdown::new();
        countdown.start_from(state, sink);
        sleep(Duration::from_millis(3500)).await;

        let events = events.lock().unwrap();
        assert_eq!(count(&events, |e| *e == CountdownEvent::Threshold), 0);
        assert_eq!(events.last(), Some(&CountdownEvent::Expired));
    }
}
