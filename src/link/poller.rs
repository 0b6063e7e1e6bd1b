//! Connection status polling for a session being linked

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::lock;
use crate::api::types::SessionStatus;
use crate::api::LinkBackend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Shortest interval accepted from configuration
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Stop after this many consecutive transport failures. `None` polls until
    /// a terminal status or `stop`.
    pub max_failures: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_failures: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Connected,
    /// Backend reported an error for the session
    Failed(String),
    /// Consecutive transport failures hit the configured cap
    GaveUp(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Update(SessionStatus),
    /// A poll failed below the domain level; polling continues
    Unreachable { error: String, consecutive: u32 },
    /// Polling has stopped for good
    Terminal(PollOutcome),
}

#[derive(Debug, Default)]
struct PollState {
    active: bool,
    consecutive_failures: u32,
}

struct Run {
    shared: Arc<Mutex<PollState>>,
    handle: JoinHandle<()>,
}

/// Polls one session at a fixed interval until connected, errored, or stopped.
///
/// The first request goes out one interval after `start`. A response that lands
/// after `stop` is dropped without reaching the sink.
#[derive(Default)]
pub struct StatusPoller {
    run: Option<Run>,
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<F>(&mut self, backend: Arc<dyn LinkBackend>, session_id: String, config: PollConfig, mut sink: F)
    where
        F: FnMut(PollEvent) + Send + 'static,
    {
        self.stop();

        let shared = Arc::new(Mutex::new(PollState {
            active: true,
            ..Default::default()
        }));
        let task_shared = Arc::clone(&shared);
        let period = config.interval.max(MIN_POLL_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let active = lock(&task_shared).active;
                if !active {
                    break;
                }

                tracing::debug!("Polling connection status for {}", session_id);
                let result = backend.check_status(&session_id).await;

                let keep_going = {
                    let mut state = lock(&task_shared);
                    if !state.active {
                        false
                    } else {
                        match result {
                            Ok(report) => {
                                state.consecutive_failures = 0;
                                sink(PollEvent::Update(report.status.clone()));

                                if report.is_terminal() {
                                    let outcome = match report.error_message() {
                                        Some(error) => PollOutcome::Failed(error.to_string()),
                                        None => PollOutcome::Connected,
                                    };
                                    tracing::info!("Session {} polling finished: {:?}", session_id, outcome);
                                    state.active = false;
                                    sink(PollEvent::Terminal(outcome));
                                    false
                                } else {
                                    true
                                }
                            }
                            Err(e) => {
                                state.consecutive_failures += 1;
                                let consecutive = state.consecutive_failures;
                                tracing::warn!("Error checking connection status for {}: {}", session_id, e);
                                sink(PollEvent::Unreachable {
                                    error: e.to_string(),
                                    consecutive,
                                });

                                if config.max_failures.is_some_and(|max| consecutive >= max) {
                                    tracing::warn!("Giving up on {} after {} failed polls", session_id, consecutive);
                                    state.active = false;
                                    sink(PollEvent::Terminal(PollOutcome::GaveUp(consecutive)));
                                    false
                                } else {
                                    true
                                }
                            }
                        }
                    }
                };

                if !keep_going {
                    break;
                }
            }
        });

        self.run = Some(Run { shared, handle });
    }

    /// Cancel polling. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            lock(&run.shared).active = false;
            run.handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.run
            .as_ref()
            .map(|run| lock(&run.shared).active)
            .unwrap_or(false)
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
