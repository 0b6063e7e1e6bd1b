//! Coordinator for one open linking dialog.
//!
//! The dialog owns its countdown and poller. Both report through a channel as
//! events tagged with the epoch they were started in; every stop or restart
//! bumps the epoch, so anything still in flight from an earlier run is dropped
//! in [`LinkDialog::handle`] instead of touching state that was torn down.

use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use super::countdown::{Countdown, CountdownEvent, TimerState, DEFAULT_LIFETIME_SECS, DEFAULT_THRESHOLD_SECS};
use super::poller::{PollConfig, PollEvent, PollOutcome, StatusPoller};
use crate::api::types::{RefreshedCode, SessionStatus};
use crate::api::LinkBackend;
use crate::error::{LinkError, LinkResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub lifetime_secs: u32,
    pub threshold_secs: u32,
    pub poll: PollConfig,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            lifetime_secs: DEFAULT_LIFETIME_SECS,
            threshold_secs: DEFAULT_THRESHOLD_SECS,
            poll: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Idle,
    Active,
    Refreshing,
    Closed,
}

#[derive(Debug)]
pub enum DialogEvent {
    Countdown { epoch: u64, event: CountdownEvent },
    Poll { epoch: u64, event: PollEvent },
    Refreshed { epoch: u64, result: LinkResult<RefreshedCode> },
}

impl DialogEvent {
    fn epoch(&self) -> u64 {
        match self {
            DialogEvent::Countdown { epoch, .. }
            | DialogEvent::Poll { epoch, .. }
            | DialogEvent::Refreshed { epoch, .. } => *epoch,
        }
    }
}

/// What the dialog looked like before a refresh, restored if the refresh fails
#[derive(Debug, Clone)]
struct Rollback {
    timer: TimerState,
    started: Instant,
    polling: bool,
    status: Option<SessionStatus>,
    outcome: Option<PollOutcome>,
}

pub struct LinkDialog {
    backend: Arc<dyn LinkBackend>,
    settings: LinkSettings,
    state: DialogState,
    epoch: u64,
    tx: UnboundedSender<DialogEvent>,
    rx: UnboundedReceiver<DialogEvent>,
    countdown: Countdown,
    poller: StatusPoller,

    session_id: Option<String>,
    qr_code: String,
    timer: TimerState,
    status: Option<SessionStatus>,
    outcome: Option<PollOutcome>,
    last_poll_error: Option<String>,
    notice: Option<String>,
    rollback: Option<Rollback>,
}

impl LinkDialog {
    pub fn new(backend: Arc<dyn LinkBackend>, settings: LinkSettings) -> Self {
        let (tx, rx) = unbounded_channel();
        let timer = TimerState::new(settings.lifetime_secs, settings.threshold_secs);
        Self {
            backend,
            settings,
            state: DialogState::Idle,
            epoch: 0,
            tx,
            rx,
            countdown: Countdown::new(),
            poller: StatusPoller::new(),
            session_id: None,
            qr_code: String::new(),
            timer,
            status: None,
            outcome: None,
            last_poll_error: None,
            notice: None,
            rollback: None,
        }
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    pub fn timer(&self) -> TimerState {
        self.timer
    }

    pub fn status(&self) -> Option<&SessionStatus> {
        self.status.as_ref()
    }

    pub fn outcome(&self) -> Option<&PollOutcome> {
        self.outcome.as_ref()
    }

    pub fn last_poll_error(&self) -> Option<&str> {
        self.last_poll_error.as_deref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, DialogState::Active | DialogState::Refreshing)
    }

    pub fn is_expired(&self) -> bool {
        self.timer.terminal && self.outcome.is_none()
    }

    /// Show a freshly generated code and start both timers.
    /// Whatever ran before, including an earlier session, is cancelled first.
    pub fn open(&mut self, session_id: impl Into<String>, qr_code: impl Into<String>) {
        self.cancel_timers();

        self.session_id = Some(session_id.into());
        self.qr_code = qr_code.into();
        self.status = None;
        self.outcome = None;
        self.last_poll_error = None;
        self.notice = None;
        self.rollback = None;

        self.start_timers(self.fresh_timer(), true);
        self.state = DialogState::Active;
        tracing::info!("Linking dialog opened for {}", self.session_id.as_deref().unwrap_or("?"));
    }

    /// Ask the backend for a new code. Both timers stop now; they restart with
    /// a full lifetime when the new code arrives. If the request fails the
    /// countdown resumes minus the time the request took.
    pub fn refresh(&mut self) -> LinkResult<()> {
        if self.state != DialogState::Active || self.outcome == Some(PollOutcome::Connected) {
            return Err(LinkError::InvalidState("refresh"));
        }
        let session_id = self
            .session_id
            .clone()
            .ok_or(LinkError::InvalidState("refresh"))?;

        self.rollback = Some(Rollback {
            timer: self.countdown.snapshot().unwrap_or(self.timer),
            started: Instant::now(),
            polling: self.poller.is_active(),
            status: self.status.clone(),
            outcome: self.outcome.clone(),
        });
        self.cancel_timers();

        self.timer = self.fresh_timer();
        self.outcome = None;
        self.notice = None;
        self.state = DialogState::Refreshing;

        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        tracing::info!("Refreshing linking code for {}", session_id);
        tokio::spawn(async move {
            let result = backend.refresh_code(&session_id).await;
            let _ = tx.send(DialogEvent::Refreshed { epoch, result });
        });
        Ok(())
    }

    /// Stop everything. Events already queued or still in flight are ignored.
    pub fn close(&mut self) {
        if self.state == DialogState::Closed {
            return;
        }
        self.cancel_timers();
        self.rollback = None;
        self.state = DialogState::Closed;
        tracing::info!("Linking dialog closed");
    }

    /// Apply one event. Returns false when it was stale and dropped.
    pub fn handle(&mut self, event: DialogEvent) -> bool {
        if event.epoch() != self.epoch || !self.is_open() {
            tracing::debug!("Dropping stale dialog event from epoch {}", event.epoch());
            return false;
        }

        match event {
            DialogEvent::Countdown { event, .. } => {
                match event {
                    CountdownEvent::Tick(remaining) => self.timer.remaining = remaining,
                    CountdownEvent::Threshold => self.timer.expiring = true,
                    CountdownEvent::Expired => {
                        self.timer.remaining = 0;
                        self.timer.terminal = true;
                        tracing::info!("Linking code expired");
                    }
                }
                true
            }
            DialogEvent::Poll { event, .. } => {
                match event {
                    PollEvent::Update(status) => {
                        self.last_poll_error = None;
                        self.status = Some(status);
                    }
                    PollEvent::Unreachable { error, consecutive } => {
                        tracing::debug!("Status poll failed {} time(s) in a row", consecutive);
                        self.last_poll_error = Some(error);
                    }
                    PollEvent::Terminal(outcome) => {
                        // Connected or failed: nothing left to count down or poll
                        self.cancel_timers();
                        self.outcome = Some(outcome);
                    }
                }
                true
            }
            DialogEvent::Refreshed { result, .. } => {
                if self.state != DialogState::Refreshing {
                    return false;
                }
                self.finish_refresh(result);
                true
            }
        }
    }

    /// Apply every queued event without waiting. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.handle(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next event and apply it
    pub async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(event) => self.handle(event),
            None => false,
        }
    }

    fn finish_refresh(&mut self, result: LinkResult<RefreshedCode>) {
        let rollback = self.rollback.take();
        match result {
            Ok(code) => {
                if let Some(qr) = code.qr_code {
                    self.qr_code = qr;
                }
                self.status = None;
                self.outcome = None;
                self.last_poll_error = None;
                self.start_timers(self.fresh_timer(), true);
                tracing::info!("Linking code refreshed");
            }
            Err(e) => {
                tracing::warn!("Failed to refresh linking code: {}", e);
                self.notice = Some(e.notice());
                match rollback {
                    Some(previous) => {
                        // The code kept ageing while the request was out
                        let mut timer = previous.timer;
                        for _ in 0..previous.started.elapsed().as_secs() {
                            if timer.terminal {
                                break;
                            }
                            timer.step();
                        }
                        self.status = previous.status;
                        self.outcome = previous.outcome;
                        self.start_timers(timer, previous.polling);
                    }
                    None => self.start_timers(self.fresh_timer(), true),
                }
            }
        }
        self.state = DialogState::Active;
    }

    fn fresh_timer(&self) -> TimerState {
        TimerState::new(self.settings.lifetime_secs, self.settings.threshold_secs)
    }

    fn cancel_timers(&mut self) {
        self.countdown.stop();
        self.poller.stop();
        self.epoch += 1;
    }

    fn start_timers(&mut self, timer: TimerState, poll: bool) {
        self.cancel_timers();
        let epoch = self.epoch;
        self.timer = timer;

        let tx = self.tx.clone();
        self.countdown.start_from(timer, move |event| {
            let _ = tx.send(DialogEvent::Countdown { epoch, event });
        });

        if !poll {
            return;
        }
        if let Some(session_id) = self.session_id.clone() {
            let tx = self.tx.clone();
            self.poller.start(
                Arc::clone(&self.backend),
                session_id,
                self.settings.poll.clone(),
                move |event| {
                    let _ = tx.send(DialogEvent::Poll { epoch, event });
                },
            );
        }
    }
}

impl Drop for LinkDialog {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
