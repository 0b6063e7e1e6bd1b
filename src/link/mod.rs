//! QR linking flow: countdown, status poller, and the dialog that owns both.

pub mod countdown;
pub mod dialog;
pub mod poller;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{LinkError, LinkResult};

pub use dialog::{DialogState, LinkDialog, LinkSettings};
pub use poller::{PollConfig, PollOutcome};

/// Longest device name the dashboard accepts
pub const MAX_DEVICE_NAME_LEN: usize = 128;

/// Trim and check a device name before it is sent anywhere
pub fn validate_device_name(name: &str) -> LinkResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LinkError::Validation("Please enter a device name".to_string()));
    }
    if name.chars().count() > MAX_DEVICE_NAME_LEN {
        return Err(LinkError::Validation(format!(
            "Device name must be at most {} characters",
            MAX_DEVICE_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Sinks run under these locks, so a poisoned lock only means a sink panicked
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::lock;
    use crate::api::types::{Ack, LinkCode, RefreshedCode, Session, SessionStatus, StatusReport};
    use crate::api::LinkBackend;
    use crate::error::{LinkError, LinkResult};

    /// In-memory backend answering from scripted queues.
    /// Once the status script runs dry every poll answers `pending`.
    #[derive(Default)]
    pub struct ScriptedBackend {
        pub statuses: Mutex<VecDeque<LinkResult<StatusReport>>>,
        pub refreshes: Mutex<VecDeque<LinkResult<RefreshedCode>>>,
        pub status_delay: Option<Duration>,
        pub refresh_delay: Option<Duration>,
        pub status_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
    }

    pub fn report(status: &str) -> LinkResult<StatusReport> {
        Ok(StatusReport {
            status: SessionStatus::from(status.to_string()),
            error: None,
        })
    }

    pub fn transport_failure() -> LinkResult<StatusReport> {
        Err(LinkError::Transport("connection reset".to_string()))
    }

    impl ScriptedBackend {
        pub fn with_statuses(statuses: Vec<LinkResult<StatusReport>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }

        pub fn push_refresh(&self, result: LinkResult<RefreshedCode>) {
            lock(&self.refreshes).push_back(result);
        }

        pub fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }

        pub fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LinkBackend for ScriptedBackend {
        async fn generate_code(&self, device_name: &str) -> LinkResult<LinkCode> {
            Ok(LinkCode {
                qr_code: format!("2@{}", device_name),
                session_id: "sess-1".to_string(),
            })
        }

        async fn refresh_code(&self, _session_id: &str) -> LinkResult<RefreshedCode> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.refresh_delay {
                tokio::time::sleep(delay).await;
            }
            let next = lock(&self.refreshes).pop_front();
            next.unwrap_or_else(|| {
                Ok(RefreshedCode {
                    qr_code: Some("2@refreshed".to_string()),
                })
            })
        }

        async fn check_status(&self, _session_id: &str) -> LinkResult<StatusReport> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.status_delay {
                tokio::time::sleep(delay).await;
            }
            let next = lock(&self.statuses).pop_front();
            next.unwrap_or_else(|| report("pending"))
        }

        async fn list_sessions(&self) -> LinkResult<Vec<Session>> {
            Ok(Vec::new())
        }

        async fn disconnect(&self, _session_id: &str) -> LinkResult<Ack> {
            Ok(Ack::default())
        }

        async fn refresh_session(&self, _session_id: &str) -> LinkResult<Ack> {
            Ok(Ack::default())
        }

        async fn connect_device(&self, _device_name: &str, _session_id: &str) -> LinkResult<Ack> {
            Ok(Ack::default())
        }

        async fn toggle_auto_reply(&self, _reply_id: u64, _active: bool) -> LinkResult<Ack> {
            Ok(Ack::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_validation() {
        assert_eq!(validate_device_name("  Front desk ").unwrap(), "Front desk");
        assert!(matches!(validate_device_name("   "), Err(LinkError::Validation(_))));
        assert!(validate_device_name(&"x".repeat(MAX_DEVICE_NAME_LEN)).is_ok());
        assert!(validate_device_name(&"x".repeat(MAX_DEVICE_NAME_LEN + 1)).is_err());
    }
}
