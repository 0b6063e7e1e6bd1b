pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::LinkResult;
use types::{Ack, LinkCode, RefreshedCode, Session, StatusReport};

pub use client::HttpBackend;

/// The dashboard backend as seen by the linking flow and the session views.
///
/// Every method returns `LinkError::Domain` for a `{success: false}` answer and
/// `LinkError::Transport` for anything that isn't a well-formed 2xx JSON body.
#[async_trait]
pub trait LinkBackend: Send + Sync {
    /// Start a linking flow for a new device
    async fn generate_code(&self, device_name: &str) -> LinkResult<LinkCode>;

    /// Replace the linking code of a pending session
    async fn refresh_code(&self, session_id: &str) -> LinkResult<RefreshedCode>;

    async fn check_status(&self, session_id: &str) -> LinkResult<StatusReport>;

    async fn list_sessions(&self) -> LinkResult<Vec<Session>>;

    async fn disconnect(&self, session_id: &str) -> LinkResult<Ack>;

    async fn refresh_session(&self, session_id: &str) -> LinkResult<Ack>;

    async fn connect_device(&self, device_name: &str, session_id: &str) -> LinkResult<Ack>;

    async fn toggle_auto_reply(&self, reply_id: u64, active: bool) -> LinkResult<Ack>;
}
