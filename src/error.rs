//! Error taxonomy for backend interactions and the linking dialog.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Missing or malformed user input; never sent to the backend
    #[error("{0}")]
    Validation(String),

    /// Backend answered `{success: false, error}`
    #[error("{0}")]
    Domain(String),

    /// Network failure, non-2xx status, or an undecodable body
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation not allowed in the dialog's current state
    #[error("cannot {0} right now")]
    InvalidState(&'static str),
}

impl LinkError {
    pub fn is_transport(&self) -> bool {
        matches!(self, LinkError::Transport(_))
    }

    /// Message suitable for a dismissible notice.
    /// Transport details go to the log, the user sees a generic message.
    pub fn notice(&self) -> String {
        if self.is_transport() {
            "An unexpected error occurred. Please try again.".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(e: reqwest::Error) -> Self {
        LinkError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Transport(format!("malformed response: {}", e))
    }
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;
