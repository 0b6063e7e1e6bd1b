//! reqwest implementation of the dashboard backend

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::{unwrap_envelope, Ack, LinkCode, RefreshedCode, Session, SessionList, StatusReport};
use super::LinkBackend;
use crate::error::{LinkError, LinkResult};

/// The dashboard distinguishes AJAX calls from page loads with this header
const AJAX_HEADER: (&str, &str) = ("X-Requested-With", "XMLHttpRequest");

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> LinkResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LinkError::Validation(format!("invalid server URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(LinkError::Validation(format!("invalid server URL '{}'", base_url)));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Page that renders the QR code in a browser
    pub fn display_url(&self, session_id: &str) -> Url {
        self.url(&["whatsapp", "display-qr-code", session_id])
    }

    async fn get_json(&self, segments: &[&str]) -> LinkResult<Value> {
        let url = self.url(segments);
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(AJAX_HEADER.0, AJAX_HEADER.1)
            .send()
            .await?;
        read_json(response).await
    }

    async fn post_json(&self, segments: &[&str], body: &Value) -> LinkResult<Value> {
        let url = self.url(segments);
        tracing::debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header(AJAX_HEADER.0, AJAX_HEADER.1)
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    /// Download the session's QR image into `dest_dir`, returning the file path
    pub async fn download_qr(&self, session_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let url = self.url(&["whatsapp", "download-qr-code", session_id]);
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("QR download failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("QR download failed: HTTP {}", status);
        }

        let bytes = response.bytes().await.context("QR download interrupted")?;
        let file_name: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = dest_dir.join(format!("whatsapp-qr-{}.png", file_name));

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Could not create {}", dest_dir.display()))?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Could not write {}", path.display()))?;

        tracing::info!("Saved QR code for {} to {}", session_id, path.display());
        Ok(path)
    }
}

/// Non-2xx and non-JSON responses are transport failures regardless of body
async fn read_json(response: Response) -> LinkResult<Value> {
    let status = response.status();
    if !status.is_success() {
        return Err(LinkError::Transport(format!("HTTP {}", status)));
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl LinkBackend for HttpBackend {
    async fn generate_code(&self, device_name: &str) -> LinkResult<LinkCode> {
        let body = self
            .post_json(&["whatsapp", "generate-qr-code"], &json!({ "device_name": device_name }))
            .await?;
        unwrap_envelope(body)
    }

    async fn refresh_code(&self, session_id: &str) -> LinkResult<RefreshedCode> {
        let body = self
            .post_json(&["whatsapp", "refresh-qr-code", session_id], &json!({}))
            .await?;
        unwrap_envelope(body)
    }

    async fn check_status(&self, session_id: &str) -> LinkResult<StatusReport> {
        let body = self
            .get_json(&["whatsapp", "check-connection-status", session_id])
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn list_sessions(&self) -> LinkResult<Vec<Session>> {
        let body = self.get_json(&["api", "sessions", "whatsapp"]).await?;
        let list: SessionList = unwrap_envelope(body)?;
        Ok(list.sessions)
    }

    async fn disconnect(&self, session_id: &str) -> LinkResult<Ack> {
        let body = self
            .post_json(&["whatsapp", "disconnect-session", session_id], &json!({}))
            .await?;
        unwrap_envelope(body)
    }

    async fn refresh_session(&self, session_id: &str) -> LinkResult<Ack> {
        let body = self
            .post_json(&["whatsapp", "refresh_session", session_id], &json!({}))
            .await?;
        unwrap_envelope(body)
    }

    async fn connect_device(&self, device_name: &str, session_id: &str) -> LinkResult<Ack> {
        let body = self
            .post_json(
                &["whatsapp", "connect-device"],
                &json!({ "device_name": device_name, "session_id": session_id }),
            )
            .await?;
        unwrap_envelope(body)
    }

    async fn toggle_auto_reply(&self, reply_id: u64, active: bool) -> LinkResult<Ack> {
        let id = reply_id.to_string();
        let flag = if active { "1" } else { "0" };
        let body = self
            .post_json(&["whatsapp", "toggle-auto-reply-status", id.as_str(), flag], &json!({}))
            .await?;
        unwrap_envelope(body)
    }
}
