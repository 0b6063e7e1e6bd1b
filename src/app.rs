use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use crate::api::types::Session;
use crate::api::{HttpBackend, LinkBackend};
use crate::config::AppConfig;
use crate::link::{validate_device_name, LinkDialog, PollOutcome};
use crate::theme::Theme;

/// Reload the session list this often while no popup is open
const SESSIONS_REFRESH_SECS: u64 = 15;

/// Status messages clear after this many seconds
const STATUS_MESSAGE_SECS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popup {
    None,
    DeviceName,  // Device name prompt (new link or connect to existing session)
    Link,        // QR linking dialog
    Help,
    Confirm,
}

/// What the device name prompt is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPurpose {
    NewLink,
    ConnectDevice { session_id: String },
}

/// Action waiting for y/n
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    Disconnect { session_id: String, name: String },
    RefreshSession { session_id: String, name: String },
}

impl ConfirmAction {
    pub fn prompt(&self) -> String {
        match self {
            ConfirmAction::Disconnect { name, .. } => format!("Disconnect the WhatsApp session \"{}\"?", name),
            ConfirmAction::RefreshSession { name, .. } => format!("Refresh the WhatsApp session \"{}\"?", name),
        }
    }
}

pub struct App {
    pub popup: Popup,
    pub config: AppConfig,
    pub theme: Theme,

    // Where config changes are saved; None keeps them in memory only
    config_path: Option<PathBuf>,
    backend: Arc<HttpBackend>,

    // Sessions table
    pub sessions: Vec<Session>,
    pub selected_session: usize,
    pub sessions_error: Option<String>,
    pub last_sessions_refresh: Instant,

    // Device name prompt
    pub input_buffer: String,
    pub input_error: Option<String>,
    pub input_purpose: InputPurpose,

    // Linking dialog (only rendered while popup == Link)
    pub dialog: LinkDialog,
    link_notified: bool,

    pub confirm: Option<ConfirmAction>,

    // Status message (shown in info line, auto-clears after timeout)
    pub status_message: Option<String>,
    pub status_message_time: Option<Instant>,
}

impl App {
    pub async fn new(config: AppConfig, config_path: Option<PathBuf>, backend: Arc<HttpBackend>) -> Result<Self> {
        let theme = Theme::named(&config.theme, config.accent.as_deref());
        let link_backend: Arc<dyn LinkBackend> = backend.clone();
        let dialog = LinkDialog::new(link_backend, config.link_settings());

        let mut app = Self {
            popup: Popup::None,
            config,
            theme,
            config_path,
            backend,

            sessions: Vec::new(),
            selected_session: 0,
            sessions_error: None,
            last_sessions_refresh: Instant::now(),

            input_buffer: String::new(),
            input_error: None,
            input_purpose: InputPurpose::NewLink,

            dialog,
            link_notified: false,

            confirm: None,

            status_message: None,
            status_message_time: None,
        };

        app.reload_sessions().await;
        Ok(app)
    }

    pub fn server_url(&self) -> &str {
        self.backend.base_url().as_str()
    }

    /// Set a status message (auto-clears after a few seconds)
    pub fn set_status(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
        self.status_message_time = Some(Instant::now());
    }

    pub fn selected(&self) -> Option<&Session> {
        self.sessions.get(self.selected_session)
    }

    /// Fetch the session list. Failures leave the previous list in place.
    pub async fn reload_sessions(&mut self) {
        self.last_sessions_refresh = Instant::now();
        match self.backend.list_sessions().await {
            Ok(sessions) => {
                self.sessions = sessions;
                self.sessions_error = None;
                if self.selected_session >= self.sessions.len() {
                    self.selected_session = self.sessions.len().saturating_sub(1);
                }
            }
            Err(e) => {
                tracing::warn!("Error fetching sessions: {}", e);
                self.sessions_error = Some(e.notice());
            }
        }
    }

    pub async fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        // Handle popups first
        if self.popup != Popup::None {
            return self.handle_popup_key(key).await;
        }

        // Handle normal key input
        self.handle_normal_key(key).await
    }

    async fn handle_normal_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if self.selected_session + 1 < self.sessions.len() {
                    self.selected_session += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected_session = self.selected_session.saturating_sub(1);
            }

            // Link a new device
            KeyCode::Char('n') | KeyCode::Enter => {
                self.start_device_prompt(InputPurpose::NewLink);
            }

            // Connect a named device to the selected session
            KeyCode::Char('c') => {
                if let Some(session) = self.selected() {
                    let session_id = session.session_id.clone();
                    self.start_device_prompt(InputPurpose::ConnectDevice { session_id });
                }
            }

            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(session) = self.selected() {
                    self.confirm = Some(ConfirmAction::Disconnect {
                        session_id: session.session_id.clone(),
                        name: session.name.clone(),
                    });
                    self.popup = Popup::Confirm;
                }
            }

            KeyCode::Char('r') => {
                if let Some(session) = self.selected() {
                    self.confirm = Some(ConfirmAction::RefreshSession {
                        session_id: session.session_id.clone(),
                        name: session.name.clone(),
                    });
                    self.popup = Popup::Confirm;
                }
            }

            // Reload list
            KeyCode::Char('R') => {
                self.reload_sessions().await;
                if self.sessions_error.is_none() {
                    self.set_status(format!("{} session(s)", self.sessions.len()));
                }
            }

            KeyCode::Char('T') => self.cycle_theme(),

            // Help (? or h)
            KeyCode::Char('?') | KeyCode::Char('h') => self.popup = Popup::Help,

            _ => {}
        }
        Ok(())
    }

    async fn handle_popup_key(&mut self, key: KeyEvent) -> Result<()> {
        match self.popup {
            Popup::DeviceName => self.handle_device_name_key(key).await,
            Popup::Link => self.handle_link_key(key).await,
            Popup::Help => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('h') | KeyCode::Enter | KeyCode::Char('q')) {
                    self.popup = Popup::None;
                }
                Ok(())
            }
            Popup::Confirm => {
                match key.code {
                    KeyCode::Char('y') | KeyCode::Enter => {
                        self.popup = Popup::None;
                        if let Some(action) = self.confirm.take() {
                            self.confirm_action(action).await;
                        }
                    }
                    KeyCode::Char('n') | KeyCode::Esc => {
                        self.confirm = None;
                        self.popup = Popup::None;
                    }
                    _ => {}
                }
                Ok(())
            }
            Popup::None => Ok(()),
        }
    }

    fn start_device_prompt(&mut self, purpose: InputPurpose) {
        self.input_buffer = self.config.last_device_name.clone().unwrap_or_default();
        self.input_error = None;
        self.input_purpose = purpose;
        self.popup = Popup::DeviceName;
    }

    async fn handle_device_name_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_error = None;
                self.popup = Popup::None;
            }
            KeyCode::Enter => self.submit_device_name().await,
            KeyCode::Backspace => {
                self.input_buffer.pop();
                self.input_error = None;
            }
            KeyCode::Char(c) => {
                self.input_buffer.push(c);
                self.input_error = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Validate the prompt and run its action. Errors keep the prompt open.
    async fn submit_device_name(&mut self) {
        let device_name = match validate_device_name(&self.input_buffer) {
            Ok(name) => name,
            Err(e) => {
                self.input_error = Some(e.to_string());
                return;
            }
        };

        match self.input_purpose.clone() {
            InputPurpose::NewLink => match self.backend.generate_code(&device_name).await {
                Ok(code) => {
                    self.remember_device_name(&device_name);
                    self.input_buffer.clear();
                    self.link_notified = false;
                    self.dialog.open(code.session_id, code.qr_code);
                    self.popup = Popup::Link;
                }
                Err(e) => {
                    tracing::warn!("Error generating QR code: {}", e);
                    self.input_error = Some(e.notice());
                }
            },
            InputPurpose::ConnectDevice { session_id } => {
                match self.backend.connect_device(&device_name, &session_id).await {
                    Ok(_) => {
                        self.remember_device_name(&device_name);
                        self.input_buffer.clear();
                        self.popup = Popup::None;
                        self.set_status(format!("Connected {} to WhatsApp", device_name));
                        self.reload_sessions().await;
                    }
                    Err(e) => {
                        tracing::warn!("Error connecting device: {}", e);
                        self.input_error = Some(e.notice());
                    }
                }
            }
        }
    }

    fn remember_device_name(&mut self, name: &str) {
        if self.config.last_device_name.as_deref() != Some(name) {
            self.config.last_device_name = Some(name.to_string());
            self.persist_config();
        }
    }

    fn persist_config(&self) {
        if let Some(path) = self.config_path.as_deref() {
            if let Err(e) = self.config.save_to(path) {
                tracing::warn!("Could not save config to {}: {}", path.display(), e);
            }
        }
    }

    async fn handle_link_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.close_link_dialog().await,
            KeyCode::Enter if self.dialog.outcome() == Some(&PollOutcome::Connected) => {
                self.close_link_dialog().await
            }
            KeyCode::Char('r') => match self.dialog.refresh() {
                Ok(()) => self.link_notified = false,
                Err(e) => self.set_status(e.to_string()),
            },
            KeyCode::Char('o') => self.open_qr_in_browser(),
            KeyCode::Char('s') => self.save_qr_code().await,
            KeyCode::Char('x') => self.dialog.dismiss_notice(),
            _ => {}
        }
        Ok(())
    }

    async fn close_link_dialog(&mut self) {
        let linked = self.dialog.outcome() == Some(&PollOutcome::Connected);
        self.dialog.close();
        self.popup = Popup::None;
        if linked {
            self.reload_sessions().await;
        }
    }

    fn open_qr_in_browser(&mut self) {
        let Some(session_id) = self.dialog.session_id() else {
            return;
        };
        let url = self.backend.display_url(session_id).to_string();

        let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
        match Command::new(opener)
            .arg(&url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => self.set_status("Opened QR code in browser"),
            Err(e) => {
                tracing::warn!("Could not run {}: {}", opener, e);
                self.set_status(format!("Open {} in a browser", url));
            }
        }
    }

    async fn save_qr_code(&mut self) {
        let Some(session_id) = self.dialog.session_id().map(str::to_string) else {
            return;
        };
        let dir = download_dir();
        match self.backend.download_qr(&session_id, &dir).await {
            Ok(path) => self.set_status(format!("Saved {}", path.display())),
            Err(e) => {
                tracing::warn!("QR download failed: {:#}", e);
                self.set_status("Could not download QR code");
            }
        }
    }

    async fn confirm_action(&mut self, action: ConfirmAction) {
        match action {
            ConfirmAction::Disconnect { session_id, name } => {
                match self.backend.disconnect(&session_id).await {
                    Ok(_) => self.set_status(format!("Disconnected {}", name)),
                    Err(e) => {
                        tracing::warn!("Error disconnecting session {}: {}", session_id, e);
                        self.set_status(format!("Error: {}", e.notice()));
                    }
                }
            }
            ConfirmAction::RefreshSession { session_id, name } => {
                match self.backend.refresh_session(&session_id).await {
                    Ok(_) => self.set_status(format!("Refreshed {}", name)),
                    Err(e) => {
                        tracing::warn!("Error refreshing session {}: {}", session_id, e);
                        self.set_status(format!("Error: {}", e.notice()));
                    }
                }
            }
        }
        self.reload_sessions().await;
    }

    fn cycle_theme(&mut self) {
        let next = Theme::next_name(&self.config.theme);
        self.config.theme = next.to_string();
        self.theme = Theme::named(next, self.config.accent.as_deref());
        self.persist_config();
        self.set_status(format!("Theme: {}", self.theme.label));
    }

    pub async fn tick(&mut self) -> Result<()> {
        // Apply countdown and poll events from the open dialog.
        // A refresh clears the outcome, so the next one is announced again.
        self.dialog.pump();
        match self.dialog.outcome().cloned() {
            Some(outcome) => self.on_link_outcome(outcome),
            None => self.link_notified = false,
        }

        // Clear status message after a few seconds
        if let Some(time) = self.status_message_time {
            if time.elapsed().as_secs() >= STATUS_MESSAGE_SECS {
                self.status_message = None;
                self.status_message_time = None;
            }
        }

        if self.popup == Popup::None && self.last_sessions_refresh.elapsed().as_secs() >= SESSIONS_REFRESH_SECS {
            self.reload_sessions().await;
        }

        Ok(())
    }

    fn on_link_outcome(&mut self, outcome: PollOutcome) {
        if self.link_notified {
            return;
        }
        self.link_notified = true;

        match outcome {
            PollOutcome::Connected => {
                self.set_status("WhatsApp is now connected");
                if self.config.notifications {
                    if let Err(e) = crate::notify("qrlink", "WhatsApp device linked") {
                        tracing::warn!("Notification failed: {}", e);
                    }
                }
            }
            PollOutcome::Failed(error) => self.set_status(format!("Error: {}", error)),
            PollOutcome::GaveUp(attempts) => {
                self.set_status(format!("Server unreachable after {} attempts", attempts))
            }
        }
    }
}

fn download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::DialogState;
    use crossterm::event::KeyModifiers;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;
    use std::time::Duration;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    async fn app_for(server: &MockServer) -> App {
        app_with(server, AppConfig::default(), None).await
    }

    async fn app_with(server: &MockServer, config: AppConfig, config_path: Option<PathBuf>) -> App {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/sessions/whatsapp");
                then.status(200).json_body(json!({
                    "success": true,
                    "sessions": [{"id": 1, "name": "Sales", "session_id": "a1", "status": "connected"}]
                }));
            })
            .await;

        let backend = Arc::new(HttpBackend::new(&server.base_url(), Duration::from_secs(2)).unwrap());
        App::new(config, config_path, backend).await.unwrap()
    }

    async fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_key(key(KeyCode::Char(c))).await.unwrap();
        }
    }

    #[tokio::test]
    async fn empty_device_name_is_rejected_inline() {
        let server = MockServer::start_async().await;
        let generate = server
            .mock_async(|when, then| {
                when.method(POST).path("/whatsapp/generate-qr-code");
                then.status(200).json_body(json!({"success": true, "qr_code": "2@x", "session_id": "s"}));
            })
            .await;
        let mut app = app_for(&server).await;
        assert_eq!(app.sessions.len(), 1);

        app.handle_key(key(KeyCode::Char('n'))).await.unwrap();
        assert_eq!(app.popup, Popup::DeviceName);
        type_text(&mut app, "   ").await;
        app.handle_key(key(KeyCode::Enter)).await.unwrap();

        assert_eq!(app.popup, Popup::DeviceName);
        assert!(app.input_error.is_some());
        generate.assert_calls(0);
    }

    #[tokio::test]
    async fn domain_error_keeps_prompt_open() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/whatsapp/generate-qr-code");
                then.status(200)
                    .json_body(json!({"success": false, "error": "Session with name 'Desk' already exists"}));
            })
            .await;
        let mut app = app_for(&server).await;

        app.handle_key(key(KeyCode::Char('n'))).await.unwrap();
        type_text(&mut app, "Desk").await;
        app.handle_key(key(KeyCode::Enter)).await.unwrap();

        assert_eq!(app.popup, Popup::DeviceName);
        assert_eq!(app.input_error.as_deref(), Some("Session with name 'Desk' already exists"));
        assert_eq!(app.dialog.state(), DialogState::Idle);
    }

    #[tokio::test]
    async fn generate_opens_dialog_and_escape_closes_it() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/whatsapp/generate-qr-code")
                    .json_body(json!({"device_name": "Desk"}));
                then.status(200)
                    .json_body(json!({"success": true, "qr_code": "2@qr", "session_id": "sess-9"}));
            })
            .await;
        let mut app = app_for(&server).await;
        app.config.last_device_name = Some("Desk".to_string());

        app.handle_key(key(KeyCode::Char('n'))).await.unwrap();
        assert_eq!(app.input_buffer, "Desk");
        app.handle_key(key(KeyCode::Enter)).await.unwrap();

        assert_eq!(app.popup, Popup::Link);
        assert_eq!(app.dialog.state(), DialogState::Active);
        assert_eq!(app.dialog.session_id(), Some("sess-9"));
        assert_eq!(app.dialog.qr_code(), "2@qr");

        app.handle_key(key(KeyCode::Esc)).await.unwrap();
        assert_eq!(app.popup, Popup::None);
        assert_eq!(app.dialog.state(), DialogState::Closed);
    }

    #[tokio::test]
    async fn disconnect_asks_before_calling_backend() {
        let server = MockServer::start_async().await;
        let disconnect = server
            .mock_async(|when, then| {
                when.method(POST).path("/whatsapp/disconnect-session/a1");
                then.status(200).json_body(json!({"success": true}));
            })
            .await;
        let mut app = app_for(&server).await;

        app.handle_key(key(KeyCode::Char('d'))).await.unwrap();
        assert_eq!(app.popup, Popup::Confirm);
        assert!(app.confirm.as_ref().unwrap().prompt().contains("Sales"));

        app.handle_key(key(KeyCode::Char('n'))).await.unwrap();
        assert_eq!(app.popup, Popup::None);
        disconnect.assert_calls(0);

        app.handle_key(key(KeyCode::Char('d'))).await.unwrap();
        app.handle_key(key(KeyCode::Char('y'))).await.unwrap();
        disconnect.assert_calls(1);
        assert_eq!(app.status_message.as_deref(), Some("Disconnected Sales"));
    }

    #[tokio::test]
    async fn saving_config_keeps_file_server_url() {
        let server = MockServer::start_async().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        AppConfig::default().save_to(&path).unwrap();

        // The backend talks to the mock server while the file still names the default
        let config = AppConfig::load_from(&path).unwrap();
        let mut app = app_with(&server, config, Some(path.clone())).await;
        assert_eq!(app.server_url(), format!("{}/", server.base_url()));

        app.handle_key(key(KeyCode::Char('T'))).await.unwrap();

        let saved = AppConfig::load_from(&path).unwrap();
        assert_eq!(saved.theme, "data-able");
        assert_eq!(saved.server_url, crate::config::DEFAULT_SERVER_URL);
    }

    async fn tick_until(app: &mut App, done: impl Fn(&App) -> bool) {
        for _ in 0..100 {
            app.tick().await.unwrap();
            if done(app) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached, outcome {:?}", app.dialog.outcome());
    }

    #[tokio::test]
    async fn connection_after_retry_is_announced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/whatsapp/generate-qr-code");
                then.status(200)
                    .json_body(json!({"success": true, "qr_code": "2@qr", "session_id": "sess-9"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/whatsapp/refresh-qr-code/sess-9");
                then.status(200).json_body(json!({"success": true, "qr_code": "2@again"}));
            })
            .await;
        let mut failing = server
            .mock_async(|when, then| {
                when.method(GET).path("/whatsapp/check-connection-status/sess-9");
                then.status(200)
                    .json_body(json!({"success": true, "status": "pending", "error": "Browser closed"}));
            })
            .await;

        let config = AppConfig {
            poll_interval_ms: 100,
            ..Default::default()
        };
        let mut app = app_with(&server, config, None).await;

        app.handle_key(key(KeyCode::Char('n'))).await.unwrap();
        type_text(&mut app, "Desk").await;
        app.handle_key(key(KeyCode::Enter)).await.unwrap();
        assert_eq!(app.popup, Popup::Link);

        tick_until(&mut app, |app| app.dialog.outcome().is_some()).await;
        assert_eq!(app.dialog.outcome(), Some(&PollOutcome::Failed("Browser closed".to_string())));
        assert_eq!(app.status_message.as_deref(), Some("Error: Browser closed"));

        failing.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/whatsapp/check-connection-status/sess-9");
                then.status(200).json_body(json!({"success": true, "status": "connected"}));
            })
            .await;

        app.handle_key(key(KeyCode::Char('r'))).await.unwrap();
        tick_until(&mut app, |app| app.dialog.outcome() == Some(&PollOutcome::Connected)).await;

        assert_eq!(app.dialog.qr_code(), "2@again");
        assert_eq!(app.status_message.as_deref(), Some("WhatsApp is now connected"));
    }
}
