mod api;
mod app;
mod config;
mod error;
mod link;
mod theme;
mod ui;

use anyhow::{bail, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{HttpBackend, LinkBackend};
use app::{App, Popup};
use config::AppConfig;
use link::{validate_device_name, LinkDialog, PollOutcome};

#[derive(Parser, Debug)]
#[command(name = "qrlink")]
#[command(version = "0.1.0")]
#[command(about = "Link WhatsApp devices to a dashboard by QR code, from the terminal")]
struct Args {
    /// Dashboard URL (overrides the config file)
    #[arg(long)]
    server: Option<String>,

    /// Print all sessions as JSON
    #[arg(long)]
    sessions: bool,

    /// Print the connection status of a session
    #[arg(long, value_name = "SESSION_ID")]
    status: Option<String>,

    /// Disconnect a session
    #[arg(long, value_name = "SESSION_ID")]
    disconnect: Option<String>,

    /// Link a new device without the TUI; exits non-zero unless it connects
    #[arg(long, value_name = "DEVICE_NAME")]
    link: Option<String>,

    /// Switch an auto-reply on or off (use with --on or --off)
    #[arg(long, value_name = "REPLY_ID")]
    toggle_auto_reply: Option<u64>,

    #[arg(long, conflicts_with = "off")]
    on: bool,

    #[arg(long)]
    off: bool,
}

impl Args {
    fn is_cli(&self) -> bool {
        self.sessions
            || self.status.is_some()
            || self.disconnect.is_some()
            || self.link.is_some()
            || self.toggle_auto_reply.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.is_cli());

    // --server only lives in the backend; the config file keeps its own URL
    let config = AppConfig::load()?;
    let server_url = args.server.as_deref().unwrap_or(&config.server_url);
    let backend = Arc::new(HttpBackend::new(server_url, config.request_timeout())?);

    // Handle CLI-only commands
    if args.sessions {
        return print_sessions(&backend).await;
    }

    if let Some(ref session_id) = args.status {
        return print_status(&backend, session_id).await;
    }

    if let Some(ref session_id) = args.disconnect {
        let ack = backend.disconnect(session_id).await?;
        println!("{}", ack.message.as_deref().unwrap_or("Session disconnected"));
        return Ok(());
    }

    if let Some(reply_id) = args.toggle_auto_reply {
        if !args.on && !args.off {
            bail!("--toggle-auto-reply needs --on or --off");
        }
        let ack = backend.toggle_auto_reply(reply_id, args.on).await?;
        println!("{}", ack.message.as_deref().unwrap_or("Auto-reply updated"));
        return Ok(());
    }

    if let Some(ref device_name) = args.link {
        return link_device(backend, &config, device_name).await;
    }

    // Run TUI
    run_tui(config, backend).await
}

/// Logs go to stderr for one-shot commands and to a file under the cache dir
/// while the TUI owns the terminal.
fn init_logging(cli: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("qrlink=info"));

    if cli {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .with(filter)
            .init();
        return;
    }

    let log_file = dirs::cache_dir().map(|dir| dir.join("qrlink")).and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("qrlink.log"))
            .ok()
    });
    if log_file.is_none() {
        // Still before raw mode, so this reaches the terminal
        eprintln!("qrlink: could not open the log file, logging is disabled");
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(tui_log_writer(log_file)),
        )
        .with(filter)
        .init();
}

/// The TUI owns stdout and stderr, so without a log file output is discarded
fn tui_log_writer(log_file: Option<File>) -> BoxMakeWriter {
    match log_file {
        Some(file) => BoxMakeWriter::new(Mutex::new(file)),
        None => BoxMakeWriter::new(io::sink),
    }
}

async fn print_sessions(backend: &HttpBackend) -> Result<()> {
    let sessions = backend.list_sessions().await?;
    println!("{}", serde_json::to_string_pretty(&sessions)?);
    Ok(())
}

async fn print_status(backend: &HttpBackend, session_id: &str) -> Result<()> {
    let report = backend.check_status(session_id).await?;

    let output = serde_json::json!({
        "session_id": session_id,
        "status": report.status.as_str(),
        "connected": report.status.is_connected(),
        "error": report.error_message(),
    });

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

/// Run the linking flow headless, printing progress to stderr
async fn link_device(backend: Arc<HttpBackend>, config: &AppConfig, device_name: &str) -> Result<()> {
    let device_name = validate_device_name(device_name)?;
    let code = backend.generate_code(&device_name).await?;

    eprintln!("Session: {}", code.session_id);
    eprintln!("Scan the QR code at {}", backend.display_url(&code.session_id));
    if !code.qr_code.starts_with("data:image") {
        println!("{}", code.qr_code);
    }

    let link_backend: Arc<dyn LinkBackend> = backend.clone();
    let mut dialog = LinkDialog::new(link_backend, config.link_settings());
    dialog.open(code.session_id.clone(), code.qr_code);

    let mut last_status = None;
    let mut warned = false;
    loop {
        dialog.step().await;

        if let Some(status) = dialog.status() {
            if last_status.as_ref() != Some(status) {
                eprintln!("Status: {}", status);
                last_status = Some(status.clone());
            }
        }

        let timer = dialog.timer();
        if timer.expiring && !warned && !timer.terminal {
            eprintln!("Code expires in {}s", timer.remaining);
            warned = true;
        }

        match dialog.outcome().cloned() {
            Some(PollOutcome::Connected) => {
                dialog.close();
                tracing::info!("Linked {} as session {}", device_name, code.session_id);
                if config.notifications {
                    let _ = notify("qrlink", &format!("Linked {}", device_name));
                }
                eprintln!("WhatsApp is now connected");
                return Ok(());
            }
            Some(PollOutcome::Failed(error)) => {
                dialog.close();
                bail!("linking failed: {}", error);
            }
            Some(PollOutcome::GaveUp(attempts)) => {
                dialog.close();
                bail!("server unreachable after {} attempts", attempts);
            }
            None if dialog.is_expired() => {
                dialog.close();
                bail!("QR code expired before it was scanned");
            }
            None => {}
        }
    }
}

async fn run_tui(config: AppConfig, backend: Arc<HttpBackend>) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let term_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(term_backend)?;

    // Create app state
    let result = match App::new(config, AppConfig::config_path().ok(), backend).await {
        Ok(mut app) => run_app(&mut terminal, &mut app).await,
        Err(e) => Err(e),
    };

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') if app.popup == Popup::None => return Ok(()),
                        KeyCode::Char('c') if key.modifiers.contains(event::KeyModifiers::CONTROL) => {
                            return Ok(())
                        }
                        _ => {
                            // Handle key and catch any errors to prevent crashes
                            if let Err(e) = app.handle_key(key).await {
                                app.set_status(format!("Error: {}", e));
                            }
                        }
                    }
                }
            }
        }

        // Dialog events and periodic refresh
        let _ = app.tick().await;
    }
}

pub fn notify(summary: &str, body: &str) -> Result<()> {
    notify_rust::Notification::new()
        .summary(summary)
        .body(body)
        .icon("phone")
        .show()?;
    Ok(())
}
