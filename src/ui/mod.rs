use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Row, Table, Wrap},
    Frame,
};

use crate::api::types::{code_kind, CodeKind, SessionStatus};
use crate::app::{App, InputPurpose, Popup};
use crate::link::{DialogState, PollOutcome, MAX_DEVICE_NAME_LEN};
use crate::theme::Theme;

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();
    let theme = &app.theme;

    f.render_widget(Block::default().style(Style::default().bg(theme.bg)), area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(0)
        .constraints([
            Constraint::Length(1), // Info line
            Constraint::Min(4),    // Sessions box
            Constraint::Length(1), // Footer
        ])
        .split(area);

    draw_info_line(f, app, chunks[0]);
    draw_sessions_box(f, app, chunks[1]);
    draw_footer(f, app, chunks[2]);

    // Draw popups on top
    match app.popup {
        Popup::None => {}
        Popup::DeviceName => draw_device_name_popup(f, app),
        Popup::Link => draw_link_popup(f, app),
        Popup::Help => draw_help_popup(f, theme),
        Popup::Confirm => draw_confirm_popup(f, app),
    }
}

fn draw_info_line(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;

    // Priority: status message > sessions error > ready
    let line = if let Some(ref msg) = app.status_message {
        Line::from(vec![
            Span::styled(" ", Style::default()),
            Span::styled(msg.clone(), Style::default().fg(theme.accent)),
        ])
    } else if let Some(ref err) = app.sessions_error {
        Line::from(vec![
            Span::styled(" ⚠ ", Style::default().fg(theme.danger)),
            Span::styled(err.clone(), Style::default().fg(theme.danger)),
        ])
    } else {
        let connected = app.sessions.iter().filter(|s| s.status.is_connected()).count();
        Line::from(vec![
            Span::styled(" qrlink ", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
            Span::styled("│ ", Style::default().fg(theme.text_dim)),
            Span::styled(app.server_url().to_string(), Style::default().fg(theme.text)),
            Span::styled(" │ ", Style::default().fg(theme.text_dim)),
            Span::styled(
                format!("{}/{} connected", connected, app.sessions.len()),
                Style::default().fg(theme.text_dim),
            ),
        ])
    };

    f.render_widget(Paragraph::new(line), area);
}

fn status_color(theme: &Theme, status: &SessionStatus) -> ratatui::style::Color {
    match status {
        SessionStatus::Connected => theme.success,
        SessionStatus::Pending => theme.warning,
        SessionStatus::Error | SessionStatus::Expired => theme.danger,
        SessionStatus::Disconnected | SessionStatus::Unknown(_) => theme.text_dim,
    }
}

fn draw_sessions_box(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    let border_color = if app.popup == Popup::None { theme.accent } else { theme.inactive };

    let block = Block::default()
        .title(Span::styled(
            " WhatsApp Sessions ",
            Style::default().fg(border_color).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    if app.sessions.is_empty() {
        let empty = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled("No sessions yet", Style::default().fg(theme.text_dim))),
            Line::from(vec![
                Span::styled("Press ", Style::default().fg(theme.text_dim)),
                Span::styled("n", Style::default().fg(theme.accent)),
                Span::styled(" to link a device", Style::default().fg(theme.text_dim)),
            ]),
        ])
        .alignment(Alignment::Center)
        .block(block);
        f.render_widget(empty, area);
        return;
    }

    let rows: Vec<Row> = app
        .sessions
        .iter()
        .enumerate()
        .map(|(i, session)| {
            let selected = i == app.selected_session;
            let marker = if selected { "▸ " } else { "  " };
            let row = Row::new(vec![
                Span::styled(format!("{}{}", marker, session.name), Style::default().fg(theme.text)),
                Span::styled(session.session_id.clone(), Style::default().fg(theme.text_dim)),
                Span::styled(
                    session.phone.clone().unwrap_or_else(|| "-".to_string()),
                    Style::default().fg(theme.text_dim),
                ),
                Span::styled(
                    session.status.to_string(),
                    Style::default().fg(status_color(theme, &session.status)),
                ),
                Span::styled(
                    session.last_connected.clone().unwrap_or_else(|| "never".to_string()),
                    Style::default().fg(theme.text_dim),
                ),
            ]);
            if selected {
                row.style(Style::default().bg(theme.bg_selected))
            } else {
                row
            }
        })
        .collect();

    let header = Row::new(vec!["  Name", "Session", "Phone", "Status", "Last connected"])
        .style(Style::default().fg(theme.header).add_modifier(Modifier::BOLD));

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(25),
            Constraint::Percentage(20),
            Constraint::Percentage(15),
            Constraint::Percentage(15),
            Constraint::Percentage(25),
        ],
    )
    .header(header)
    .block(block);

    f.render_widget(table, area);
}

fn draw_footer(f: &mut Frame, app: &App, area: Rect) {
    let hints: Vec<(&str, &str)> = match app.popup {
        Popup::Link => vec![("r", "New code"), ("o", "Browser"), ("s", "Save"), ("Esc", "Close")],
        Popup::DeviceName => vec![("Enter", "Submit"), ("Esc", "Cancel")],
        _ => vec![
            ("↑↓", "Nav"),
            ("n", "Link"),
            ("c", "Connect"),
            ("r", "Refresh"),
            ("d", "Disconnect"),
            ("T", "Theme"),
            ("h", "Help"),
        ],
    };

    // Responsive: show fewer hints on narrow terminals
    let max_hints = if area.width < 60 { 4 } else if area.width < 80 { 5 } else { hints.len() };

    let hint_spans: Vec<Span> = hints
        .iter()
        .take(max_hints)
        .flat_map(|(key, action)| {
            vec![
                Span::styled(*key, Style::default().fg(app.theme.accent)),
                Span::styled(format!(" {} │ ", action), Style::default().fg(app.theme.text_dim)),
            ]
        })
        .collect();

    let footer = Paragraph::new(Line::from(hint_spans)).alignment(Alignment::Center);
    f.render_widget(footer, area);
}

fn draw_device_name_popup(f: &mut Frame, app: &App) {
    let theme = &app.theme;
    let popup_area = centered_rect(50, 30, f.area());
    f.render_widget(Clear, popup_area);

    let title = match app.input_purpose {
        InputPurpose::NewLink => " Link a WhatsApp device ",
        InputPurpose::ConnectDevice { .. } => " Connect device to session ",
    };

    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled("Device name:", Style::default().fg(theme.text_dim))),
        Line::from(vec![
            Span::styled(app.input_buffer.clone(), Style::default().fg(theme.text)),
            Span::styled("█", Style::default().fg(theme.accent)),
        ]),
        Line::from(Span::styled(
            format!("{}/{}", app.input_buffer.chars().count(), MAX_DEVICE_NAME_LEN),
            Style::default().fg(theme.inactive),
        )),
    ];

    if let Some(ref err) = app.input_error {
        lines.push(Line::from(Span::styled(err.clone(), Style::default().fg(theme.danger))));
    }

    let input = Paragraph::new(lines)
        .block(
            Block::default()
                .title(Span::styled(title, Style::default().fg(theme.accent)))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.accent)),
        )
        .wrap(Wrap { trim: false });

    f.render_widget(input, popup_area);
}

fn draw_link_popup(f: &mut Frame, app: &App) {
    let theme = &app.theme;
    let dialog = &app.dialog;
    let area = f.area();
    let popup_area = centered_rect(
        if area.width < 80 { 95 } else { 70 },
        if area.height < 30 { 95 } else { 70 },
        area,
    );
    f.render_widget(Clear, popup_area);

    let block = Block::default()
        .title(Span::styled(" Scan with WhatsApp ", Style::default().fg(theme.accent)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.accent));
    let inner = block.inner(popup_area);
    f.render_widget(block, popup_area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Code
            Constraint::Length(1), // Countdown
            Constraint::Length(1), // Status
            Constraint::Length(2), // Notice / overlay
        ])
        .split(inner);

    // Code
    let code = dialog.qr_code();
    let code_lines = match code_kind(code) {
        CodeKind::Image => vec![
            Line::from(""),
            Line::from(Span::styled("QR code received as an image", Style::default().fg(theme.text))),
            Line::from(vec![
                Span::styled("Press ", Style::default().fg(theme.text_dim)),
                Span::styled("o", Style::default().fg(theme.accent)),
                Span::styled(" to open it or ", Style::default().fg(theme.text_dim)),
                Span::styled("s", Style::default().fg(theme.accent)),
                Span::styled(" to save it", Style::default().fg(theme.text_dim)),
            ]),
        ],
        CodeKind::Text => vec![
            Line::from(Span::styled("Linking code:", Style::default().fg(theme.text_dim))),
            Line::from(Span::styled(code.to_string(), Style::default().fg(theme.text))),
        ],
    };
    let code_style = if dialog.state() == DialogState::Refreshing || dialog.is_expired() {
        Style::default().add_modifier(Modifier::DIM)
    } else {
        Style::default()
    };
    f.render_widget(
        Paragraph::new(code_lines)
            .style(code_style)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        chunks[0],
    );

    // Countdown
    let timer = dialog.timer();
    let countdown_color = if timer.terminal {
        theme.danger
    } else if timer.expiring {
        theme.warning
    } else {
        theme.accent
    };
    let countdown = Line::from(vec![
        Span::styled("󰔟 ", Style::default().fg(countdown_color)),
        Span::styled(
            format!("{}:{:02}", timer.remaining / 60, timer.remaining % 60),
            Style::default().fg(countdown_color).add_modifier(Modifier::BOLD),
        ),
    ]);
    f.render_widget(Paragraph::new(countdown).alignment(Alignment::Center), chunks[1]);

    // Status
    let status = match dialog.status() {
        Some(status) => Span::styled(
            format!("Status: {}", status),
            Style::default().fg(status_color(theme, status)),
        ),
        None => Span::styled("Waiting for scan…", Style::default().fg(theme.text_dim)),
    };
    let mut status_spans = vec![status];
    if let Some(err) = dialog.last_poll_error() {
        status_spans.push(Span::styled(format!("  ({})", err), Style::default().fg(theme.inactive)));
    }
    f.render_widget(Paragraph::new(Line::from(status_spans)).alignment(Alignment::Center), chunks[2]);

    // Overlay: outcome > refreshing > expired > notice
    let overlay = match dialog.outcome() {
        Some(PollOutcome::Connected) => Some(Line::from(vec![
            Span::styled("✓ WhatsApp is now connected", Style::default().fg(theme.success).add_modifier(Modifier::BOLD)),
            Span::styled("  (Enter to close)", Style::default().fg(theme.text_dim)),
        ])),
        Some(PollOutcome::Failed(error)) => Some(Line::from(Span::styled(
            format!("✗ {}", error),
            Style::default().fg(theme.danger).add_modifier(Modifier::BOLD),
        ))),
        Some(PollOutcome::GaveUp(attempts)) => Some(Line::from(Span::styled(
            format!("✗ Server unreachable after {} attempts", attempts),
            Style::default().fg(theme.danger),
        ))),
        None if dialog.state() == DialogState::Refreshing => Some(Line::from(Span::styled(
            "Generating a new code…",
            Style::default().fg(theme.text_dim),
        ))),
        None if dialog.is_expired() => Some(Line::from(vec![
            Span::styled("Code expired. Press ", Style::default().fg(theme.danger)),
            Span::styled("r", Style::default().fg(theme.accent)),
            Span::styled(" for a new one", Style::default().fg(theme.danger)),
        ])),
        None => None,
    };

    let mut bottom = Vec::new();
    if let Some(line) = overlay {
        bottom.push(line);
    }
    if let Some(notice) = dialog.notice() {
        bottom.push(Line::from(Span::styled(notice.to_string(), Style::default().fg(theme.danger))));
    }
    f.render_widget(Paragraph::new(bottom).alignment(Alignment::Center), chunks[3]);
}

fn draw_help_popup(f: &mut Frame, theme: &Theme) {
    let area = f.area();
    let popup_area = centered_rect(
        if area.width < 80 { 95 } else { 70 },
        if area.height < 40 { 95 } else { 85 },
        area,
    );

    f.render_widget(Clear, popup_area);

    let section = |title: &'static str| {
        Line::from(Span::styled(
            title,
            Style::default().fg(theme.header).add_modifier(Modifier::BOLD),
        ))
    };
    let key = |k: &'static str, desc: &'static str| {
        Line::from(vec![
            Span::styled(k, Style::default().fg(theme.accent)),
            Span::raw(desc),
        ])
    };

    let help_text = vec![
        section("═══ Sessions ═══"),
        key("  ↑/↓ j/k   ", "Move up/down"),
        key("  n/Enter   ", "Link a new device with a QR code"),
        key("  c         ", "Connect a named device to the selected session"),
        key("  r         ", "Refresh the selected session"),
        key("  d         ", "Disconnect the selected session"),
        key("  R         ", "Reload the session list"),
        key("  T         ", "Cycle theme"),
        Line::from(""),
        section("═══ Linking ═══"),
        key("  r         ", "Request a new code (resets the countdown)"),
        key("  o         ", "Open the QR code in a browser"),
        key("  s         ", "Save the QR code to Downloads"),
        key("  x         ", "Dismiss error notice"),
        key("  Esc       ", "Close the dialog"),
        Line::from(""),
        section("═══ Command line ═══"),
        key("  qrlink --sessions          ", "List sessions as JSON"),
        key("  qrlink --status ID         ", "Print a session's status"),
        key("  qrlink --link NAME         ", "Link a device without the TUI"),
        key("  qrlink --disconnect ID     ", "Disconnect a session"),
        Line::from(""),
        Line::from(vec![
            Span::styled("  Press ", Style::default().fg(theme.text_dim)),
            Span::styled("h", Style::default().fg(theme.accent)),
            Span::styled("/", Style::default().fg(theme.text_dim)),
            Span::styled("?", Style::default().fg(theme.accent)),
            Span::styled("/", Style::default().fg(theme.text_dim)),
            Span::styled("Esc", Style::default().fg(theme.accent)),
            Span::styled(" to close", Style::default().fg(theme.text_dim)),
        ]),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .title(Span::styled(" 󰋖 qrlink Help ", Style::default().fg(theme.accent)))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.accent)),
        )
        .wrap(Wrap { trim: false });

    f.render_widget(help, popup_area);
}

fn draw_confirm_popup(f: &mut Frame, app: &App) {
    let theme = &app.theme;
    let popup_area = centered_rect(50, 20, f.area());

    f.render_widget(Clear, popup_area);

    let message = app
        .confirm
        .as_ref()
        .map(|action| action.prompt())
        .unwrap_or_else(|| "Confirm?".to_string());

    let confirm = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(message, Style::default().fg(theme.warning))),
        Line::from(""),
        Line::from(vec![
            Span::styled("  y", Style::default().fg(theme.success).add_modifier(Modifier::BOLD)),
            Span::raw(" Yes   "),
            Span::styled("n", Style::default().fg(theme.danger).add_modifier(Modifier::BOLD)),
            Span::raw(" No"),
        ]),
    ])
    .block(
        Block::default()
            .title(Span::styled(" Confirm ", Style::default().fg(theme.warning)))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.warning)),
    )
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true });

    f.render_widget(confirm, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
