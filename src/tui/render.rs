use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};
use ratatui_image::StatefulImage;

use crate::screen::viewer::fit_frame_rect;
use crate::session::{LinkPhase, SessionSnapshot};

use super::helpers::format_uptime;
use super::types::InputMode;
use super::RemoteUI;

const HELP: [(&str, &str); 10] = [
    ("←↑↓→ ⏎", "buttons / OK"),
    ("[ ] wheel", "dial"),
    ("drag", "encoder"),
    ("click", "touch"),
    ("k", "type frequency"),
    ("f", "fine mode"),
    ("l", "touch lock"),
    ("p", "screen profile"),
    ("n c d", "device / connect / disconnect"),
    ("q", "quit"),
];

fn phase_style(phase: LinkPhase) -> (&'static str, Color) {
    match phase {
        LinkPhase::Connected => ("● LIVE", Color::Green),
        LinkPhase::Connecting => ("◌ CONNECTING", Color::Yellow),
        LinkPhase::Reconnecting => ("↻ RETRY", Color::Yellow),
        LinkPhase::Disconnected => ("○ OFFLINE", Color::DarkGray),
    }
}

impl RemoteUI {
    pub(crate) fn ui(&mut self, f: &mut Frame) {
        let snap = self.snapshot.clone();

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4), // header: border + 2 lines + border
                Constraint::Min(1),
                Constraint::Length(3),
            ])
            .split(f.area());

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(20), Constraint::Length(36)])
            .split(rows[1]);

        self.render_header(f, rows[0], &snap);
        self.render_screen(f, columns[0], &snap);
        self.render_sidebar(f, columns[1], &snap);
        self.render_footer(f, rows[2], &snap);
    }

    fn render_header(&self, f: &mut Frame, area: Rect, snap: &SessionSnapshot) {
        let (phase_label, phase_color) = phase_style(snap.phase);
        let mut line1 = vec![
            Span::styled(
                "📡 Mayhem Remote",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(" | "),
            Span::styled(
                phase_label,
                Style::default().fg(phase_color).add_modifier(Modifier::BOLD),
            ),
        ];
        if let Some(uptime) = snap.uptime() {
            line1.push(Span::raw(" | "));
            line1.push(Span::styled(format_uptime(uptime), Style::default().fg(Color::Green)));
        }
        if snap.turbo {
            line1.push(Span::raw(" | "));
            line1.push(Span::styled("⚡ Turbo", Style::default().fg(Color::Magenta)));
        }

        let header = Paragraph::new(vec![
            Line::from(line1),
            Line::from(Span::raw(snap.status.as_str())),
        ])
        .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(header, area);
    }

    fn render_screen(&mut self, f: &mut Frame, area: Rect, snap: &SessionSnapshot) {
        let title = format!(
            "Screen {} ({})",
            snap.screen_size,
            snap.screen_profile.label()
        );
        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let size = snap.screen_size;
        let rect = fit_frame_rect(inner, size.width(), size.height(), self.picker.font_size());
        self.frame_rect = rect;

        if let Some(ref mut protocol) = self.protocol {
            f.render_stateful_widget(StatefulImage::default(), rect, protocol);
        } else {
            let waiting = match snap.phase {
                LinkPhase::Connected => "waiting for frames...",
                _ => "not connected (c to connect)",
            };
            let widget = Paragraph::new(waiting)
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center);
            f.render_widget(widget, inner);
        }
    }

    fn render_sidebar(&self, f: &mut Frame, area: Rect, snap: &SessionSnapshot) {
        let parts = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(snap.devices.len().max(1) as u16 * 2 + 2),
                Constraint::Length(7),
                Constraint::Min(1),
            ])
            .split(area);

        let mut items: Vec<ListItem> = snap
            .devices
            .iter()
            .map(|d| {
                let selected = snap.selected_device.as_deref() == Some(d.id.as_str());
                let connected = snap.connected_device.as_deref() == Some(d.id.as_str());
                let marker = if connected {
                    "● "
                } else if selected {
                    "› "
                } else {
                    "  "
                };
                let color = if connected {
                    Color::Green
                } else if selected {
                    Color::Cyan
                } else {
                    Color::White
                };
                let mut subtitle = d.subtitle.clone();
                if !d.has_permission {
                    subtitle.push_str(" (no permission)");
                }
                ListItem::new(vec![
                    Line::from(format!("{}{}", marker, d.title)),
                    Line::from(Span::styled(
                        format!("  {}", subtitle),
                        Style::default().fg(Color::DarkGray),
                    )),
                ])
                .style(Style::default().fg(color))
            })
            .collect();
        if items.is_empty() {
            items.push(ListItem::new("(no devices)").style(Style::default().fg(Color::DarkGray)));
        }
        let devices = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Devices ({})", snap.devices.len())),
        );
        f.render_widget(devices, parts[0]);

        let flag = |on: bool| if on { "on" } else { "off" };
        let caps = snap.capabilities;
        let link = Paragraph::new(vec![
            Line::from(format!(
                "fast btn {} | fast touch {}",
                flag(caps.button_fast),
                flag(caps.touch_fast)
            )),
            Line::from(format!("half frames {}", flag(caps.frame_half))),
            Line::from(format!(
                "mode {} | touch lock {}",
                if snap.fine_mode { "fine" } else { "coarse" },
                flag(snap.touch_lock)
            )),
            Line::from(format!(
                "auto reconnect {}",
                flag(snap.auto_reconnect)
            )),
            Line::from(Span::styled(
                format!("last: {}", snap.last_control),
                Style::default().fg(Color::Yellow),
            )),
        ])
        .block(Block::default().borders(Borders::ALL).title("Link"));
        f.render_widget(link, parts[1]);

        let help: Vec<Line> = HELP
            .iter()
            .map(|(keys, what)| {
                Line::from(vec![
                    Span::styled(
                        format!("{:<10}", keys),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(*what),
                ])
            })
            .collect();
        let help = Paragraph::new(help).block(Block::default().borders(Borders::ALL).title("Keys"));
        f.render_widget(help, parts[2]);
    }

    fn render_footer(&self, f: &mut Frame, area: Rect, snap: &SessionSnapshot) {
        match &self.mode {
            InputMode::Keyboard {
                buffer,
                apply_after,
            } => {
                let title = format!(
                    "Frequency (Enter type{}, Tab toggle OK, Esc cancel)",
                    if *apply_after { " + OK" } else { "" }
                );
                let input = Paragraph::new(buffer.as_str())
                    .style(Style::default().fg(Color::White))
                    .block(Block::default().borders(Borders::ALL).title(title));
                f.render_widget(input, area);
                f.set_cursor_position((area.x + 1 + buffer.len() as u16, area.y + 1));
            }
            InputMode::Remote => {
                let device = snap
                    .selected()
                    .map(|d| d.title.clone())
                    .unwrap_or_else(|| "no device".to_string());
                let footer = Paragraph::new(Line::from(vec![
                    Span::styled(device, Style::default().fg(Color::Cyan)),
                    Span::raw(" | "),
                    Span::raw(format!("frames {}", snap.frame_token)),
                ]))
                .block(Block::default().borders(Borders::ALL));
                f.render_widget(footer, area);
            }
        }
    }
}
