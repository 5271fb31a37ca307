use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use time::macros::format_description;
use time::OffsetDateTime;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::state::{FormField, FormMode, OverlayState, TilePresenter, Toast};
use crate::model::{EpcCategory, Tag};
use crate::presenter::NotificationKind;
use crate::sync::{ConnectionStatus, SyncSession};

const TILE_HEIGHT: u16 = 4;

pub fn draw_app(frame: &mut Frame, session: &SyncSession<TilePresenter>, columns: u16) {
    let view = &session.presenter;
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(TILE_HEIGHT), Constraint::Length(6)])
        .split(frame.size());

    let tiles = view.visible_tiles();
    let title = if view.filter().is_active() {
        format!("Tags {}/{}", tiles.len(), view.tile_count())
    } else {
        format!("Tags {}", view.tile_count())
    };
    let grid_block = Block::default().title(title).borders(Borders::ALL);
    let grid_area = grid_block.inner(vertical[0]);
    frame.render_widget(grid_block, vertical[0]);

    if tiles.is_empty() {
        let hint = if view.tile_count() == 0 {
            "No tags yet. Press `a` to add one."
        } else {
            "No tags match the filter."
        };
        frame.render_widget(
            Paragraph::new(hint).style(Style::default().fg(Color::Gray)),
            grid_area,
        );
    } else {
        draw_tiles(frame, grid_area, &tiles, view.selected, columns.max(1));
    }

    let status = build_status_lines(session);
    frame.render_widget(
        Paragraph::new(status)
            .block(Block::default().borders(Borders::TOP))
            .style(Style::default().fg(Color::Gray)),
        vertical[1],
    );

    render_overlay(frame, view);
}

fn draw_tiles(frame: &mut Frame, area: Rect, tiles: &[&Tag], selected: usize, columns: u16) {
    let per_row = columns as usize;
    let rows_fit = (area.height / TILE_HEIGHT).max(1) as usize;
    let selected_row = selected / per_row;
    let first_row = selected_row.saturating_sub(rows_fit - 1);

    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Length(TILE_HEIGHT); rows_fit])
        .split(area);
    let column_constraints = vec![Constraint::Ratio(1, columns as u32); per_row];

    for (row_offset, row_area) in row_areas.iter().enumerate() {
        let row = first_row + row_offset;
        let start = row * per_row;
        if start >= tiles.len() {
            break;
        }
        let cells = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(column_constraints.clone())
            .split(*row_area);
        for (col, cell) in cells.iter().enumerate() {
            let index = start + col;
            let Some(tag) = tiles.get(index) else {
                break;
            };
            draw_tile(frame, *cell, tag, index == selected);
        }
    }
}

fn draw_tile(frame: &mut Frame, area: Rect, tag: &Tag, selected: bool) {
    let color = category_color(tag.category());
    let mut border = Style::default().fg(color);
    if selected {
        border = border.add_modifier(Modifier::BOLD | Modifier::REVERSED);
    }
    let width = area.width.saturating_sub(2) as usize;
    let block = Block::default()
        .title(format!("#{}", tag.tile_id()))
        .borders(Borders::ALL)
        .border_style(border);
    let lines = vec![
        Line::from(Span::styled(
            truncate(&tag.epc, width),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::raw(truncate(&tag.summary_line(), width))),
    ];
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn category_color(category: EpcCategory) -> Color {
    match category {
        EpcCategory::Bits80 => Color::Cyan,
        EpcCategory::Bits96 => Color::Magenta,
        EpcCategory::Bits128 => Color::Yellow,
        EpcCategory::Other => Color::Gray,
    }
}

fn notification_color(kind: NotificationKind) -> Color {
    match kind {
        NotificationKind::Success => Color::Green,
        NotificationKind::Error => Color::Red,
        NotificationKind::Warning => Color::Yellow,
        NotificationKind::Connection => Color::Blue,
    }
}

fn build_status_lines(session: &SyncSession<TilePresenter>) -> Text<'static> {
    let view = &session.presenter;
    let controller = &session.controller;
    let status = controller.status();
    let status_style = match status {
        ConnectionStatus::Open => Style::default().fg(Color::Green),
        ConnectionStatus::Connecting => Style::default().fg(Color::Yellow),
        ConnectionStatus::Interrupted { .. } => Style::default().fg(Color::Yellow),
        ConnectionStatus::Offline { .. } => Style::default()
            .fg(Color::Red)
            .add_modifier(Modifier::BOLD),
    };

    let mut first = vec![
        Span::raw("Server: "),
        Span::styled(status.to_string(), status_style),
        Span::raw(format!(" | Tags: {}", controller.store().len())),
    ];
    let pending = controller.pending_count();
    if pending > 0 {
        first.push(Span::raw(" | Pending: "));
        first.push(Span::styled(
            pending.to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
    }
    if view.is_filter_active() {
        first.push(Span::raw(" | Filter: "));
        first.push(Span::styled(
            format!("{}▌", view.filter_input.query),
            Style::default().fg(Color::Cyan),
        ));
    } else if view.filter().is_active() {
        let mode = if view.filter().is_literal() { "text" } else { "regex" };
        first.push(Span::raw(format!(" | Filter ({mode}): {}", view.filter().query())));
    }

    let mut lines = vec![Line::from(first)];
    if let Some(message) = view.status_message() {
        lines.push(Line::from(message.to_string()));
    }
    let recent: Vec<&Toast> = view.toasts().collect();
    for toast in recent.iter().rev().take(3) {
        lines.push(toast_line(toast));
    }
    lines.push(Line::from(Span::styled(
        "a add • Enter edit • d delete • / filter • r resync • ? help • q quit",
        Style::default().fg(Color::DarkGray),
    )));
    Text::from(lines)
}

fn toast_line(toast: &Toast) -> Line<'static> {
    let kind = toast.notification.kind;
    Line::from(vec![
        Span::raw(format!("{} ", format_time_short(toast.shown_at))),
        Span::styled(
            format!("{}: ", kind.caption()),
            Style::default()
                .fg(notification_color(kind))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(toast.notification.text.clone()),
    ])
}

fn format_time_short(dt: OffsetDateTime) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

fn render_overlay(frame: &mut Frame, view: &TilePresenter) {
    match view.overlay() {
        Some(OverlayState::Form(form)) => {
            let area = centered_rect(60, 50, frame.size());
            frame.render_widget(Clear, area);
            let heading = match &form.mode {
                FormMode::Add => "Add Tag".to_string(),
                FormMode::Edit { original } => format!("Edit Tag {}", original.tile_id()),
            };
            let mut lines = vec![
                Line::from(Span::styled(
                    heading.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
            ];
            for field in FormField::ALL {
                let focused = field == form.focus;
                let mut value = field.value(view.form()).to_string();
                if focused {
                    value.push('▌');
                }
                let label_style = if focused {
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Gray)
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("{:<16}", field.label()), label_style),
                    Span::raw(value),
                ]));
            }
            lines.push(Line::from(""));
            let hint = match form.mode {
                FormMode::Add => "Enter add • Tab next field • Ctrl-e/s/p random EPC/ISO/proprietary • Esc cancel",
                FormMode::Edit { .. } => "Enter update • Ctrl-d delete • Tab next field • Esc cancel",
            };
            lines.push(Line::from(Span::styled(
                hint,
                Style::default().fg(Color::Gray),
            )));
            let paragraph = Paragraph::new(lines)
                .block(
                    Block::default()
                        .title(heading)
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Cyan)),
                )
                .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::ConfirmDelete(draft)) => {
            let area = centered_rect(50, 25, frame.size());
            frame.render_widget(Clear, area);
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    "Delete Tag",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(format!("Ask the server to delete {}?", draft.epc)),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter to confirm • Esc to cancel",
                    Style::default().fg(Color::Gray),
                )),
            ])
            .block(
                Block::default()
                    .title(format!("Confirm Delete ({})", draft.key.tile_id()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Red)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::Help) => {
            let area = centered_rect(50, 60, frame.size());
            frame.render_widget(Clear, area);
            let rows = [
                ("a", "add a tag"),
                ("Enter / e", "edit the selected tag"),
                ("d", "delete the selected tag"),
                ("arrows / hjkl", "move between tiles"),
                ("/", "filter by EPC, PC bits or read data"),
                ("r", "request the full tag list"),
                ("c", "clear notifications"),
                ("q / Ctrl-c", "quit"),
            ];
            let mut lines: Vec<Line> = rows
                .iter()
                .map(|(key, what)| {
                    Line::from(vec![
                        Span::styled(
                            format!("{key:<14}"),
                            Style::default().add_modifier(Modifier::BOLD),
                        ),
                        Span::raw(*what),
                    ])
                })
                .collect();
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Tiles: cyan 80-bit • magenta 96-bit • yellow 128-bit",
                Style::default().fg(Color::Gray),
            )));
            let paragraph = Paragraph::new(lines).block(
                Block::default()
                    .title("Keys")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(paragraph, area);
        }
        None => {}
    }
}

/// Cuts `text` to at most `width` terminal columns, marking the cut with `…`.
fn truncate(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width - 1 {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}
