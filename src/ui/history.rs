//! Transcript display component

use crate::transcript::{ChatTurn, Sender};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Renders the transcript bottom-anchored, newest turn last
pub struct TranscriptView<'a> {
    turns: &'a [ChatTurn],
    busy: bool,
    show_timestamps: bool,
    /// Lines scrolled up from the bottom
    scroll: usize,
    /// Animation frame for the thinking indicator
    tick: u64,
}

impl<'a> TranscriptView<'a> {
    pub fn new(turns: &'a [ChatTurn], busy: bool) -> Self {
        Self {
            turns,
            busy,
            show_timestamps: true,
            scroll: 0,
            tick: 0,
        }
    }

    pub fn show_timestamps(mut self, show: bool) -> Self {
        self.show_timestamps = show;
        self
    }

    pub fn scroll(mut self, lines: usize) -> Self {
        self.scroll = lines;
        self
    }

    pub fn tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    /// All lines for the transcript at the given width
    pub fn lines(&self, width: u16) -> Vec<Line<'static>> {
        let mut lines = Vec::new();
        let last_index = self.turns.len().saturating_sub(1);

        for (index, turn) in self.turns.iter().enumerate() {
            let streaming = self.busy && index == last_index && turn.sender == Sender::Assistant;
            lines.extend(self.render_turn(turn, streaming, width));
            lines.push(Line::from(""));
        }
        lines
    }

    fn render_turn(&self, turn: &ChatTurn, streaming: bool, width: u16) -> Vec<Line<'static>> {
        let style = content_style(turn.sender);
        let mut header = vec![Span::styled(
            turn.sender.display_name(),
            style.add_modifier(Modifier::BOLD),
        )];
        if self.show_timestamps {
            header.push(Span::styled(
                format!(" {}", turn.created_at.format("%H:%M:%S")),
                Style::default().fg(Color::DarkGray),
            ));
        }

        let mut lines = vec![Line::from(header)];

        if streaming && turn.text.is_empty() {
            let dots = ".".repeat((self.tick % 4) as usize);
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(
                    format!("HealthPal is thinking{}", dots),
                    Style::default().fg(Color::Yellow),
                ),
            ]));
            return lines;
        }

        let content = wrap_text(&turn.text, width.saturating_sub(2) as usize);
        let last = content.len().saturating_sub(1);
        for (i, text) in content.into_iter().enumerate() {
            let mut spans = vec![Span::raw("  "), Span::styled(text, style)];
            if streaming && i == last {
                spans.push(Span::styled("▋", Style::default().fg(Color::Green)));
            }
            lines.push(Line::from(spans));
        }
        lines
    }
}

impl TranscriptView<'_> {
    fn block() -> Block<'static> {
        Block::default().borders(Borders::ALL).title("HealthPal AI")
    }

    /// Furthest the view can scroll up in `area` while still showing a full page
    pub fn max_scroll(&self, area: Rect) -> usize {
        let inner = Self::block().inner(area);
        self.lines(inner.width)
            .len()
            .saturating_sub(inner.height as usize)
    }
}

impl Widget for TranscriptView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Self::block();
        let inner = block.inner(area);
        block.render(area, buf);

        let lines = self.lines(inner.width);
        let height = inner.height as usize;
        let scroll = self.scroll.min(lines.len().saturating_sub(height));
        let end = lines.len() - scroll;
        let start = end.saturating_sub(height);

        for (i, line) in lines[start..end].iter().enumerate() {
            buf.set_line(inner.x, inner.y + i as u16, line, inner.width);
        }
    }
}

fn content_style(sender: Sender) -> Style {
    match sender {
        Sender::User => Style::default().fg(Color::Cyan),
        Sender::Assistant => Style::default().fg(Color::Green),
        Sender::Error => Style::default().fg(Color::Red),
    }
}

/// Word-wrap `text` to `width` columns, keeping explicit line breaks
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0;

        for word in paragraph.split_whitespace() {
            let mut chars: Vec<char> = word.chars().collect();
            if current_len > 0 && current_len + 1 + chars.len() > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            // words wider than a line (long URLs) are hard-broken
            while chars.len() > width {
                let rest = chars.split_off(width);
                lines.push(chars.into_iter().collect());
                chars = rest;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current_len += chars.len();
            current.extend(chars);
        }
        lines.push(current);
    }
    lines
}
