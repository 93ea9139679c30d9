//! Terminal chat interface

pub mod commands;
pub mod composer;
pub mod history;

use crate::conversation::{ConversationController, SubmitOutcome};
use crate::llm::ModelClient;
use crate::prompts::INPUT_PLACEHOLDER;
use anyhow::Result;
use commands::{get_help_text, SlashCommand};
use composer::{ComposerResult, ConversationComposer};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use history::TranscriptView;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::Line,
    widgets::Paragraph,
    Frame, Terminal,
};
use std::cell::Cell;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

const SCROLL_STEP: usize = 5;

/// What the event loop should do after handling input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Chat screen: transcript on top, status line, composer at the bottom
pub struct ChatApp<C: ModelClient> {
    controller: ConversationController<C>,
    composer: ConversationComposer,
    show_timestamps: bool,
    scroll: usize,
    /// Scroll limit for the transcript area as last drawn
    max_scroll: Cell<usize>,
    notice: Option<String>,
    started: Instant,
}

impl<C: ModelClient> ChatApp<C> {
    pub fn new(controller: ConversationController<C>, show_timestamps: bool) -> Self {
        Self {
            controller,
            composer: ConversationComposer::new(INPUT_PLACEHOLDER),
            show_timestamps,
            scroll: 0,
            max_scroll: Cell::new(0),
            notice: None,
            started: Instant::now(),
        }
    }

    /// Take over the terminal until the user quits
    pub async fn run(mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal).await;
        restore_terminal(&mut terminal)?;
        result
    }

    async fn event_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            self.refresh();
            terminal.draw(|frame| self.draw(frame))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if self.handle_key(key) == Flow::Exit {
                        tracing::info!("chat closed by user");
                        return Ok(());
                    }
                }
            }

            // let the reply reader make progress between frames
            tokio::task::yield_now().await;
        }
    }

    /// Pull in streamed fragments and sync input state with the busy flag
    pub fn refresh(&mut self) {
        if !self.controller.poll().is_empty() {
            self.scroll = 0;
        }
        self.composer.set_enabled(!self.controller.is_busy());
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow {
        if key.kind == KeyEventKind::Press {
            match key.code {
                KeyCode::PageUp => {
                    self.scroll = (self.scroll + SCROLL_STEP).min(self.max_scroll.get());
                    return Flow::Continue;
                }
                KeyCode::PageDown => {
                    self.scroll = self.scroll.saturating_sub(SCROLL_STEP);
                    return Flow::Continue;
                }
                _ => {}
            }
        }

        match self.composer.handle_key(key) {
            ComposerResult::Submitted(text) => {
                self.notice = None;
                self.scroll = 0;
                if self.controller.submit(&text) == SubmitOutcome::Busy {
                    self.notice = Some("HealthPal is still answering.".to_string());
                }
                self.composer.set_enabled(!self.controller.is_busy());
                Flow::Continue
            }
            ComposerResult::Command(command) => self.handle_slash_command(command),
            ComposerResult::Quit => Flow::Exit,
            ComposerResult::None => Flow::Continue,
        }
    }

    fn handle_slash_command(&mut self, command: SlashCommand) -> Flow {
        match command {
            SlashCommand::Help => {
                self.notice = Some(get_help_text());
                Flow::Continue
            }
            SlashCommand::Model => {
                self.notice = Some(format!("Model: {}", self.controller.model()));
                Flow::Continue
            }
            SlashCommand::Bye => Flow::Exit,
        }
    }

    pub fn draw(&self, frame: &mut Frame) {
        let notice_lines: Vec<Line> = match &self.notice {
            Some(notice) => notice.lines().map(|l| Line::from(l.to_string())).collect(),
            None => vec![Line::from("PgUp/PgDn scroll · /help for commands · Esc to quit")],
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),
                Constraint::Length(notice_lines.len().min(6) as u16),
                Constraint::Length(3),
            ])
            .split(frame.size());

        let tick = (self.started.elapsed().as_millis() / 300) as u64;
        let transcript = TranscriptView::new(
            self.controller.transcript().turns(),
            self.controller.is_busy(),
        )
        .show_timestamps(self.show_timestamps)
        .scroll(self.scroll)
        .tick(tick);
        self.max_scroll.set(transcript.max_scroll(chunks[0]));
        frame.render_widget(transcript, chunks[0]);

        let status = Paragraph::new(notice_lines).style(Style::default().fg(Color::Gray));
        frame.render_widget(status, chunks[1]);

        frame.render_widget(&self.composer, chunks[2]);
    }

    #[cfg(test)]
    fn controller(&self) -> &ConversationController<C> {
        &self.controller
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let terminal = Terminal::new(CrosstermBackend::new(stdout)).inspect_err(|_| {
        let _ = disable_raw_mode();
    })?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelError;
    use crate::streaming::FragmentStream;
    use crate::transcript::Sender;
    use crossterm::event::KeyModifiers;
    use ratatui::backend::TestBackend;

    /// Replies with a fixed set of fragments
    struct CannedClient {
        reply: Vec<&'static str>,
    }

    impl ModelClient for CannedClient {
        fn connect(&mut self) -> Result<(), ModelError> {
            Ok(())
        }

        fn send_turn(&mut self, _text: &str) -> FragmentStream {
            let (tx, stream) = FragmentStream::channel();
            let reply = self.reply.clone();
            tokio::spawn(async move {
                for part in reply {
                    tx.text(part).await;
                }
            });
            stream
        }

        fn model(&self) -> &str {
            "canned-model"
        }
    }

    fn app() -> ChatApp<CannedClient> {
        let client = CannedClient {
            reply: vec!["Try ", "a consistent ", "bedtime."],
        };
        ChatApp::new(ConversationController::new(client), false)
    }

    fn press(app: &mut ChatApp<CannedClient>, code: KeyCode) -> Flow {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_line(app: &mut ChatApp<CannedClient>, text: &str) -> Flow {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
        press(app, KeyCode::Enter)
    }

    fn screen(app: &ChatApp<CannedClient>) -> String {
        let mut terminal = Terminal::new(TestBackend::new(60, 20)).unwrap();
        terminal.draw(|frame| app.draw(frame)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content
            .chunks(60)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn submitted_text_streams_into_transcript() {
        let mut app = app();
        assert_eq!(type_line(&mut app, "How can I sleep better?"), Flow::Continue);
        assert!(app.controller().is_busy());

        while app.controller().is_busy() {
            tokio::task::yield_now().await;
            app.refresh();
        }

        let turns = app.controller().transcript().turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].sender, Sender::User);
        assert_eq!(turns[2].text, "Try a consistent bedtime.");
        assert!(screen(&app).contains("Try a consistent bedtime."));
    }

    #[tokio::test]
    async fn typing_is_ignored_while_busy() {
        let mut app = app();
        type_line(&mut app, "first");
        type_line(&mut app, "second");
        assert_eq!(app.controller().transcript().len(), 3);
    }

    #[test]
    fn slash_commands_update_status_line() {
        let mut app = app();
        type_line(&mut app, "/model");
        assert!(screen(&app).contains("Model: canned-model"));
        assert_eq!(app.controller().transcript().len(), 1);

        assert_eq!(type_line(&mut app, "/bye"), Flow::Exit);
    }

    #[tokio::test]
    async fn page_up_stops_at_the_top_of_the_transcript() {
        let mut app = app();
        for question in ["one", "two", "three"] {
            type_line(&mut app, question);
            while app.controller().is_busy() {
                tokio::task::yield_now().await;
                app.refresh();
            }
        }
        screen(&app);
        let limit = app.max_scroll.get();
        assert!(limit > 0);

        for _ in 0..20 {
            press(&mut app, KeyCode::PageUp);
        }
        assert_eq!(app.scroll, limit);
        assert!(screen(&app).contains("Hello! I'm HealthPal"));

        press(&mut app, KeyCode::PageDown);
        assert_eq!(app.scroll, limit.saturating_sub(SCROLL_STEP));
    }

    #[test]
    fn welcome_turn_is_rendered() {
        let app = app();
        assert!(screen(&app).contains("HealthPal"));
        assert!(screen(&app).contains("Ask HealthPal for wellness tips"));
    }
}
