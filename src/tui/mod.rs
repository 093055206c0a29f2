pub mod browser;

use std::io::stdout;

use anyhow::Result;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap};

use browser::FrameBrowser;

const PAGE_ROWS: usize = 20;

/// Restores terminal state on drop (normal exit or panic).
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        crossterm::execute!(stdout(), crossterm::terminal::EnterAlternateScreen)?;

        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = crossterm::terminal::disable_raw_mode();
            let _ = crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen);
            original_hook(info);
        }));

        Ok(TerminalGuard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
        let _ = crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pane {
    Table,
    Detail,
}

struct AppState {
    browser: FrameBrowser,
    table_state: TableState,
    /// Paragraph::scroll() takes (u16, u16).
    detail_scroll: u16,
    focus: Pane,
    /// Headline and tree of the selected frame, re-dissected on selection.
    detail: Option<(String, String)>,
}

impl AppState {
    fn new(browser: FrameBrowser) -> Self {
        let mut app = AppState {
            browser,
            table_state: TableState::default(),
            detail_scroll: 0,
            focus: Pane::Table,
            detail: None,
        };
        if !app.browser.is_empty() {
            app.select(0);
        }
        app
    }

    fn select(&mut self, index: usize) {
        self.table_state.select(Some(index));
        self.detail_scroll = 0;
        self.detail = self.browser.detail(index);
    }

    fn move_by(&mut self, delta: isize) {
        if self.browser.is_empty() {
            return;
        }
        let last = self.browser.len() - 1;
        let i = match self.table_state.selected() {
            Some(i) => i.saturating_add_signed(delta).min(last),
            None => 0,
        };
        self.select(i);
    }

    fn select_first(&mut self) {
        if !self.browser.is_empty() {
            self.select(0);
        }
    }

    fn select_last(&mut self) {
        if !self.browser.is_empty() {
            self.select(self.browser.len() - 1);
        }
    }
}

/// What a keypress asks the browser to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Quit,
    SwitchPane,
    Step(isize),
    First,
    Last,
}

fn action_for(key: crossterm::event::KeyEvent) -> Option<Action> {
    use crossterm::event::{KeyCode, KeyModifiers};

    let page = PAGE_ROWS as isize;
    Some(match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Action::Quit,
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        KeyCode::Tab | KeyCode::Enter => Action::SwitchPane,
        KeyCode::Char('j') | KeyCode::Down => Action::Step(1),
        KeyCode::Char('k') | KeyCode::Up => Action::Step(-1),
        KeyCode::PageDown => Action::Step(page),
        KeyCode::PageUp => Action::Step(-page),
        KeyCode::Home => Action::First,
        KeyCode::End => Action::Last,
        _ => return None,
    })
}

impl AppState {
    /// Movement goes to whichever pane has focus. Returns true on quit.
    fn apply(&mut self, action: Action) -> bool {
        match (action, self.focus) {
            (Action::Quit, _) => return true,
            (Action::SwitchPane, Pane::Table) => self.focus = Pane::Detail,
            (Action::SwitchPane, Pane::Detail) => self.focus = Pane::Table,
            (Action::Step(delta), Pane::Table) => self.move_by(delta),
            (Action::First, Pane::Table) => self.select_first(),
            (Action::Last, Pane::Table) => self.select_last(),
            (Action::Step(delta), Pane::Detail) => {
                let rows = u16::try_from(delta.unsigned_abs()).unwrap_or(u16::MAX);
                self.detail_scroll = if delta < 0 {
                    self.detail_scroll.saturating_sub(rows)
                } else {
                    self.detail_scroll.saturating_add(rows)
                };
            }
            (Action::First, Pane::Detail) => self.detail_scroll = 0,
            // Paragraph clamps
            (Action::Last, Pane::Detail) => self.detail_scroll = u16::MAX,
        }
        false
    }
}

/// Returns true if the app should quit.
fn handle_key(app: &mut AppState, key: crossterm::event::KeyEvent) -> bool {
    action_for(key).is_some_and(|action| app.apply(action))
}

/// Interactive browser over the EAP frames of a capture file.
pub fn run_tui(browser: FrameBrowser) -> Result<()> {
    let _guard = TerminalGuard::new()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    let mut app = AppState::new(browser);

    loop {
        terminal.draw(|frame| draw(frame, &mut app))?;

        if !crossterm::event::poll(std::time::Duration::from_millis(250))? {
            continue;
        }
        if let crossterm::event::Event::Key(key) = crossterm::event::read()?
            && handle_key(&mut app, key)
        {
            return Ok(());
        }
    }
}

fn draw(frame: &mut ratatui::Frame, app: &mut AppState) {
    let [list_area, detail_area, status_area] =
        Layout::vertical([Constraint::Min(5), Constraint::Percentage(50), Constraint::Length(1)])
            .areas(frame.area());

    draw_frame_list(frame, app, list_area);
    draw_dissection(frame, app, detail_area);
    frame.render_widget(Paragraph::new(status_line(&app.browser)), status_area);
}

fn pane_block(title: &'static str, focused: bool) -> Block<'static> {
    let color = if focused { Color::Cyan } else { Color::DarkGray };
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(color))
}

fn draw_frame_list(frame: &mut ratatui::Frame, app: &mut AppState, area: Rect) {
    let bold_yellow = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let header = Row::new(["#", "Via", "Source", "Dest", "EAP"].map(|h| Cell::from(h).style(bold_yellow)));

    let rows = app.browser.rows().iter().map(|r| {
        Row::new([
            Cell::from(r.frame.to_string()),
            Cell::from(r.carriage),
            Cell::from(r.src.as_str()),
            Cell::from(r.dst.as_str()),
            Cell::from(r.info.as_str()),
        ])
    });
    let widths = [
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(22),
        Constraint::Length(22),
        Constraint::Min(20),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(pane_block(" Frames ", app.focus == Pane::Table))
        .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    frame.render_stateful_widget(table, area, &mut app.table_state);
}

fn draw_dissection(frame: &mut ratatui::Frame, app: &AppState, area: Rect) {
    let text: Vec<Line> = match &app.detail {
        Some((headline, tree)) => {
            let title = Span::styled(
                headline.clone(),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            );
            std::iter::once(Line::from(title))
                .chain(tree.lines().map(tree_line))
                .collect()
        }
        None => vec![Line::from("No frame selected")],
    };

    let paragraph = Paragraph::new(text)
        .block(pane_block(" Dissection ", app.focus == Pane::Detail))
        .wrap(Wrap { trim: false })
        .scroll((app.detail_scroll, 0));
    frame.render_widget(paragraph, area);
}

fn status_line(browser: &FrameBrowser) -> Line<'static> {
    Line::from(vec![
        Span::styled(" FILE ", Style::default().fg(Color::Black).bg(Color::Yellow)),
        Span::raw(format!(
            " {} frames, {} conversations, {} incomplete, {} replays | q quit, j/k move, Tab pane, PgUp/PgDn, Home/End",
            browser.len(),
            browser.conversations(),
            browser.incomplete_reassemblies(),
            browser.replays()
        )),
    ])
}

/// Diagnostics are colored by severity.
fn tree_line(line: &str) -> Line<'static> {
    let severity = line.trim_start();
    let color = [("[Error]", Color::Red), ("[Warning]", Color::Yellow), ("[Note]", Color::DarkGray)]
        .into_iter()
        .find(|(tag, _)| severity.starts_with(tag))
        .map(|(_, color)| color);
    let style = color.map_or_else(Style::default, |c| Style::default().fg(c));
    Line::from(Span::styled(line.to_string(), style))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tui::browser::tests::browsed;

    fn make_app_with_frames(n: u32) -> AppState {
        let frames = (0..n)
            .map(|i| browsed(i + 1, vec![2, i as u8, 0, 5, 1]))
            .collect();
        AppState::new(FrameBrowser::new(frames))
    }

    fn key(code: crossterm::event::KeyCode) -> crossterm::event::KeyEvent {
        crossterm::event::KeyEvent::new(code, crossterm::event::KeyModifiers::NONE)
    }

    #[test]
    fn first_frame_selected_and_dissected() {
        let app = make_app_with_frames(3);
        assert_eq!(app.table_state.selected(), Some(0));
        assert!(app.detail.as_ref().is_some_and(|(h, _)| h.starts_with("#1 EAPOL")));
    }

    #[test]
    fn next_clamps_at_end() {
        let mut app = make_app_with_frames(3);
        app.select(2);
        app.move_by(1);
        assert_eq!(app.table_state.selected(), Some(2));
    }

    #[test]
    fn prev_clamps_at_start() {
        let mut app = make_app_with_frames(3);
        app.move_by(-1);
        assert_eq!(app.table_state.selected(), Some(0));
    }

    #[test]
    fn empty_capture() {
        let mut app = make_app_with_frames(0);
        app.move_by(1);
        app.select_last();
        assert_eq!(app.table_state.selected(), None);
        assert!(app.detail.is_none());
    }

    #[test]
    fn page_keys_jump() {
        let mut app = make_app_with_frames(50);
        handle_key(&mut app, key(crossterm::event::KeyCode::PageDown));
        assert_eq!(app.table_state.selected(), Some(20));
        app.select(30);
        handle_key(&mut app, key(crossterm::event::KeyCode::PageUp));
        assert_eq!(app.table_state.selected(), Some(10));
        handle_key(&mut app, key(crossterm::event::KeyCode::End));
        assert_eq!(app.table_state.selected(), Some(49));
    }

    #[test]
    fn every_selection_is_a_replay() {
        let mut app = make_app_with_frames(5);
        app.move_by(1);
        app.move_by(-1);
        assert_eq!(app.browser.replays(), 3);
    }

    #[test]
    fn detail_scroll_resets_on_nav() {
        let mut app = make_app_with_frames(5);
        app.detail_scroll = 42;
        app.move_by(1);
        assert_eq!(app.detail_scroll, 0);
    }

    #[test]
    fn detail_pane_scrolls_instead_of_moving() {
        let mut app = make_app_with_frames(5);
        handle_key(&mut app, key(crossterm::event::KeyCode::Enter));
        handle_key(&mut app, key(crossterm::event::KeyCode::PageDown));
        handle_key(&mut app, key(crossterm::event::KeyCode::Up));
        assert_eq!(app.detail_scroll, 19);
        assert_eq!(app.table_state.selected(), Some(0));
        handle_key(&mut app, key(crossterm::event::KeyCode::Home));
        assert_eq!(app.detail_scroll, 0);
    }

    #[test]
    fn ctrl_c_quits_but_plain_c_does_not() {
        use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(action_for(ctrl_c), Some(Action::Quit));
        assert_eq!(action_for(key(KeyCode::Char('c'))), None);
    }

    #[test]
    fn quit_keys() {
        let mut app = make_app_with_frames(1);
        assert!(handle_key(&mut app, key(crossterm::event::KeyCode::Char('q'))));
        assert!(!handle_key(&mut app, key(crossterm::event::KeyCode::Tab)));
        assert!(app.focus == Pane::Detail);
    }
}
