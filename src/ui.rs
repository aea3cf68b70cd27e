use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction as LayoutDirection, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::engine::{FeedEngine, FeedView, SlotView};
use crate::model::{Channel, MediaKind};
use crate::navigation::{Direction, InputOrigin};
use crate::playback::PlaybackState;
use crate::prefetch::HintSink;
use crate::store::Fetcher;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self, now: Instant) {
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
        }
    }
}

/// Channel picker overlay. Entry 0 clears the scope.
struct ChannelMenu {
    selected: usize,
}

pub struct Options<F: Fetcher, S: HintSink> {
    pub engine: FeedEngine<F, S>,
    pub tick_rate: Duration,
    pub wheel_notch_delta: f64,
    pub touch_row_px: f64,
    pub status_message: String,
}

pub struct Model<F: Fetcher, S: HintSink> {
    engine: FeedEngine<F, S>,
    tick_rate: Duration,
    wheel_notch_delta: f64,
    touch_row_px: f64,
    status_message: String,
    spinner: Spinner,
    channel_menu: Option<ChannelMenu>,
    viewport: Rect,
    press_row: Option<u16>,
}

impl<F: Fetcher, S: HintSink> Model<F, S> {
    pub fn new(options: Options<F, S>) -> Self {
        Self {
            engine: options.engine,
            tick_rate: options.tick_rate.max(Duration::from_millis(10)),
            wheel_notch_delta: options.wheel_notch_delta,
            touch_row_px: options.touch_row_px,
            status_message: options.status_message,
            spinner: Spinner::new(),
            channel_menu: None,
            viewport: Rect::default(),
            press_row: None,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            let now = Instant::now();
            self.engine.tick(now);
            self.spinner.advance(now);

            let view = self.engine.snapshot(now);
            terminal.draw(|frame| self.draw(frame, &view))?;

            let timeout = if self.engine.is_animating(now) {
                Duration::from_millis(16)
            } else {
                self.tick_rate
            };
            if !event::poll(timeout)? {
                continue;
            }
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if self.handle_key(key.code, Instant::now()) {
                        break;
                    }
                }
                Event::Mouse(mouse) => self.handle_mouse(mouse, Instant::now()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns `true` when the user asked to quit.
    fn handle_key(&mut self, code: KeyCode, now: Instant) -> bool {
        if self.channel_menu.is_some() {
            return self.handle_menu_key(code, now);
        }
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('j') | KeyCode::Down | KeyCode::PageDown => {
                self.engine.key(Direction::Forward, now);
            }
            KeyCode::Char('k') | KeyCode::Up | KeyCode::PageUp => {
                self.engine.key(Direction::Back, now);
            }
            KeyCode::Enter | KeyCode::Char(' ') => self.engine.tap(),
            KeyCode::Char('m') | KeyCode::Char('M') => {
                let muted = self.engine.toggle_mute();
                self.status_message = if muted { "Muted" } else { "Sound on" }.to_string();
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                if self.engine.load_error().is_some() {
                    let query = self.engine.query().clone();
                    self.engine.start(query, now);
                    self.status_message = "Reloading feed…".to_string();
                } else {
                    self.engine.retry();
                    self.status_message = "Retrying playback…".to_string();
                }
            }
            KeyCode::Char('f') | KeyCode::Char('F') => {
                self.engine.toggle_variant(now);
                self.status_message = format!("Loading {}…", self.engine.query().label());
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                let selected = self
                    .engine
                    .query()
                    .channel
                    .as_ref()
                    .and_then(|current| {
                        self.engine
                            .channels()
                            .iter()
                            .position(|c| c.id == current.id)
                    })
                    .map_or(0, |i| i + 1);
                self.channel_menu = Some(ChannelMenu { selected });
            }
            _ => {}
        }
        false
    }

    fn handle_menu_key(&mut self, code: KeyCode, now: Instant) -> bool {
        let entries = self.engine.channels().len() + 1;
        let Some(menu) = self.channel_menu.as_mut() else {
            return false;
        };
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Esc | KeyCode::Char('c') | KeyCode::Char('C') => self.channel_menu = None,
            KeyCode::Down | KeyCode::Char('j') => {
                menu.selected = (menu.selected + 1) % entries;
            }
            KeyCode::Up | KeyCode::Char('k') => {
                menu.selected = (menu.selected + entries - 1) % entries;
            }
            KeyCode::Enter => {
                let selected = menu.selected;
                self.channel_menu = None;
                let channel: Option<Channel> = selected
                    .checked_sub(1)
                    .and_then(|i| self.engine.channels().get(i).cloned());
                self.status_message = match &channel {
                    Some(channel) => format!("Loading /{}…", channel.id),
                    None => "Loading all channels…".to_string(),
                };
                self.engine.select_channel(channel, now);
            }
            _ => {}
        }
        false
    }

    fn handle_mouse(&mut self, event: MouseEvent, now: Instant) {
        let origin = self.origin_of(event.column, event.row);
        let notch = self.wheel_notch_delta;
        let y = self.row_to_px(event.row);
        match event.kind {
            MouseEventKind::ScrollDown => self.engine.wheel(notch, origin, now),
            MouseEventKind::ScrollUp => self.engine.wheel(-notch, origin, now),
            MouseEventKind::Down(MouseButton::Left) => {
                self.press_row = Some(event.row);
                self.engine.touch_start(y, origin);
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let pressed = self.press_row.take();
                if pressed == Some(event.row) && origin == InputOrigin::Viewport {
                    self.engine.tap();
                } else {
                    self.engine.touch_end(y, origin, now);
                }
            }
            _ => {}
        }
    }

    /// The feed viewport navigates; header, footer and the channel overlay
    /// are controls.
    fn origin_of(&self, column: u16, row: u16) -> InputOrigin {
        let inside = column >= self.viewport.x
            && column < self.viewport.x + self.viewport.width
            && row >= self.viewport.y
            && row < self.viewport.y + self.viewport.height;
        if inside && self.channel_menu.is_none() {
            InputOrigin::Viewport
        } else {
            InputOrigin::Control
        }
    }

    fn row_to_px(&self, row: u16) -> f64 {
        f64::from(row) * self.touch_row_px
    }

    fn draw(&mut self, frame: &mut Frame<'_>, view: &FeedView) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(LayoutDirection::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);
        self.viewport = layout[1];

        frame.render_widget(self.header(view), layout[0]);
        self.draw_feed(frame, layout[1], view);
        frame.render_widget(self.footer(view), layout[2]);

        if let Some(menu) = &self.channel_menu {
            self.draw_channel_menu(frame, layout[1], menu.selected);
        }
    }

    fn header(&self, view: &FeedView) -> Paragraph<'static> {
        let position = if view.len == 0 {
            String::new()
        } else {
            format!("{}/{}", view.index + 1, view.len)
        };
        let sound = if view.muted { "🔇 muted" } else { "🔊 sound" };
        let mut spans = vec![
            Span::styled(
                format!(" {} ", view.label),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::raw(position),
            Span::raw("  "),
            Span::styled(sound.to_string(), Style::default().fg(COLOR_TEXT_SECONDARY)),
        ];
        if view.loading {
            spans.push(Span::raw(format!("  {}", self.spinner.frame())));
        }
        Paragraph::new(Line::from(spans)).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG),
        )
    }

    fn footer(&self, view: &FeedView) -> Paragraph<'static> {
        let (text, color) = if let Some(toast) = &view.toast {
            (toast.clone(), COLOR_ACCENT)
        } else if self.channel_menu.is_some() {
            (
                "Channels: j/k move · Enter select · Esc close".to_string(),
                COLOR_TEXT_SECONDARY,
            )
        } else if view.end_of_feed && view.len > 0 && view.index + 1 == view.len {
            ("You're all caught up".to_string(), COLOR_SUCCESS)
        } else if !self.status_message.is_empty() {
            (self.status_message.clone(), COLOR_TEXT_SECONDARY)
        } else {
            (
                "j/k or scroll: next/prev · Enter: play/pause · m: mute · c: channels · f: feed · r: retry · q: quit"
                    .to_string(),
                COLOR_TEXT_SECONDARY,
            )
        };
        Paragraph::new(text)
            .style(
                Style::default()
                    .fg(color)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
    }

    fn draw_feed(&self, frame: &mut Frame<'_>, area: Rect, view: &FeedView) {
        if area.height == 0 || area.width == 0 {
            return;
        }
        if let Some(err) = &view.load_error {
            frame.render_widget(centered_message(format!("Could not load the feed.\n\n{err}\n\nr to retry"), COLOR_ERROR), area);
            return;
        }
        if view.is_empty() {
            frame.render_widget(centered_message("No videos available".into(), COLOR_TEXT_SECONDARY), area);
            return;
        }
        if !view.loaded {
            frame.render_widget(
                centered_message(format!("{} Loading…", self.spinner.frame()), COLOR_TEXT_SECONDARY),
                area,
            );
            return;
        }

        let now = Utc::now();
        let height = f64::from(area.height);
        for slot in &view.slots {
            let top = f64::from(area.y) + slot.slot.offset * height;
            let top = top.round() as i64;
            let bottom = top + i64::from(area.height);
            let visible_top = top.max(i64::from(area.y));
            let visible_bottom = bottom.min(i64::from(area.y + area.height));
            if visible_bottom <= visible_top {
                continue;
            }
            let rect = Rect {
                x: area.x,
                y: visible_top as u16,
                width: area.width,
                height: (visible_bottom - visible_top) as u16,
            };
            let hidden = (visible_top - top) as u16;
            let card = Paragraph::new(card_text(slot, area.width, now, self.spinner.frame()))
                .block(
                    Block::default()
                        .borders(Borders::LEFT)
                        .border_style(Style::default().fg(if slot.slot.active {
                            COLOR_ACCENT
                        } else {
                            COLOR_BORDER_IDLE
                        })),
                )
                .style(Style::default().bg(COLOR_BG).fg(COLOR_TEXT_PRIMARY))
                .scroll((hidden, 0));
            frame.render_widget(Clear, rect);
            frame.render_widget(card, rect);
        }
    }

    fn draw_channel_menu(&self, frame: &mut Frame<'_>, area: Rect, selected: usize) {
        let popup = centered_rect(60, 70, area);
        frame.render_widget(Clear, popup);

        let current = self.engine.query().channel.as_ref().map(|c| c.id.clone());
        let mut items = vec![ListItem::new(Line::from(Span::styled(
            "All channels",
            Style::default().fg(COLOR_TEXT_PRIMARY).add_modifier(Modifier::BOLD),
        )))];
        for channel in self.engine.channels() {
            let marker = if current.as_deref() == Some(channel.id.as_str()) {
                "● "
            } else {
                "  "
            };
            let followers = channel
                .follower_count
                .map(|n| format!("  {} followers", format_count(n)))
                .unwrap_or_default();
            items.push(ListItem::new(Line::from(vec![
                Span::styled(marker.to_string(), Style::default().fg(COLOR_ACCENT)),
                Span::styled(
                    format!("/{} ", channel.id),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                ),
                Span::styled(
                    format!("{}{}", channel.name, followers),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                ),
            ])));
        }
        if self.engine.channels().is_empty() {
            items.push(ListItem::new(Line::from(Span::styled(
                "No channels (set api.subject_id)",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            ))));
        }

        let list = List::new(items)
            .block(
                Block::default()
                    .title(Span::styled(
                        "Channels",
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .highlight_style(
                Style::default()
                    .bg(COLOR_PANEL_FOCUSED_BG)
                    .add_modifier(Modifier::BOLD),
            );
        let mut state = ListState::default().with_selected(Some(selected));
        frame.render_stateful_widget(list, popup, &mut state);
    }
}

fn card_text(slot: &SlotView, width: u16, now: DateTime<Utc>, spinner: &str) -> Text<'static> {
    let item = &slot.item;
    let inner = usize::from(width.saturating_sub(3)).max(10);
    let mut lines: Vec<Line<'static>> = Vec::new();

    let mut byline = vec![
        Span::styled(
            item.author.display_name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" @{}", item.author.handle),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
    ];
    let when = relative_time(&item.created_at, now);
    if !when.is_empty() {
        byline.push(Span::styled(
            format!(" · {when}"),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ));
    }
    lines.push(Line::from(byline));
    lines.push(Line::default());

    let (status, color) = playback_label(slot, spinner);
    lines.push(Line::from(Span::styled(
        status,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )));
    let kind = match item.media_kind() {
        MediaKind::Adaptive => "HLS",
        MediaKind::Progressive => "MP4",
    };
    lines.push(Line::from(Span::styled(
        format!("{kind} · {}", truncate(&item.media_url, inner.saturating_sub(6))),
        Style::default().fg(COLOR_TEXT_SECONDARY),
    )));
    lines.push(Line::default());

    let wrap_opts = WrapOptions::new(inner);
    for paragraph in item.caption.lines() {
        for piece in wrap(paragraph, &wrap_opts) {
            lines.push(Line::from(piece.into_owned()));
        }
    }
    lines.push(Line::default());

    let engagement = item.engagement;
    lines.push(Line::from(vec![
        Span::styled("♥ ", Style::default().fg(COLOR_ERROR)),
        Span::raw(format_count(engagement.like_count)),
        Span::raw("   ⟲ "),
        Span::raw(format_count(engagement.recast_count)),
        Span::raw("   💬 "),
        Span::raw(format_count(engagement.reply_count)),
    ]));

    Text::from(lines)
}

fn playback_label(slot: &SlotView, spinner: &str) -> (String, Color) {
    match slot.playback {
        PlaybackState::Playing => ("▶ Playing".to_string(), COLOR_SUCCESS),
        PlaybackState::Paused if slot.slot.active => {
            ("❚❚ Paused · Enter to play".to_string(), COLOR_TEXT_SECONDARY)
        }
        PlaybackState::Loading => (format!("{spinner} Loading video…"), COLOR_TEXT_SECONDARY),
        PlaybackState::Ready => ("Ready".to_string(), COLOR_TEXT_SECONDARY),
        PlaybackState::Errored => {
            let reason = slot.error.as_deref().unwrap_or("playback failed");
            (format!("✕ {reason} · r to retry"), COLOR_ERROR)
        }
        PlaybackState::Idle if slot.slot.active => {
            ("■ Stopped · Enter to play".to_string(), COLOR_TEXT_SECONDARY)
        }
        PlaybackState::Idle | PlaybackState::Paused => (String::new(), COLOR_TEXT_SECONDARY),
    }
}

fn centered_message(text: String, color: Color) -> Paragraph<'static> {
    let lines = text.lines().count() as u16;
    let mut padded: Vec<Line<'static>> = (0..(lines / 2).max(1)).map(|_| Line::default()).collect();
    padded.extend(text.lines().map(|line| Line::from(line.to_string())));
    Paragraph::new(padded)
        .style(Style::default().fg(color))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

/// `950`, `1.2K`, `3.4M`.
pub fn format_count(n: u64) -> String {
    fn scaled(n: u64, unit: u64, suffix: &str) -> String {
        let tenths = n * 10 / unit;
        if tenths % 10 == 0 {
            format!("{}{suffix}", tenths / 10)
        } else {
            format!("{}.{}{suffix}", tenths / 10, tenths % 10)
        }
    }
    match n {
        0..=999 => n.to_string(),
        1_000..=999_999 => scaled(n, 1_000, "K"),
        _ => scaled(n, 1_000_000, "M"),
    }
}

/// Compact age of an RFC 3339 timestamp. Unparseable input yields "".
pub fn relative_time(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp.trim()) else {
        return String::new();
    };
    let then = parsed.with_timezone(&Utc);
    let secs = now.signed_duration_since(then).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m", secs / 60),
        3_600..=86_399 => format!("{}h", secs / 3_600),
        86_400..=604_799 => format!("{}d", secs / 86_400),
        _ => then.format("%b %-d, %Y").to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        if out.width() + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn counts_are_abbreviated() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1K");
        assert_eq!(format_count(1_234), "1.2K");
        assert_eq!(format_count(999_999), "999.9K");
        assert_eq!(format_count(3_400_000), "3.4M");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(relative_time("2024-05-10T11:59:30Z", now), "just now");
        assert_eq!(relative_time("2024-05-10T11:15:00Z", now), "45m");
        assert_eq!(relative_time("2024-05-10T07:00:00+00:00", now), "5h");
        assert_eq!(relative_time("2024-05-08T12:00:00Z", now), "2d");
        assert_eq!(relative_time("2024-03-01T00:00:00Z", now), "Mar 1, 2024");
        assert_eq!(relative_time("yesterday", now), "");
    }

    #[test]
    fn long_urls_are_truncated() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate("https://stream.test/very/long/path.mp4", 12);
        assert!(cut.ends_with('…'));
        assert!(cut.width() <= 12);
    }
}
