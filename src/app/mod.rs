use std::io::Stdout;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use time::OffsetDateTime;

use crate::config::AppConfig;
use crate::connection::ws::WsConnector;
use crate::connection::{ConnectionHandle, ConnectionManager, Connector};
use crate::fixtures::FixtureKind;
use crate::sync::{spawn_event_pump, FormAction, SharedSession, SyncController, SyncSession};
use crate::ui;

pub mod state;

pub use state::{FormField, FormMode, OverlayState, TilePresenter};

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    SelectRowBelow,
    SelectRowAbove,
    AddTag,
    EditTag,
    DeleteTag,
    StartFilter,
    Resync,
    ClearNotifications,
    ToggleHelp,
}

pub struct App {
    pub config: Arc<AppConfig>,
    session: SharedSession<TilePresenter>,
    connection: ConnectionHandle,
    pump: Option<JoinHandle<()>>,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>) -> Result<Self> {
        let connector = WsConnector::new(config.connection.read_timeout());
        Self::with_connector(config, connector)
    }

    pub fn with_connector<C: Connector>(config: Arc<AppConfig>, connector: C) -> Result<Self> {
        let endpoint = config.endpoint();
        tracing::info!(%endpoint, "starting dashboard");
        let (connection, events) =
            ConnectionManager::spawn(connector, endpoint, config.connection_options())
                .context("starting connection worker")?;
        let controller = SyncController::new(
            Box::new(connection.clone()),
            config.sync.pending_timeout(),
        );
        let presenter = TilePresenter::new(config.ui.notification_ttl());
        let session = SyncSession::new(controller, presenter).shared();
        let pump = spawn_event_pump(session.clone(), events)?;
        Ok(Self {
            tick_rate: config.ui.tick_rate(),
            config,
            session,
            connection,
            pump: Some(pump),
            should_quit: false,
        })
    }

    pub fn session(&self) -> &SharedSession<TilePresenter> {
        &self.session
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        self.shutdown();
        result
    }

    /// Stops the connection worker and waits for the event pump to drain.
    pub fn shutdown(&mut self) {
        self.connection.shutdown();
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                tracing::error!("event pump panicked");
            }
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let columns = self.config.ui.columns;
        loop {
            {
                let session = self.session.lock();
                terminal
                    .draw(|frame| ui::draw_app(frame, &session, columns))
                    .context("rendering frame")?;
            }

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn on_tick(&mut self) {
        let mut session = self.session.lock();
        let expired = session.expire_stale(Instant::now());
        if expired > 0 {
            tracing::debug!(expired, "pending actions timed out");
        }
        session.presenter.prune_toasts(OffsetDateTime::now_utc());
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        if self.session.lock().presenter.is_filter_active() {
            self.handle_filter_key(key);
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let action = match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            KeyCode::Char('l') | KeyCode::Right => Some(Action::SelectNext),
            KeyCode::Char('h') | KeyCode::Left => Some(Action::SelectPrevious),
            KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectRowBelow),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectRowAbove),
            KeyCode::Char('a') if plain => Some(Action::AddTag),
            KeyCode::Char('e') | KeyCode::Enter if plain => Some(Action::EditTag),
            KeyCode::Char('d') if plain => Some(Action::DeleteTag),
            KeyCode::Char('/') if plain => Some(Action::StartFilter),
            KeyCode::Char('r') => Some(Action::Resync),
            KeyCode::Char('c') if plain => Some(Action::ClearNotifications),
            KeyCode::Char('?') => Some(Action::ToggleHelp),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        let columns = self.config.ui.columns.max(1) as isize;
        let mut session = self.session.lock();
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => session.presenter.move_selection(1),
            Action::SelectPrevious => session.presenter.move_selection(-1),
            Action::SelectRowBelow => session.presenter.move_selection(columns),
            Action::SelectRowAbove => session.presenter.move_selection(-columns),
            Action::AddTag => {
                session.presenter.open_add_form();
                session
                    .presenter
                    .set_status_message(Some("Fill in the tag and press Enter"));
            }
            Action::EditTag => {
                let Some(key) = session.presenter.selected_tile().map(|tag| tag.key()) else {
                    session.presenter.set_status_message(Some("Select a tag to edit"));
                    return;
                };
                if session.edit_tile(&key) {
                    session.presenter.open_edit_form(key);
                } else {
                    session
                        .presenter
                        .set_status_message(Some("That tag is no longer on the server"));
                }
            }
            Action::DeleteTag => {
                if !session.presenter.open_delete_confirm() {
                    session.presenter.set_status_message(Some("Select a tag to delete"));
                }
            }
            Action::StartFilter => session.presenter.begin_filter(),
            Action::Resync => match session.controller.request_retrieval() {
                Ok(()) => session
                    .presenter
                    .set_status_message(Some("Requested the full tag list")),
                Err(err) => {
                    tracing::error!(?err, "failed to request tag list");
                    session
                        .presenter
                        .set_status_message(Some(format!("Resync failed: {err}")));
                }
            },
            Action::ClearNotifications => session.presenter.clear_toasts(),
            Action::ToggleHelp => session.presenter.toggle_help(),
        }
    }

    fn handle_filter_key(&mut self, key: KeyEvent) {
        let mut session = self.session.lock();
        let view = &mut session.presenter;
        match key.code {
            KeyCode::Esc => view.cancel_filter(),
            KeyCode::Enter => view.finish_filter(),
            KeyCode::Backspace => view.pop_filter_char(),
            KeyCode::Char(ch)
                if !key.modifiers.intersects(
                    KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                ) =>
            {
                view.push_filter_char(ch)
            }
            _ => {}
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        let overlay = self.session.lock().presenter.overlay().cloned();
        match overlay {
            Some(OverlayState::Form(form)) => {
                let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
                match key.code {
                    KeyCode::Esc => {
                        let mut session = self.session.lock();
                        session.presenter.close_overlay();
                        session.presenter.set_status_message(Some("Canceled"));
                    }
                    KeyCode::Enter => {
                        let action = match form.mode {
                            FormMode::Add => FormAction::Add,
                            FormMode::Edit { original } => FormAction::Update { original },
                        };
                        self.submit_form(action);
                    }
                    KeyCode::Char('d') if ctrl && matches!(form.mode, FormMode::Edit { .. }) => {
                        self.submit_form(FormAction::Delete);
                    }
                    KeyCode::Char('e') if ctrl => self.fill_random(FixtureKind::Epc),
                    KeyCode::Char('s') if ctrl => self.fill_random(FixtureKind::Iso),
                    KeyCode::Char('p') if ctrl => self.fill_random(FixtureKind::Proprietary),
                    KeyCode::Tab | KeyCode::Down => self.session.lock().presenter.form_focus_step(1),
                    KeyCode::BackTab | KeyCode::Up => {
                        self.session.lock().presenter.form_focus_step(-1)
                    }
                    KeyCode::Backspace => self.session.lock().presenter.form_pop_char(),
                    KeyCode::Char(ch)
                        if !key.modifiers.intersects(
                            KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                        ) =>
                    {
                        self.session.lock().presenter.form_push_char(ch);
                    }
                    _ => {}
                }
                true
            }
            Some(OverlayState::ConfirmDelete(draft)) => {
                match key.code {
                    KeyCode::Esc => {
                        let mut session = self.session.lock();
                        session.presenter.close_overlay();
                        session.presenter.set_status_message(Some("Delete canceled"));
                    }
                    KeyCode::Enter => {
                        let loaded = self.session.lock().edit_tile(&draft.key);
                        if loaded {
                            self.submit_form(FormAction::Delete);
                        } else {
                            let mut session = self.session.lock();
                            session.presenter.close_overlay();
                            session
                                .presenter
                                .set_status_message(Some("That tag is no longer on the server"));
                        }
                    }
                    _ => {}
                }
                true
            }
            Some(OverlayState::Help) => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')) {
                    self.session.lock().presenter.close_overlay();
                }
                true
            }
            None => false,
        }
    }

    fn submit_form(&mut self, action: FormAction) {
        let label = match &action {
            FormAction::Add => "add",
            FormAction::Delete => "delete",
            FormAction::Update { .. } => "update",
        };
        let mut session = self.session.lock();
        match session.submit_form(action) {
            Ok(token) => {
                tracing::debug!(%token, label, "form submitted");
                session.presenter.close_overlay();
                session
                    .presenter
                    .set_status_message(Some(format!("Waiting for the server to confirm the {label}")));
            }
            Err(err) => {
                tracing::error!(?err, label, "form submission failed");
                session
                    .presenter
                    .set_status_message(Some(format!("Could not {label}: {err}")));
            }
        }
    }

    fn fill_random(&mut self, kind: FixtureKind) {
        let mut session = self.session.lock();
        if let Err(err) = session.presenter.fill_random(&mut rand::thread_rng(), kind) {
            tracing::error!(?err, %kind, "failed to generate tag");
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::thread;

    use super::*;
    use crate::connection::testing::{MemoryConnector, MemoryLink};
    use crate::model::Tag;
    use crate::sync::testing::inbound;

    fn app() -> anyhow::Result<(App, MemoryLink)> {
        let mut config = AppConfig::default();
        config.connection.poll_interval_ms = 5;
        let link = MemoryLink::default();
        let connector = MemoryConnector {
            link: link.clone(),
            opened: Arc::new(AtomicU64::new(0)),
        };
        let app = App::with_connector(Arc::new(config), connector)?;
        Ok((app, link))
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn ctrl(app: &mut App, ch: char) {
        app.handle_key(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL));
    }

    fn type_text(app: &mut App, text: &str) {
        for ch in text.chars() {
            press(app, KeyCode::Char(ch));
        }
    }

    fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        let until = Instant::now() + Duration::from_secs(2);
        while Instant::now() < until {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    fn sent_types(link: &MemoryLink) -> Vec<String> {
        link.sent()
            .iter()
            .filter_map(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .map(|frame| frame["updateType"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn typed_form_is_sent_as_add() -> anyhow::Result<()> {
        let (mut app, link) = app()?;
        press(&mut app, KeyCode::Char('a'));
        type_text(&mut app, "E280");
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "3000");
        press(&mut app, KeyCode::Enter);

        assert!(wait_for(|| sent_types(&link).contains(&"add".to_string())));
        let add = link
            .sent()
            .into_iter()
            .find(|raw| raw.contains("\"add\""))
            .unwrap_or_default();
        let frame: serde_json::Value = serde_json::from_str(&add)?;
        assert_eq!(frame["tag"]["epc"], "E280");
        assert_eq!(frame["tag"]["pcBits"], "3000");

        let session = app.session().lock();
        assert!(session.presenter.overlay().is_none());
        assert_eq!(session.controller.pending_count(), 1);
        Ok(())
    }

    #[test]
    fn editing_a_tile_sends_delete_then_add() -> anyhow::Result<()> {
        let (mut app, link) = app()?;
        assert!(wait_for(|| sent_types(&link) == ["retrieve"]));
        let original = Tag::new("AA", "3000", "18", "96", "01");
        link.push_inbound(&inbound("add", &original));
        assert!(wait_for(|| app.session().lock().controller.store().len() == 1));

        press(&mut app, KeyCode::Enter);
        for _ in 0..4 {
            press(&mut app, KeyCode::Tab);
        }
        press(&mut app, KeyCode::Backspace);
        type_text(&mut app, "2");
        press(&mut app, KeyCode::Enter);

        assert!(wait_for(|| sent_types(&link) == ["retrieve", "delete", "add"]));
        assert!(link.sent()[2].contains("\"readData\":\"02\""));
        Ok(())
    }

    #[test]
    fn random_fill_and_cancel_leave_nothing_pending() -> anyhow::Result<()> {
        let (mut app, _link) = app()?;
        press(&mut app, KeyCode::Char('a'));
        ctrl(&mut app, 's');
        {
            let session = app.session().lock();
            assert!(!session.presenter.form().epc.is_empty());
        }
        press(&mut app, KeyCode::Esc);

        let session = app.session().lock();
        assert!(session.presenter.overlay().is_none());
        assert_eq!(session.presenter.status_message(), Some("Canceled"));
        assert!(!session.controller.is_pending());
        Ok(())
    }

    #[test]
    fn delete_needs_confirmation() -> anyhow::Result<()> {
        let (mut app, link) = app()?;
        assert!(wait_for(|| sent_types(&link) == ["retrieve"]));
        link.push_inbound(&inbound("add", &Tag::new("BB", "3000", "18", "96", "01")));
        assert!(wait_for(|| app.session().lock().controller.store().len() == 1));

        press(&mut app, KeyCode::Char('d'));
        assert!(matches!(
            app.session().lock().presenter.overlay(),
            Some(OverlayState::ConfirmDelete(_))
        ));
        press(&mut app, KeyCode::Enter);
        assert!(wait_for(|| sent_types(&link) == ["retrieve", "delete"]));
        Ok(())
    }

    #[test]
    fn quit_key_stops_the_loop() -> anyhow::Result<()> {
        let (mut app, _link) = app()?;
        press(&mut app, KeyCode::Char('q'));
        assert!(app.should_quit);
        Ok(())
    }
}
