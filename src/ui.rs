use std::error::Error;
use std::io;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, ExecutableCommand};
use log::{info, warn};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};

use crate::config::{save_settings, settings_path, Config, MAX_TRACKING_INTERVAL, MIN_TRACKING_INTERVAL};
use crate::record::{format_duration, local_now, TIMESTAMP_FORMAT};
use crate::scheduler::TickScheduler;
use crate::session::{Session, SessionState};

const ACTIVE_COLOR: Color = Color::Green;
const IDLE_COLOR: Color = Color::DarkGray;
const START_ERROR: &str = "cannot start tracking: check the file path and its permissions (d/+/- to change settings)";

pub fn run_dashboard(session: &mut Session, config: &mut Config) -> Result<(), Box<dyn Error>> {
	enable_raw_mode()?;
	let mut stdout = io::stdout();
	stdout.execute(EnterAlternateScreen)?;
	let backend = CrosstermBackend::new(stdout);
	let mut terminal = Terminal::new(backend)?;

	let result = run_event_loop(&mut terminal, session, config);

	disable_raw_mode()?;
	execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
	terminal.show_cursor()?;

	result
}

fn run_event_loop(
	terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
	session: &mut Session,
	config: &mut Config,
) -> Result<(), Box<dyn Error>> {
	let mut app = App::new(session);
	let mut scheduler = TickScheduler::new(Instant::now());
	let mut dirty = true;

	loop {
		let report = scheduler.dispatch(session, Instant::now(), local_now());
		if let Some(persisted) = report.persisted {
			app.status = match persisted {
				Ok(elapsed) => format!("saved {} to the ledger", format_duration(elapsed)),
				Err(err) => format!("failed to update the ledger, retrying next tick: {err}"),
			};
			dirty = true;
		}

		if report.redraw || dirty {
			let now = local_now();
			let view = ViewModel::build(session, config, &scheduler, now);
			terminal.draw(|frame| draw_dashboard(frame, &app, &view))?;
			dirty = false;
		}

		if !event::poll(scheduler.time_until_next(Instant::now()))? {
			continue;
		}
		match event::read()? {
			CEvent::Key(key) if key.kind == KeyEventKind::Press => {
				let should_quit = match &app.mode {
					InputMode::Prompt(_) => handle_prompt_key(&mut app, key.code, session),
					InputMode::Normal => handle_normal_key(&mut app, key.code, session, config),
				};
				scheduler.sync_with(session, Instant::now());
				dirty = true;

				if should_quit {
					break;
				}
			}
			CEvent::Resize(_, _) => dirty = true,
			_ => {}
		}
	}

	Ok(())
}

fn draw_dashboard(frame: &mut Frame, app: &App, view: &ViewModel) {
	let layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([
			Constraint::Length(3),
			Constraint::Length(9),
			Constraint::Min(0),
			Constraint::Length(4),
		])
		.split(frame.area());

	render_clock_panel(frame, layout[0], view);
	render_session_panel(frame, layout[1], view);
	render_footer(frame, layout[3], app, view);
}

fn render_clock_panel(frame: &mut Frame, area: Rect, view: &ViewModel) {
	let panel = Paragraph::new(Line::from(Span::styled(
		view.clock.clone(),
		Style::default().add_modifier(Modifier::BOLD),
	)))
	.alignment(Alignment::Center)
	.block(Block::default().borders(Borders::ALL).title("Time Tracker"));
	frame.render_widget(panel, area);
}

fn render_session_panel(frame: &mut Frame, area: Rect, view: &ViewModel) {
	let (state_text, state_color) = match view.started_at {
		Some(started_at) => (format!("tracking since {}", started_at.format("%H:%M:%S")), ACTIVE_COLOR),
		None => ("idle".to_string(), IDLE_COLOR),
	};

	let lines = vec![
		Line::from(vec![
			Span::raw("State     "),
			Span::styled(state_text, Style::default().fg(state_color)),
		]),
		Line::from(format!("Current   {}", view.current)),
		Line::from(format!("Before    {}", view.prior)),
		Line::from(Span::styled(
			format!("Total     {}", view.total),
			Style::default().add_modifier(Modifier::BOLD),
		)),
		Line::from(format!("Task      {}", view.description)),
		Line::from(format!("Ledger    {}", view.ledger)),
		Line::from(format!("Interval  {}", view.interval)),
	];

	let panel = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Session"));
	frame.render_widget(panel, area);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App, view: &ViewModel) {
	let footer_lines = match &app.mode {
		InputMode::Normal => vec![
			Line::from(if view.started_at.is_some() {
				"x stop | q stop and quit"
			} else if view.dated_ledger {
				"s start | +/- interval | r reload | q quit"
			} else {
				"s start | d today's ledger | +/- interval | r reload | q quit"
			}),
			Line::from(app.status.clone()),
		],
		InputMode::Prompt(prompt) => vec![
			Line::from(prompt.title.clone()),
			Line::from(format!("> {}", prompt.input)),
		],
	};

	let footer = Paragraph::new(footer_lines).block(Block::default().borders(Borders::ALL).title("Shortcuts"));
	frame.render_widget(footer, area);
}

fn handle_normal_key(app: &mut App, code: KeyCode, session: &mut Session, config: &mut Config) -> bool {
	match code {
		KeyCode::Char('q') | KeyCode::Esc => {
			if session.is_active() {
				app.mode = InputMode::Prompt(PromptState::new(
					"Description before quitting (Enter save | Esc keep previous)",
					session.description(),
					PromptKind::StopDescription { then_quit: true },
				));
				return false;
			}
			return true;
		}
		KeyCode::Char('s') => {
			if session.is_active() {
				app.status = "already tracking".to_string();
			} else if !session.is_initialized() {
				app.status = START_ERROR.to_string();
			} else {
				app.mode = InputMode::Prompt(PromptState::new(
					"Description (Enter save | Esc none)",
					session.description(),
					PromptKind::StartDescription,
				));
			}
		}
		KeyCode::Char('x') => {
			if session.is_active() {
				app.mode = InputMode::Prompt(PromptState::new(
					"Description (Enter save | Esc keep previous)",
					session.description(),
					PromptKind::StopDescription { then_quit: false },
				));
			} else {
				app.status = "not tracking".to_string();
			}
		}
		KeyCode::Char('d') => {
			let next = config.with_dated_file_name(Local::now().date_naive());
			apply_config(app, session, config, next);
		}
		KeyCode::Char('+') => {
			let minutes = (config.tracking_interval_minutes + 1).min(MAX_TRACKING_INTERVAL);
			change_interval(app, session, config, minutes);
		}
		KeyCode::Char('-') => {
			let minutes = config.tracking_interval_minutes.saturating_sub(1).max(MIN_TRACKING_INTERVAL);
			change_interval(app, session, config, minutes);
		}
		KeyCode::Char('r') => {
			let current = config.clone();
			apply_config(app, session, config, current);
		}
		_ => {}
	}

	false
}

fn handle_prompt_key(app: &mut App, code: KeyCode, session: &mut Session) -> bool {
	match code {
		KeyCode::Backspace => {
			if let InputMode::Prompt(prompt) = &mut app.mode {
				prompt.input.pop();
			}
			false
		}
		KeyCode::Char(value) => {
			if let InputMode::Prompt(prompt) = &mut app.mode {
				prompt.input.push(value);
			}
			false
		}
		KeyCode::Esc | KeyCode::Enter => {
			let prompt = match std::mem::replace(&mut app.mode, InputMode::Normal) {
				InputMode::Prompt(prompt) => prompt,
				InputMode::Normal => return false,
			};
			let description = if code == KeyCode::Enter {
				Some(prompt.input.trim().to_string())
			} else {
				None
			};
			submit_prompt(app, prompt.kind, description, session)
		}
		_ => false,
	}
}

fn submit_prompt(app: &mut App, kind: PromptKind, description: Option<String>, session: &mut Session) -> bool {
	let now = local_now();
	match kind {
		PromptKind::StartDescription => {
			app.status = match session.start(description, now) {
				Ok(()) => format!("started at {}", now.format(TIMESTAMP_FORMAT)),
				Err(err) => format!("error: {err}"),
			};
			false
		}
		PromptKind::StopDescription { then_quit } => {
			app.status = match session.stop(description, now) {
				Ok(elapsed) => format!("stopped after {}", format_duration(elapsed)),
				Err(err) => format!("stopped, but the ledger was not updated: {err}"),
			};
			then_quit
		}
	}
}

fn change_interval(app: &mut App, session: &mut Session, config: &mut Config, minutes: u32) {
	match config.with_tracking_interval(minutes) {
		Ok(next) => apply_config(app, session, config, next),
		Err(err) => app.status = format!("error: {err}"),
	}
}

fn apply_config(app: &mut App, session: &mut Session, config: &mut Config, next: Config) {
	if session.is_active() {
		app.status = "settings are disabled while tracking".to_string();
		return;
	}

	if let Err(err) = next.validate() {
		app.status = format!("error: {err}");
		return;
	}
	if let Err(err) = save_settings(&settings_path(), &next) {
		warn!("settings not stored: {err}");
	}

	*config = next;
	info!("configuration changed to {}", config.file_path.display());
	app.status = match session.initialize(config) {
		Ok(()) => format!("using {}", config.file_path.display()),
		Err(err) => format!("error: {err}"),
	};
}

#[derive(Debug)]
struct ViewModel {
	clock: String,
	started_at: Option<NaiveDateTime>,
	current: String,
	prior: String,
	total: String,
	description: String,
	ledger: String,
	interval: String,
	dated_ledger: bool,
}

impl ViewModel {
	fn build(session: &Session, config: &Config, scheduler: &TickScheduler, now: NaiveDateTime) -> Self {
		let started_at = match session.state() {
			SessionState::Active { started_at } => Some(started_at),
			SessionState::Idle => None,
		};
		let ledger = match session.ledger_path() {
			Some(path) => path.display().to_string(),
			None => format!("{} (unavailable)", config.file_path.display()),
		};
		let interval = if scheduler.is_persistence_armed() {
			format!("{} min, saving while tracking", config.tracking_interval_minutes)
		} else {
			format!("{} min", config.tracking_interval_minutes)
		};

		Self {
			clock: now.format("%H:%M:%S").to_string(),
			started_at,
			current: format_duration(session.current_session_seconds(now)),
			prior: format_duration(session.accumulated_prior_seconds()),
			total: format_duration(session.grand_total_seconds(now)),
			description: if session.description().is_empty() {
				"(no description)".to_string()
			} else {
				session.description().to_string()
			},
			ledger,
			interval,
			dated_ledger: config.has_dated_file_name(now.date()),
		}
	}
}

#[derive(Debug)]
struct App {
	mode: InputMode,
	status: String,
}

impl App {
	fn new(session: &Session) -> Self {
		let status = if session.is_initialized() {
			"ready".to_string()
		} else {
			START_ERROR.to_string()
		};
		Self {
			mode: InputMode::Normal,
			status,
		}
	}
}

#[derive(Debug)]
enum InputMode {
	Normal,
	Prompt(PromptState),
}

#[derive(Debug, Clone)]
struct PromptState {
	title: String,
	input: String,
	kind: PromptKind,
}

impl PromptState {
	fn new(title: impl Into<String>, prefill: &str, kind: PromptKind) -> Self {
		Self {
			title: title.into(),
			input: prefill.to_string(),
			kind,
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum PromptKind {
	StartDescription,
	StopDescription { then_quit: bool },
}
