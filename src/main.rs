mod aggregate;
mod config;
mod ledger;
mod record;
mod scheduler;
mod session;
mod ui;

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::warn;

use crate::aggregate::{compute_total, daily_totals};
use crate::config::{Config, ConfigError, log_file_path, resolve_config, save_settings, settings_path, state_dir};
use crate::ledger::{LedgerError, LedgerStore, ledger_file_path};
use crate::record::{Record, TIMESTAMP_FORMAT, format_duration, parse_duration_text};
use crate::session::Session;
use crate::ui::run_dashboard;

#[derive(Debug, Parser)]
#[command(name = "worktime", about = "Work session tracker backed by a CSV ledger")]
struct Cli {
	/// Ledger path without the .csv extension
	#[arg(long)]
	ledger: Option<PathBuf>,
	/// Minutes between ledger updates while tracking (1-10)
	#[arg(long)]
	interval: Option<u32>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Init,
	Dashboard,
	Total,
	Records {
		#[arg(long, default_value_t = 20)]
		limit: usize,
		#[arg(long)]
		json: bool,
	},
	Summary {
		#[arg(long)]
		day: Option<String>,
	},
	Config {
		/// Ledger path without the .csv extension
		#[arg(long)]
		path: Option<PathBuf>,
		/// Minutes between ledger updates while tracking (1-10)
		#[arg(long)]
		interval: Option<u32>,
		/// Name the ledger after today's date, keeping its directory
		#[arg(long)]
		today: bool,
	},
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let command = cli.command.unwrap_or(Command::Dashboard);
	init_logging(matches!(command, Command::Dashboard));

	let today = Local::now().date_naive();
	let mut config = resolve_config(cli.ledger, cli.interval, today)?;

	match command {
		Command::Init => {
			config.validate()?;
			save_settings(&settings_path(), &config)?;
			println!("initialized ledger at {}", ledger_file_path(&config.file_path).display());
		}
		Command::Dashboard => {
			let mut session = Session::new();
			if let Err(err) = session.initialize(&config) {
				warn!("starting without a usable ledger: {err}");
			}
			run_dashboard(&mut session, &mut config)?;
		}
		Command::Total => {
			print_total(&config)?;
		}
		Command::Records { limit, json } => {
			print_records(&config, limit, json)?;
		}
		Command::Summary { day } => {
			print_summary(&config, day.as_deref())?;
		}
		Command::Config {
			path,
			interval,
			today: use_today,
		} => {
			config = apply_overrides(&config, path, interval, use_today.then_some(today))?;
			config.validate()?;
			save_settings(&settings_path(), &config)?;
			println!("FilePath = {}", config.file_path.display());
			println!("TrackingInterval = {}", config.tracking_interval_minutes);
		}
	}

	Ok(())
}

fn init_logging(to_file: bool) {
	let mut builder =
		env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn,worktime=info"));

	if to_file {
		let opened = fs::create_dir_all(state_dir()).and_then(|()| {
			OpenOptions::new()
				.create(true)
				.append(true)
				.open(log_file_path())
		});
		match opened {
			Ok(file) => {
				builder.target(env_logger::Target::Pipe(Box::new(file)));
			}
			Err(err) => {
				eprintln!("warning: cannot open log file, logging disabled: {err}");
				builder.filter_level(log::LevelFilter::Off);
			}
		}
	}

	builder.init();
}

fn apply_overrides(
	config: &Config,
	path: Option<PathBuf>,
	interval: Option<u32>,
	dated: Option<NaiveDate>,
) -> Result<Config, ConfigError> {
	let mut next = match path {
		Some(path) => config.with_file_path(path),
		None => config.clone(),
	};
	if let Some(date) = dated {
		next = next.with_dated_file_name(date);
	}
	if let Some(minutes) = interval {
		next = next.with_tracking_interval(minutes)?;
	}
	Ok(next)
}

/// Totals finalized history without touching the file, so it is safe to run
/// next to a dashboard that is tracking.
fn finalized_total(config: &Config) -> Result<i64, LedgerError> {
	let ledger = LedgerStore::open(&config.file_path)?;
	let mut entries = ledger.read_entries()?;
	if ledger.is_provisional_last_record()? {
		entries.pop();
	}
	Ok(compute_total(&entries))
}

fn print_total(config: &Config) -> Result<(), Box<dyn Error>> {
	println!("{}", format_duration(finalized_total(config)?));
	Ok(())
}

fn print_records(config: &Config, limit: usize, json: bool) -> Result<(), Box<dyn Error>> {
	let ledger = LedgerStore::open(&config.file_path)?;
	let records = ledger.read_all()?;
	if records.is_empty() && !json {
		println!("no records in {}", ledger.path().display());
		return Ok(());
	}

	for record in records.iter().rev().take(limit) {
		if json {
			println!("{}", serde_json::to_string(record)?);
		} else {
			println!(
				"{} | {} | {}{} | {}",
				record.start.format(TIMESTAMP_FORMAT),
				record.end.format(TIMESTAMP_FORMAT),
				record.duration,
				duration_note(record),
				record.description
			);
		}
	}

	Ok(())
}

fn duration_note(record: &Record) -> &'static str {
	let expected = record.elapsed_seconds() - record.elapsed_seconds() % 60;
	match parse_duration_text(&record.duration) {
		Ok(seconds) if seconds == expected => "",
		Ok(_) => " (stored total differs from end - start)",
		Err(_) => " (unreadable total)",
	}
}

fn parse_day(input: Option<&str>) -> Result<Option<NaiveDate>, Box<dyn Error>> {
	match input {
		Some(raw) => Ok(Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?)),
		None => Ok(None),
	}
}

fn print_summary(config: &Config, day: Option<&str>) -> Result<(), Box<dyn Error>> {
	let day = parse_day(day)?;
	let ledger = LedgerStore::open(&config.file_path)?;
	let records = ledger.read_all()?;
	let totals = daily_totals(&records);

	if let Some(day) = day {
		let seconds = totals.get(&day).copied().unwrap_or(0);
		println!("{} | {}", format_duration(seconds), day.format("%Y-%m-%d"));
		return Ok(());
	}

	if totals.is_empty() {
		println!("no tracked sessions in {}", ledger.path().display());
		return Ok(());
	}

	for (day, seconds) in &totals {
		println!("{} | {}", format_duration(*seconds), day.format("%Y-%m-%d"));
	}
	println!("{} | total", format_duration(totals.values().sum()));

	Ok(())
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::path::PathBuf;

	use chrono::NaiveDate;

	use crate::config::{Config, ConfigError};
	use crate::ledger::ledger_file_path;
	use crate::record::HEADER;

	use super::{apply_overrides, finalized_total};

	fn day() -> NaiveDate {
		NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
	}

	#[test]
	fn total_skips_provisional_tail_and_leaves_file_alone() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config::new(dir.path().join("ledger"), 1);
		let path = ledger_file_path(&config.file_path);
		let raw = format!(
			"{HEADER}\n\
			 2024-01-01 08:00:00,2024-01-01 09:30:00,01:30,done\n\
			 2024-01-01 10:00:00,2024-01-01 10:00:00,00:00,running\n"
		);
		fs::write(&path, &raw).unwrap();

		assert_eq!(finalized_total(&config).unwrap(), 90 * 60);
		assert_eq!(fs::read_to_string(&path).unwrap(), raw);
	}

	#[test]
	fn config_overrides_apply_path_then_date_then_interval() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config::new(dir.path().join("old"), 1);

		let moved = apply_overrides(&config, Some(dir.path().join("work")), Some(3), None).unwrap();
		assert_eq!(moved, Config::new(dir.path().join("work"), 3));

		let dated = apply_overrides(&config, Some(dir.path().join("work")), None, Some(day())).unwrap();
		assert_eq!(dated.file_path, dir.path().join("2024-03-05"));
		assert_eq!(dated.tracking_interval_minutes, 1);

		assert_eq!(apply_overrides(&config, None, None, None).unwrap(), config);
	}

	#[test]
	fn config_override_rejects_out_of_range_interval() {
		let config = Config::new(PathBuf::from("/tmp/ledger"), 1);
		assert!(matches!(
			apply_overrides(&config, None, Some(11), None),
			Err(ConfigError::IntervalOutOfRange(11))
		));
	}
}
