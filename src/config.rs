use std::env;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::ledger::{LedgerError, LedgerStore};

const SETTINGS_FILE: &str = "settings.toml";
const LOG_FILE: &str = "worktime.log";
const DATED_FILE_FORMAT: &str = "%Y-%m-%d";

pub const DEFAULT_TRACKING_INTERVAL: u32 = 1;
pub const MIN_TRACKING_INTERVAL: u32 = 1;
pub const MAX_TRACKING_INTERVAL: u32 = 10;

#[derive(Debug)]
pub enum ConfigError {
	Io(std::io::Error),
	TomlDecode(toml::de::Error),
	TomlEncode(toml::ser::Error),
	EmptyPath,
	MissingDirectory(PathBuf),
	IntervalOutOfRange(u32),
	Ledger(LedgerError),
}

impl Display for ConfigError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			ConfigError::Io(err) => write!(f, "io error: {err}"),
			ConfigError::TomlDecode(err) => write!(f, "failed to parse settings: {err}"),
			ConfigError::TomlEncode(err) => write!(f, "failed to encode settings: {err}"),
			ConfigError::EmptyPath => write!(f, "file path cannot be empty"),
			ConfigError::MissingDirectory(dir) => write!(f, "{} does not exist", dir.display()),
			ConfigError::IntervalOutOfRange(value) => write!(
				f,
				"tracking interval must be between {MIN_TRACKING_INTERVAL} and {MAX_TRACKING_INTERVAL} minutes, got {value}"
			),
			ConfigError::Ledger(err) => write!(f, "cannot prepare ledger: {err}"),
		}
	}
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	pub file_path: PathBuf,
	pub tracking_interval_minutes: u32,
}

impl Config {
	pub fn new(file_path: impl Into<PathBuf>, tracking_interval_minutes: u32) -> Self {
		Self {
			file_path: file_path.into(),
			tracking_interval_minutes,
		}
	}

	pub fn tracking_interval(&self) -> Duration {
		Duration::from_secs(u64::from(self.tracking_interval_minutes.max(MIN_TRACKING_INTERVAL)) * 60)
	}

	pub fn with_dated_file_name(&self, date: NaiveDate) -> Self {
		let name = date.format(DATED_FILE_FORMAT).to_string();
		let file_path = match self.file_path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
			_ => PathBuf::from(name),
		};
		Self {
			file_path,
			tracking_interval_minutes: self.tracking_interval_minutes,
		}
	}

	pub fn with_file_path(&self, file_path: PathBuf) -> Self {
		Self {
			file_path: absolutize(file_path),
			tracking_interval_minutes: self.tracking_interval_minutes,
		}
	}

	pub fn with_tracking_interval(&self, minutes: u32) -> Result<Self, ConfigError> {
		check_interval(minutes)?;
		Ok(Self {
			file_path: self.file_path.clone(),
			tracking_interval_minutes: minutes,
		})
	}

	pub fn has_dated_file_name(&self, date: NaiveDate) -> bool {
		self.file_path
			.file_name()
			.is_some_and(|name| name.to_string_lossy() == date.format(DATED_FILE_FORMAT).to_string())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.file_path.as_os_str().is_empty() {
			return Err(ConfigError::EmptyPath);
		}
		if let Some(parent) = self.file_path.parent() {
			if !parent.as_os_str().is_empty() && !parent.is_dir() {
				return Err(ConfigError::MissingDirectory(parent.to_path_buf()));
			}
		}
		check_interval(self.tracking_interval_minutes)?;
		LedgerStore::open(&self.file_path).map_err(ConfigError::Ledger)?;
		Ok(())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSettings {
	#[serde(rename = "FilePath", default, skip_serializing_if = "Option::is_none")]
	pub file_path: Option<PathBuf>,
	#[serde(rename = "TrackingInterval", default, skip_serializing_if = "Option::is_none")]
	pub tracking_interval: Option<u32>,
}

impl From<&Config> for StoredSettings {
	fn from(config: &Config) -> Self {
		Self {
			file_path: Some(config.file_path.clone()),
			tracking_interval: Some(config.tracking_interval_minutes),
		}
	}
}

pub fn load_settings(path: &Path) -> Result<StoredSettings, ConfigError> {
	let raw = match fs::read_to_string(path) {
		Ok(raw) => raw,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoredSettings::default()),
		Err(err) => return Err(ConfigError::Io(err)),
	};
	toml::from_str(&raw).map_err(ConfigError::TomlDecode)
}

pub fn save_settings(path: &Path, config: &Config) -> Result<(), ConfigError> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent).map_err(ConfigError::Io)?;
		}
	}
	let raw = toml::to_string_pretty(&StoredSettings::from(config)).map_err(ConfigError::TomlEncode)?;
	fs::write(path, raw).map_err(ConfigError::Io)?;
	debug!("saved settings to {}", path.display());
	Ok(())
}

/// Ledger path precedence: `--ledger`, `WORKTIME_LEDGER`, stored settings,
/// then a file named after today in the state directory.
pub fn resolve_config(
	cli_ledger: Option<PathBuf>,
	cli_interval: Option<u32>,
	today: NaiveDate,
) -> Result<Config, ConfigError> {
	let stored = load_settings(&settings_path())?;
	let config = resolve_from(
		cli_ledger,
		env::var_os("WORKTIME_LEDGER"),
		cli_interval,
		stored,
		&state_dir(),
		today,
	)?;

	if config.file_path.starts_with(state_dir()) {
		fs::create_dir_all(state_dir()).map_err(ConfigError::Io)?;
	}
	Ok(config)
}

fn resolve_from(
	cli_ledger: Option<PathBuf>,
	env_ledger: Option<OsString>,
	cli_interval: Option<u32>,
	stored: StoredSettings,
	state_dir: &Path,
	today: NaiveDate,
) -> Result<Config, ConfigError> {
	let file_path = cli_ledger
		.map(absolutize)
		.or_else(|| {
			env_ledger
				.filter(|raw| !raw.is_empty())
				.map(|raw| absolutize(PathBuf::from(raw)))
		})
		.or(stored.file_path)
		.unwrap_or_else(|| state_dir.join(today.format(DATED_FILE_FORMAT).to_string()));

	let tracking_interval_minutes = cli_interval
		.or(stored.tracking_interval)
		.unwrap_or(DEFAULT_TRACKING_INTERVAL);
	check_interval(tracking_interval_minutes)?;

	Ok(Config::new(file_path, tracking_interval_minutes))
}

fn check_interval(minutes: u32) -> Result<(), ConfigError> {
	if (MIN_TRACKING_INTERVAL..=MAX_TRACKING_INTERVAL).contains(&minutes) {
		Ok(())
	} else {
		Err(ConfigError::IntervalOutOfRange(minutes))
	}
}

pub fn settings_path() -> PathBuf {
	state_dir().join(SETTINGS_FILE)
}

pub fn log_file_path() -> PathBuf {
	state_dir().join(LOG_FILE)
}

pub fn state_dir() -> PathBuf {
	if let Some(path) = env::var_os("WORKTIME_STATE_DIR") {
		return PathBuf::from(path);
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("LOCALAPPDATA") {
			return PathBuf::from(path).join("worktime");
		}
	}

	if let Some(path) = env::var_os("XDG_STATE_HOME") {
		return PathBuf::from(path).join("worktime");
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path)
			.join(".local")
			.join("state")
			.join("worktime");
	}

	PathBuf::from(".worktime")
}

fn absolutize(path: PathBuf) -> PathBuf {
	if path.is_absolute() {
		path
	} else if let Ok(cwd) = env::current_dir() {
		cwd.join(path)
	} else {
		path
	}
}

#[cfg(test)]
mod tests {
	use std::ffi::OsString;
	use std::fs;
	use std::path::{Path, PathBuf};

	use chrono::NaiveDate;

	use crate::record::HEADER;

	use super::{
		Config, ConfigError, StoredSettings, load_settings, resolve_from, save_settings,
	};

	fn today() -> NaiveDate {
		NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
	}

	#[test]
	fn cli_path_wins_over_env_and_settings() {
		let stored = StoredSettings {
			file_path: Some(PathBuf::from("/stored/ledger")),
			tracking_interval: Some(5),
		};
		let config = resolve_from(
			Some(PathBuf::from("/cli/ledger")),
			Some(OsString::from("/env/ledger")),
			None,
			stored,
			Path::new("/state"),
			today(),
		)
		.unwrap();
		assert_eq!(config.file_path, PathBuf::from("/cli/ledger"));
		assert_eq!(config.tracking_interval_minutes, 5);
	}

	#[test]
	fn falls_back_through_env_settings_and_default() {
		let stored = StoredSettings {
			file_path: Some(PathBuf::from("/stored/ledger")),
			tracking_interval: None,
		};
		let from_env = resolve_from(
			None,
			Some(OsString::from("/env/ledger")),
			Some(3),
			stored.clone(),
			Path::new("/state"),
			today(),
		)
		.unwrap();
		assert_eq!(from_env.file_path, PathBuf::from("/env/ledger"));
		assert_eq!(from_env.tracking_interval_minutes, 3);

		let from_settings = resolve_from(None, Some(OsString::new()), None, stored, Path::new("/state"), today())
			.unwrap();
		assert_eq!(from_settings.file_path, PathBuf::from("/stored/ledger"));
		assert_eq!(from_settings.tracking_interval_minutes, 1);

		let fallback = resolve_from(None, None, None, StoredSettings::default(), Path::new("/state"), today())
			.unwrap();
		assert_eq!(fallback.file_path, PathBuf::from("/state/2024-03-15"));
	}

	#[test]
	fn rejects_interval_outside_range() {
		let result = resolve_from(
			Some(PathBuf::from("/cli/ledger")),
			None,
			Some(11),
			StoredSettings::default(),
			Path::new("/state"),
			today(),
		);
		assert!(matches!(result, Err(ConfigError::IntervalOutOfRange(11))));
		assert!(Config::new("/a/b", 1).with_tracking_interval(0).is_err());
		assert_eq!(
			Config::new("/a/b", 1).with_tracking_interval(10).unwrap().tracking_interval().as_secs(),
			600
		);
	}

	#[test]
	fn dated_file_name_keeps_directory() {
		let config = Config::new("/data/timesheets/old-name", 2);
		let dated = config.with_dated_file_name(today());
		assert_eq!(dated.file_path, PathBuf::from("/data/timesheets/2024-03-15"));
		assert_eq!(dated.tracking_interval_minutes, 2);
		assert!(dated.has_dated_file_name(today()));
		assert!(!config.has_dated_file_name(today()));
	}

	#[test]
	fn validate_creates_ledger_with_header() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config::new(dir.path().join("work"), 1);
		config.validate().expect("config should validate");
		let raw = fs::read_to_string(dir.path().join("work.csv")).unwrap();
		assert_eq!(raw, format!("{HEADER}\n"));

		let missing = Config::new(dir.path().join("nope").join("work"), 1);
		assert!(matches!(missing.validate(), Err(ConfigError::MissingDirectory(_))));
		assert!(matches!(Config::new("", 1).validate(), Err(ConfigError::EmptyPath)));
	}

	#[test]
	fn settings_survive_save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("settings.toml");
		assert_eq!(load_settings(&path).unwrap(), StoredSettings::default());

		let config = Config::new("/data/2024-03-15", 4);
		save_settings(&path, &config).unwrap();
		let raw = fs::read_to_string(&path).unwrap();
		assert!(raw.contains("TrackingInterval = 4"));

		let loaded = load_settings(&path).unwrap();
		assert_eq!(loaded.file_path, Some(PathBuf::from("/data/2024-03-15")));
		assert_eq!(loaded.tracking_interval, Some(4));
	}
}
