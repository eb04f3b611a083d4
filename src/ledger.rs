use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::record::{HEADER, ParseError, Record, TIMESTAMP_FORMAT};

const LEDGER_EXTENSION: &str = ".csv";

pub type RecordEntry = Result<Record, ParseError>;

#[derive(Debug)]
pub enum LedgerError {
    MissingDirectory(PathBuf),
    Io(std::io::Error),
    NoRecords,
    MalformedLastRecord(ParseError),
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::MissingDirectory(dir) => {
                write!(f, "ledger directory does not exist: {}", dir.display())
            }
            LedgerError::Io(err) => write!(f, "io error: {err}"),
            LedgerError::NoRecords => write!(f, "ledger has no record to update"),
            LedgerError::MalformedLastRecord(err) => {
                write!(f, "last ledger record is malformed: {err}")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

// Holds no cached records: every read goes back to the file.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

pub fn ledger_file_path(base: &Path) -> PathBuf {
    let mut raw = OsString::from(base.as_os_str());
    raw.push(LEDGER_EXTENSION);
    PathBuf::from(raw)
}

impl LedgerStore {
    pub fn open(base: &Path) -> Result<Self, LedgerError> {
        let path = ledger_file_path(base);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(LedgerError::MissingDirectory(parent.to_path_buf()));
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(LedgerError::Io)?;
        let len = file.metadata().map_err(LedgerError::Io)?.len();
        if len == 0 {
            file.write_all(format!("{HEADER}\n").as_bytes())
                .map_err(LedgerError::Io)?;
            info!("created ledger {}", path.display());
        } else {
            debug!("opened ledger {}", path.display());
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_provisional(&self, record: &Record) -> Result<(), LedgerError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(LedgerError::Io)?;

        let mut line = String::new();
        if !ends_with_newline(&mut file)? {
            line.push('\n');
        }
        line.push_str(&record.to_line());
        line.push('\n');

        file.write_all(line.as_bytes()).map_err(LedgerError::Io)?;
        debug!("appended provisional record starting {}", record.start.format(TIMESTAMP_FORMAT));
        Ok(())
    }

    /// Rewrites the file with only the final record replaced. Every earlier
    /// line is written back untouched.
    pub fn update_last_record(
        &self,
        new_end: NaiveDateTime,
        duration_text: &str,
        description: &str,
    ) -> Result<(), LedgerError> {
        self.rewrite_last_line(|last| {
            let current = Record::parse_line(last).map_err(LedgerError::MalformedLastRecord)?;
            let updated = Record {
                duration: duration_text.to_string(),
                ..Record::spanning(current.start, new_end, description)
            };
            Ok(updated.to_line())
        })?;
        debug!("updated last record of {}", self.path.display());
        Ok(())
    }

    pub fn read_entries(&self) -> Result<Vec<RecordEntry>, LedgerError> {
        let raw = fs::read_to_string(&self.path).map_err(LedgerError::Io)?;
        let mut lines = raw.lines();
        if let Some(header) = lines.next() {
            if header.trim_end_matches('\r') != HEADER {
                warn!("unexpected ledger header in {}: {header:?}", self.path.display());
            }
        }

        Ok(lines
            .filter(|line| !line.trim().is_empty())
            .map(Record::parse_line)
            .collect())
    }

    pub fn read_all(&self) -> Result<Vec<Record>, LedgerError> {
        let mut records = Vec::new();
        for (index, entry) in self.read_entries()?.into_iter().enumerate() {
            match entry {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    "skipping record {} of {}: {err}",
                    index + 1,
                    self.path.display()
                ),
            }
        }
        Ok(records)
    }

    pub fn is_provisional_last_record(&self) -> Result<bool, LedgerError> {
        let entries = self.read_entries()?;
        Ok(matches!(entries.last(), Some(Ok(record)) if record.is_provisional()))
    }

    fn rewrite_last_line<F>(&self, replace: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&str) -> Result<String, LedgerError>,
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(LedgerError::Io)?;
        let mut raw = String::new();
        file.read_to_string(&mut raw).map_err(LedgerError::Io)?;

        let mut lines = raw.split('\n').collect::<Vec<_>>();
        while lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }
        if lines.len() < 2 {
            return Err(LedgerError::NoRecords);
        }
        let Some(last) = lines.pop() else {
            return Err(LedgerError::NoRecords);
        };

        let mut output = String::with_capacity(raw.len() + 64);
        for line in &lines {
            output.push_str(line);
            output.push('\n');
        }
        output.push_str(&replace(last)?);
        output.push('\n');

        file.set_len(0).map_err(LedgerError::Io)?;
        file.seek(SeekFrom::Start(0)).map_err(LedgerError::Io)?;
        file.write_all(output.as_bytes()).map_err(LedgerError::Io)?;
        file.flush().map_err(LedgerError::Io)
    }
}

fn ends_with_newline(file: &mut File) -> Result<bool, LedgerError> {
    let len = file.metadata().map_err(LedgerError::Io)?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1)).map_err(LedgerError::Io)?;
    file.read_exact(&mut last).map_err(LedgerError::Io)?;
    Ok(last[0] == b'\n')
}
