use std::fmt::{Display, Formatter};

use chrono::{Local, NaiveDateTime, Timelike};
use serde::Serialize;

pub const HEADER: &str = "Start Time,End Time,Total Time,Description";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FIELD_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration: String,
    pub description: String,
}

impl Record {
    pub fn provisional(start: NaiveDateTime, description: impl Into<String>) -> Self {
        let start = whole_seconds(start);
        Self {
            start,
            end: start,
            duration: format_duration(0),
            description: description.into(),
        }
    }

    /// An `end` before `start` is clamped to `start`.
    pub fn spanning(
        start: NaiveDateTime,
        end: NaiveDateTime,
        description: impl Into<String>,
    ) -> Self {
        let start = whole_seconds(start);
        let end = whole_seconds(end).max(start);
        Self {
            start,
            end,
            duration: format_duration((end - start).num_seconds()),
            description: description.into(),
        }
    }

    pub fn elapsed_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    pub fn is_provisional(&self) -> bool {
        self.end == self.start
    }

    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{}",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT),
            self.duration,
            escape_description(&self.description)
        )
    }

    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches('\r');
        let fields = split_fields(line)?;
        if fields.len() < FIELD_COUNT {
            return Err(ParseError::FieldCount {
                found: fields.len(),
            });
        }

        let start = parse_timestamp("start", &fields[0])?;
        let end = parse_timestamp("end", &fields[1])?;
        if end < start {
            return Err(ParseError::EndBeforeStart);
        }

        // Unquoted legacy descriptions may contain commas.
        let description = fields[3..].join(",");

        Ok(Self {
            start,
            end,
            duration: fields[2].trim().to_string(),
            description,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    FieldCount { found: usize },
    Timestamp { field: &'static str, value: String },
    EndBeforeStart,
    Duration(String),
    UnterminatedQuote,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::FieldCount { found } => {
                write!(f, "expected {FIELD_COUNT} fields, found {found}")
            }
            ParseError::Timestamp { field, value } => {
                write!(f, "invalid {field} timestamp: {value:?}")
            }
            ParseError::EndBeforeStart => write!(f, "end time is before start time"),
            ParseError::Duration(value) => write!(f, "invalid duration text: {value:?}"),
            ParseError::UnterminatedQuote => write!(f, "unterminated quoted field"),
        }
    }
}

impl std::error::Error for ParseError {}

pub fn whole_seconds(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}

pub fn local_now() -> NaiveDateTime {
    whole_seconds(Local::now().naive_local())
}

/// `HH:MM`, zero padded, hours not wrapped at 24. Sub-minute precision is dropped.
pub fn format_duration(seconds: i64) -> String {
    let total_seconds = seconds.max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    format!("{hours:02}:{minutes:02}")
}

pub fn parse_duration_text(text: &str) -> Result<i64, ParseError> {
    let invalid = || ParseError::Duration(text.to_string());
    let (hours, minutes) = text.trim().split_once(':').ok_or_else(invalid)?;
    let hours: i64 = hours.parse().map_err(|_| invalid())?;
    let minutes: i64 = minutes.parse().map_err(|_| invalid())?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    Ok(hours * 3600 + minutes * 60)
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<NaiveDateTime, ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).map_err(|_| {
        ParseError::Timestamp {
            field,
            value: value.to_string(),
        }
    })
}

fn escape_description(description: &str) -> String {
    let single_line = description.replace("\r\n", " ").replace(['\r', '\n'], " ");
    if single_line.contains([',', '"']) {
        format!("\"{}\"", single_line.replace('"', "\"\""))
    } else {
        single_line
    }
}

fn split_fields(line: &str) -> Result<Vec<String>, ParseError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err(ParseError::UnterminatedQuote);
    }
    fields.push(current);
    Ok(fields)
}
