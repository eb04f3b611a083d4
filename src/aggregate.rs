use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::warn;

use crate::ledger::RecordEntry;
use crate::record::Record;

pub fn compute_total<'a, I>(entries: I) -> i64
where
    I: IntoIterator<Item = &'a RecordEntry>,
{
    let mut total = 0;
    for entry in entries {
        match entry {
            Ok(record) => total += record.elapsed_seconds(),
            Err(err) => warn!("excluding malformed record from total: {err}"),
        }
    }
    total
}

/// Worked seconds per calendar day. Sessions crossing midnight are split
/// at the day boundary.
pub fn daily_totals<'a, I>(records: I) -> BTreeMap<NaiveDate, i64>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut totals = BTreeMap::new();
    for record in records {
        accumulate_record(&mut totals, record.start, record.end);
    }
    totals
}

fn accumulate_record(
    totals: &mut BTreeMap<NaiveDate, i64>,
    start: NaiveDateTime,
    end: NaiveDateTime,
) {
    if end <= start {
        return;
    }

    let mut day = start.date();
    let last_day = (end - Duration::seconds(1)).date();

    while day <= last_day {
        let Some(next_day) = day.succ_opt() else {
            break;
        };
        let day_start = day.and_time(NaiveTime::MIN);
        let day_end = next_day.and_time(NaiveTime::MIN);
        let slice_start = start.max(day_start);
        let slice_end = end.min(day_end);

        if slice_end > slice_start {
            *totals.entry(day).or_insert(0) += (slice_end - slice_start).num_seconds();
        }

        day = next_day;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use crate::ledger::RecordEntry;
    use crate::record::Record;

    use super::{compute_total, daily_totals};

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn empty_ledger_totals_zero() {
        let entries: Vec<RecordEntry> = Vec::new();
        assert_eq!(compute_total(&entries), 0);
    }

    #[test]
    fn ignores_malformed_entries() {
        let entries = vec![
            Record::parse_line("2024-01-01 09:00:00,2024-01-01 10:00:00,01:00,a"),
            Record::parse_line("2024-01-01 11:00:00,not a time,00:00,broken"),
            Record::parse_line("2024-01-01 12:00:00,2024-01-01 12:20:30,00:20,b"),
        ];
        assert!(entries[1].is_err());
        assert_eq!(compute_total(&entries), 3600 + 20 * 60 + 30);
    }

    #[test]
    fn splits_sessions_across_midnight() {
        let records = vec![
            Record::spanning(at(1, 22, 0), at(2, 1, 30), "late"),
            Record::spanning(at(2, 9, 0), at(2, 10, 0), "morning"),
            Record::provisional(at(3, 9, 0), "abandoned"),
        ];
        let totals = daily_totals(&records);

        assert_eq!(totals.len(), 2);
        assert_eq!(totals[&NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()], 2 * 3600);
        assert_eq!(
            totals[&NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()],
            90 * 60 + 3600
        );
    }
}
