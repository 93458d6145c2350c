use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone};

/// Format of the keys of the daily breakdown.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// This is the standard way of converting a day into a key of the daily breakdown.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Milliseconds since the unix epoch. Moments before the epoch are clamped to 0, since stored
/// visit timestamps are unsigned.
pub fn epoch_millis<Tz: TimeZone>(moment: &DateTime<Tz>) -> u64 {
    u64::try_from(moment.timestamp_millis()).unwrap_or(0)
}

/// Monday of the week `date` belongs to.
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

pub fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Human readable duration, e.g. `2 hours 5 minutes`.
pub fn format_duration(milliseconds: u64) -> String {
    if milliseconds < 1000 {
        return "Less than 1 second".into();
    }

    let seconds = milliseconds / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!(
            "{hours} hour{} {} minute{}",
            plural(hours),
            minutes % 60,
            plural(minutes % 60)
        )
    } else if minutes > 0 {
        format!("{minutes} minute{}", plural(minutes))
    } else {
        format!("{seconds} second{}", plural(seconds))
    }
}

fn plural(value: u64) -> &'static str {
    if value == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;

    #[test]
    fn date_key_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(date_key(date), "2024-01-05");
    }

    #[test]
    fn epoch_millis_clamps_before_epoch() {
        let before = Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(epoch_millis(&before), 0);
        let after = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(epoch_millis(&after), 1000);
    }

    #[test]
    fn week_starts_on_monday() {
        // 2024-03-14 is a Thursday
        let thursday = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert_eq!(
            start_of_week(thursday),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        let sunday = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
        assert_eq!(
            start_of_week(sunday),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(start_of_week(monday), monday);
    }

    #[test]
    fn month_starts_on_first() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            start_of_month(date),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
    }

    #[test]
    fn durations_are_humanized() {
        assert_eq!(format_duration(999), "Less than 1 second");
        assert_eq!(format_duration(1000), "1 second");
        assert_eq!(format_duration(59_999), "59 seconds");
        assert_eq!(format_duration(60_000), "1 minute");
        assert_eq!(format_duration(150_000), "2 minutes");
        assert_eq!(format_duration(3_600_000), "1 hour 0 minutes");
        assert_eq!(format_duration(2 * 3_600_000 + 61_000), "2 hours 1 minute");
    }
}
