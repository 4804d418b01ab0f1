use chrono::{DateTime, Utc};

/// Return RFC 3339 date-time string with UTC timezone using millisecond resolution. These strings
/// sort lexicographically in the same order as the instants they represent, so they are safe to
/// embed in sort keys.
///
/// eg.
/// ```
/// "2021-02-12T13:30:41.791Z"
/// ```
pub fn date_time_iso_str(date_time: &DateTime<Utc>) -> String {
    date_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a string written by `date_time_iso_str`, or any other RFC 3339 string.
pub fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Calendar month of an instant, eg. "2024-03".
pub fn year_month(date_time: &DateTime<Utc>) -> String {
    date_time.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    #[test]
    fn test_iso_str_round_trip() {
        let dt = Utc.ymd(2024, 3, 9).and_hms_milli(8, 5, 2, 41);
        let s = date_time_iso_str(&dt);
        assert_eq!(s, "2024-03-09T08:05:02.041Z");
        assert_eq!(parse_date_time(&s), Some(dt));
        assert_eq!(parse_date_time("yesterday"), None);
        assert_eq!(year_month(&dt), "2024-03");
    }

    #[test]
    fn test_iso_str_sorts_like_time() {
        let earlier = Utc.ymd(2024, 3, 9).and_hms_milli(8, 5, 2, 999);
        let later = Utc.ymd(2024, 3, 9).and_hms_milli(8, 5, 3, 0);
        assert!(date_time_iso_str(&earlier) < date_time_iso_str(&later));
    }
}
