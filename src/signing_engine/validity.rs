//! Validity interval syntax understood by `ssh-keygen -V`.
use chrono::{DateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Formats an optional validity window as `"{start}:{end}"`.
///
/// A missing start becomes `always`, a missing end becomes `forever`; present bounds are
/// written as `YYYYMMDDHHMMSS` in UTC. `ssh-keygen` reads these in its local time zone,
/// so it is run with `TZ=UTC`.
pub fn format_validity_interval(
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
) -> String {
    let start = valid_from
        .map(|from| from.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "always".to_string());
    let end = valid_until
        .map(|until| until.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "forever".to_string());
    format!("{}:{}", start, end)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unbounded_interval() {
        assert_eq!(format_validity_interval(None, None), "always:forever");
    }

    #[test]
    fn bounded_interval() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            format_validity_interval(Some(from), Some(until)),
            "20240101000000:20241231235959"
        );
    }

    #[test]
    fn half_open_intervals() {
        let at = Utc.with_ymd_and_hms(2031, 7, 4, 9, 5, 3).unwrap();
        assert_eq!(
            format_validity_interval(Some(at), None),
            "20310704090503:forever"
        );
        assert_eq!(
            format_validity_interval(None, Some(at)),
            "always:20310704090503"
        );
    }
}
