use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

use crate::limits::*;
use crate::model::{Ms, Span};

use super::EngineError;

/// Parse a wire date: `YYYY-MM-DD` (midnight), an RFC 3339 timestamp, or a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` read on the UTC axis.
///
/// Epoch-millisecond strings are rejected rather than guessed at.
pub fn parse_instant(raw: &str) -> Result<Ms, EngineError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis());
    }
    Err(EngineError::MalformedDate(raw.to_string()))
}

/// RFC 3339 UTC with millisecond precision, e.g. `2026-03-01T00:00:00.000Z`.
pub fn format_instant(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Validate a requested stay against the booking policy. First failure wins:
/// malformed date, inverted or empty range, start in the past, policy limits.
pub fn validate(start: &str, end: &str, now: Ms) -> Result<Span, EngineError> {
    let start = parse_instant(start)?;
    let end = parse_instant(end)?;
    if start >= end {
        return Err(EngineError::InvalidRange { start, end });
    }
    if start < now {
        return Err(EngineError::PastDate { start, now });
    }
    check_limits(start, end)?;
    Ok(Span::new(start, end))
}

fn check_limits(start: Ms, end: Ms) -> Result<(), EngineError> {
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("date outside supported calendar"));
    }
    if end - start > MAX_STAY_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Ms = 86_400_000;
    // 2026-03-01T00:00:00Z
    const MAR_1: Ms = 1_772_323_200_000;
    // 2026-01-01T00:00:00Z
    const JAN_1: Ms = 1_767_225_600_000;

    #[test]
    fn parses_calendar_date_as_midnight_utc() {
        assert_eq!(parse_instant("2026-03-01").unwrap(), MAR_1);
        assert_eq!(parse_instant(" 2026-03-05 ").unwrap(), MAR_1 + 4 * DAY);
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        assert_eq!(parse_instant("2026-03-01T00:00:00Z").unwrap(), MAR_1);
        assert_eq!(parse_instant("2026-03-01T00:00:00.000Z").unwrap(), MAR_1);
        assert_eq!(parse_instant("2026-03-01T02:00:00+02:00").unwrap(), MAR_1);
    }

    #[test]
    fn parses_naive_datetime_on_utc_axis() {
        assert_eq!(parse_instant("2026-03-01T14:00:00").unwrap(), MAR_1 + 14 * 3_600_000);
        assert_eq!(parse_instant("2026-03-01T00:00:00.250").unwrap(), MAR_1 + 250);
    }

    #[test]
    fn rejects_epoch_millis_and_garbage() {
        for raw in ["1772323200000", "", "tomorrow", "2026-02-30", "2026/03/01"] {
            assert_eq!(
                parse_instant(raw),
                Err(EngineError::MalformedDate(raw.to_string())),
                "{raw:?} should be malformed"
            );
        }
    }

    #[test]
    fn format_matches_wire_shape() {
        assert_eq!(format_instant(MAR_1), "2026-03-01T00:00:00.000Z");
        assert_eq!(parse_instant(&format_instant(MAR_1 + 1)).unwrap(), MAR_1 + 1);
    }

    #[test]
    fn validate_accepts_future_range() {
        let span = validate("2026-03-01", "2026-03-05", JAN_1).unwrap();
        assert_eq!(span, Span::new(MAR_1, MAR_1 + 4 * DAY));
    }

    #[test]
    fn validate_start_equal_to_now_is_allowed() {
        assert!(validate("2026-03-01", "2026-03-02", MAR_1).is_ok());
    }

    #[test]
    fn validate_rejects_empty_and_inverted_ranges() {
        assert!(matches!(
            validate("2026-03-01", "2026-03-01", JAN_1),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate("2026-03-03", "2026-03-01", JAN_1),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn validate_rejects_past_start() {
        assert_eq!(
            validate("2026-03-01", "2026-03-05", MAR_1 + 1),
            Err(EngineError::PastDate { start: MAR_1, now: MAR_1 + 1 })
        );
    }

    #[test]
    fn validate_rule_order() {
        // Malformed beats everything, even when the other bound is inverted and past.
        assert!(matches!(
            validate("garbage", "2020-01-01", MAR_1),
            Err(EngineError::MalformedDate(_))
        ));
        assert!(matches!(
            validate("2026-03-05", "nope", MAR_1),
            Err(EngineError::MalformedDate(_))
        ));
        // Inverted beats past.
        assert!(matches!(
            validate("2020-01-05", "2020-01-01", MAR_1),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn validate_limits_stay_length() {
        assert_eq!(
            validate("2026-03-01", "2028-03-01", JAN_1),
            Err(EngineError::LimitExceeded("stay too long"))
        );
        assert!(validate("2026-03-01", "2027-03-01", JAN_1).is_ok());
    }

    #[test]
    fn validate_limits_calendar_window() {
        assert_eq!(
            validate("1969-12-30", "1969-12-31", Ms::MIN),
            Err(EngineError::LimitExceeded("date outside supported calendar"))
        );
    }

    #[test]
    fn error_messages_render_instants() {
        let err = validate("2026-03-03", "2026-03-01", JAN_1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid date range: start 2026-03-03T00:00:00.000Z is not before end 2026-03-01T00:00:00.000Z"
        );
    }
}
