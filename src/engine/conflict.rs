use chrono::Utc;

use crate::model::*;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// First booking in `rs` that overlaps `span` under the half-open rule.
/// Which one is returned when several overlap is unspecified.
pub(crate) fn first_conflict<'a>(rs: &'a RoomState, span: &Span) -> Option<&'a Booking> {
    rs.overlapping(span).find(|b| b.span.overlaps(span))
}
