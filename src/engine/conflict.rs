use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// Reject `span` if any active booking on the calendar overlaps it.
/// The caller must hold the calendar's write lock until the new booking is applied.
pub(crate) fn check_no_conflict(cal: &ProviderCalendar, span: &Span) -> Result<(), EngineError> {
    for existing in cal.overlapping(span) {
        if existing.status.is_active() && existing.span.overlaps(span) {
            return Err(EngineError::SchedulingConflict(existing.id));
        }
    }
    Ok(())
}
