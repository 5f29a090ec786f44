use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A booking the requester may review right now.
pub fn is_candidate(booking: &Booking, requester: Ulid, now: Ms, reviewed: bool) -> bool {
    booking.requester_id == requester
        && booking.status == BookingStatus::Completed
        && booking.span.end < now
        && !reviewed
}

/// Candidates in ascending `(end, id)` order. Recomputed on every call.
pub fn derive_candidates<'a>(
    bookings: impl IntoIterator<Item = &'a Booking>,
    requester: Ulid,
    now: Ms,
    reviewed: impl Fn(Ulid) -> bool,
) -> Vec<ReviewCandidate> {
    let mut out: Vec<ReviewCandidate> = bookings
        .into_iter()
        .filter(|b| is_candidate(b, requester, now, reviewed(b.id)))
        .map(|b| ReviewCandidate {
            booking_id: b.id,
            provider_id: b.provider_id,
            ended_at: b.span.end,
        })
        .collect();
    out.sort_by_key(|c| (c.ended_at, c.booking_id));
    out
}

/// Preconditions for creating a review, in the order they are reported.
/// A second review for the same booking is always `Duplicate`, whoever asks.
pub fn check_review(
    booking: &Booking,
    caller: Ulid,
    now: Ms,
    reviewed: bool,
    rating: u8,
    comment: Option<&str>,
) -> Result<(), EngineError> {
    if reviewed {
        return Err(EngineError::Duplicate(booking.id));
    }
    if booking.requester_id != caller {
        return Err(EngineError::Forbidden("only the requester may review a booking"));
    }
    if booking.status != BookingStatus::Completed {
        return Err(EngineError::ReviewNotAllowed("booking is not completed"));
    }
    if booking.span.end >= now {
        return Err(EngineError::ReviewNotAllowed("booking has not ended"));
    }
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(EngineError::Validation(format!(
            "rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }
    if comment.is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
        return Err(EngineError::LimitExceeded("comment too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::booking;

    fn completed_for(requester: Ulid, start: Ms, end: Ms) -> Booking {
        let mut b = booking(Ulid::new(), start, end, BookingStatus::Completed);
        b.requester_id = requester;
        b
    }

    #[test]
    fn candidate_predicate() {
        let me = Ulid::new();
        let b = completed_for(me, 100, 200);
        assert!(is_candidate(&b, me, 201, false));
        assert!(!is_candidate(&b, me, 200, false));
        assert!(!is_candidate(&b, me, 201, true));
        assert!(!is_candidate(&b, Ulid::new(), 201, false));

        let mut accepted = b.clone();
        accepted.status = BookingStatus::Accepted;
        assert!(!is_candidate(&accepted, me, 201, false));
    }

    #[test]
    fn candidates_ordered_by_end() {
        let me = Ulid::new();
        let late = completed_for(me, 500, 900);
        let early = completed_for(me, 100, 200);
        let reviewed = completed_for(me, 300, 400);
        let all = [late.clone(), early.clone(), reviewed.clone()];

        let out = derive_candidates(&all, me, 1_000, |id| id == reviewed.id);
        let ids: Vec<Ulid> = out.iter().map(|c| c.booking_id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
        assert_eq!(out[0].ended_at, 200);
    }

    #[test]
    fn review_check_order() {
        let me = Ulid::new();
        let b = completed_for(me, 100, 200);

        // Duplicate wins over everything else, including a foreign caller.
        assert!(matches!(check_review(&b, Ulid::new(), 0, true, 9, None), Err(EngineError::Duplicate(_))));
        assert!(matches!(check_review(&b, b.provider_id, 300, false, 5, None), Err(EngineError::Forbidden(_))));
        assert!(matches!(check_review(&b, me, 150, false, 5, None), Err(EngineError::ReviewNotAllowed(_))));
        assert!(matches!(check_review(&b, me, 300, false, 0, None), Err(EngineError::Validation(_))));
        assert!(matches!(check_review(&b, me, 300, false, 6, None), Err(EngineError::Validation(_))));
        assert!(check_review(&b, me, 300, false, 5, Some("great")).is_ok());

        let mut cancelled = b.clone();
        cancelled.status = BookingStatus::Cancelled;
        assert!(matches!(
            check_review(&cancelled, me, 300, false, 4, None),
            Err(EngineError::ReviewNotAllowed(_))
        ));
    }

    #[test]
    fn long_comment_rejected() {
        let me = Ulid::new();
        let b = completed_for(me, 100, 200);
        let long = "x".repeat(MAX_COMMENT_LEN + 1);
        assert!(matches!(
            check_review(&b, me, 300, false, 3, Some(&long)),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
