use ulid::Ulid;

use crate::model::{Booking, Ms, Party};

use super::EngineError;

/// Resolve which hidden flag `caller` may set on `booking`, or why not.
///
/// Hiding is allowed once the booking is terminal or entirely in the past.
pub fn hide_target(booking: &Booking, caller: Ulid, now: Ms) -> Result<Party, EngineError> {
    let party = booking
        .party_of(caller)
        .ok_or(EngineError::Forbidden("caller is not a party to this booking"))?;
    if !(booking.status.is_terminal() || now > booking.span.end) {
        return Err(EngineError::NotHideable(booking.id));
    }
    Ok(party)
}

/// Set `party`'s hidden flag. Returns false if it was already set.
pub fn set_hidden(booking: &mut Booking, party: Party) -> bool {
    let flag = match party {
        Party::Requester => &mut booking.hidden_for_requester,
        Party::Provider => &mut booking.hidden_for_provider,
    };
    let changed = !*flag;
    *flag = true;
    changed
}

/// Whether `booking` shows up in `party`'s own listing.
pub fn visible_to(booking: &Booking, party: Party) -> bool {
    !booking.is_hidden_for(party)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::booking;
    use crate::model::BookingStatus;

    #[test]
    fn terminal_bookings_are_hideable_any_time() {
        for st in [BookingStatus::Declined, BookingStatus::Cancelled, BookingStatus::Completed] {
            let b = booking(Ulid::new(), 100, 200, st);
            assert_eq!(hide_target(&b, b.requester_id, 0).unwrap(), Party::Requester);
            assert_eq!(hide_target(&b, b.provider_id, 0).unwrap(), Party::Provider);
        }
    }

    #[test]
    fn active_bookings_only_once_past() {
        for st in [BookingStatus::Pending, BookingStatus::Accepted] {
            let b = booking(Ulid::new(), 100, 200, st);
            assert!(matches!(hide_target(&b, b.requester_id, 150), Err(EngineError::NotHideable(_))));
            assert!(matches!(hide_target(&b, b.requester_id, 200), Err(EngineError::NotHideable(_))));
            assert!(hide_target(&b, b.requester_id, 201).is_ok());
        }
    }

    #[test]
    fn strangers_cannot_hide() {
        let b = booking(Ulid::new(), 100, 200, BookingStatus::Cancelled);
        assert!(matches!(hide_target(&b, Ulid::new(), 0), Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn flags_are_independent() {
        let mut b = booking(Ulid::new(), 100, 200, BookingStatus::Completed);
        assert!(set_hidden(&mut b, Party::Requester));
        assert!(!visible_to(&b, Party::Requester));
        assert!(visible_to(&b, Party::Provider));
        assert_eq!(b.status, BookingStatus::Completed);

        assert!(!set_hidden(&mut b, Party::Requester));
        assert!(set_hidden(&mut b, Party::Provider));
        assert!(!visible_to(&b, Party::Provider));
    }
}
