//! Booking status transitions.
//!
//! ```text
//! pending ──accept──▶ accepted ──complete (provider, now > end)──▶ completed
//!    │  └──decline──▶ declined
//!    └──cancel (either party, now < start)──▶ cancelled ◀── accepted
//! ```
//!
//! Checks run in a fixed order: actor role, then status legality, then the
//! time precondition. Nothing here mutates; the engine applies the returned
//! status under the provider's calendar lock.

use ulid::Ulid;

use crate::model::{Booking, BookingStatus, Ms, Party};

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Decline,
    Cancel,
    Complete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Accept, Action::Decline, Action::Cancel, Action::Complete];

    pub fn target(self) -> BookingStatus {
        match self {
            Action::Accept => BookingStatus::Accepted,
            Action::Decline => BookingStatus::Declined,
            Action::Cancel => BookingStatus::Cancelled,
            Action::Complete => BookingStatus::Completed,
        }
    }

    /// Map an UPDATE target status back to the action that produces it.
    pub fn for_target(status: BookingStatus) -> Option<Action> {
        match status {
            BookingStatus::Accepted => Some(Action::Accept),
            BookingStatus::Declined => Some(Action::Decline),
            BookingStatus::Cancelled => Some(Action::Cancel),
            BookingStatus::Completed => Some(Action::Complete),
            BookingStatus::Pending => None,
        }
    }

    fn legal_from(self, status: BookingStatus) -> bool {
        match self {
            Action::Accept | Action::Decline => status == BookingStatus::Pending,
            Action::Cancel => status.is_active(),
            Action::Complete => status == BookingStatus::Accepted,
        }
    }

    fn provider_only(self) -> bool {
        !matches!(self, Action::Cancel)
    }
}

impl From<Decision> for Action {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Accept => Action::Accept,
            Decision::Decline => Action::Decline,
        }
    }
}

/// Validate `action` by `caller` on `booking` at `now` and return the new status.
pub fn next_status(
    booking: &Booking,
    caller: Ulid,
    action: Action,
    now: Ms,
) -> Result<BookingStatus, EngineError> {
    let party = booking
        .party_of(caller)
        .ok_or(EngineError::Forbidden("caller is not a party to this booking"))?;
    if action.provider_only() && party != Party::Provider {
        return Err(EngineError::Forbidden("only the provider may perform this action"));
    }

    let illegal = EngineError::IllegalTransition {
        from: booking.status,
        to: action.target(),
    };
    if !action.legal_from(booking.status) {
        return Err(illegal);
    }
    let time_ok = match action {
        Action::Cancel => now < booking.span.start,
        Action::Complete => now > booking.span.end,
        Action::Accept | Action::Decline => true,
    };
    if !time_ok {
        return Err(illegal);
    }
    Ok(action.target())
}
