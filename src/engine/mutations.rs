use ulid::Ulid;

use crate::directory::Role;
use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CREATED_TOTAL, SCHEDULING_CONFLICTS_TOTAL, TRANSITIONS_TOTAL};

use super::conflict::{check_no_conflict, validate_span};
use super::lifecycle::{self, Action, Decision};
use super::{pricing, reviews, visibility, Engine, EngineError};

/// A creation request as received from a requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub provider_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub notes: Option<String>,
}

fn check_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_booking(
        &self,
        requester_id: Ulid,
        req: NewBooking,
    ) -> Result<Booking, EngineError> {
        let span = Span::try_new(req.start, req.end)?;
        validate_span(&span)?;
        check_notes(req.notes.as_deref())?;
        if requester_id == req.provider_id {
            return Err(EngineError::Validation("a provider cannot book themselves".into()));
        }
        let now = self.now();
        if span.start <= now {
            return Err(EngineError::Validation("booking must start in the future".into()));
        }

        // The rate is read here once and never again for this booking.
        let profile = self
            .directory
            .resolve(req.provider_id)
            .await
            .ok_or(EngineError::NotFound(req.provider_id))?;
        if profile.role != Role::Provider {
            return Err(EngineError::InvalidRole(req.provider_id));
        }

        let _gate = self.compaction_gate.read().await;
        let cal = self.store.calendar_or_create(req.provider_id);
        let mut guard = cal.write().await;
        if guard.active_count() >= MAX_BOOKINGS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many open bookings on provider"));
        }

        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(SCHEDULING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!("rejected [{}, {}) for provider {}: {e}", span.start, span.end, req.provider_id);
            return Err(e);
        }

        let price = pricing::snapshot(span.duration_hours(), profile.rate)?;
        let booking = Booking {
            id: Ulid::new(),
            requester_id,
            provider_id: req.provider_id,
            span,
            status: BookingStatus::Pending,
            rate_snapshot: price.rate,
            duration_hours: price.duration_hours,
            total_price: price.total_price,
            notes: req.notes,
            hidden_for_requester: false,
            hidden_for_provider: false,
            created_at: now,
            updated_at: now,
        };
        self.commit(&mut guard, Event::BookingCreated { booking: booking.clone() })
            .await?;

        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            "booking {} created for provider {} [{}, {}) total {:.2}",
            booking.id,
            booking.provider_id,
            span.start,
            span.end,
            booking.total_price
        );
        Ok(booking)
    }

    pub async fn decide_booking(
        &self,
        id: Ulid,
        caller: Ulid,
        decision: Decision,
    ) -> Result<Booking, EngineError> {
        self.transition(id, caller, decision.into()).await
    }

    pub async fn cancel_booking(&self, id: Ulid, caller: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, caller, Action::Cancel).await
    }

    pub async fn complete_booking(&self, id: Ulid, caller: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, caller, Action::Complete).await
    }

    /// Read-validate-write of a status change under the provider's calendar lock.
    pub async fn transition(
        &self,
        id: Ulid,
        caller: Ulid,
        action: Action,
    ) -> Result<Booking, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let now = self.now();
        let booking = guard.get(id).ok_or(EngineError::NotFound(id))?;
        let from = booking.status;
        let to = lifecycle::next_status(booking, caller, action, now)?;

        let event = Event::StatusChanged {
            id,
            provider_id: booking.provider_id,
            status: to,
            at: now,
        };
        self.commit(&mut guard, event).await?;

        metrics::counter!(TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        tracing::info!("booking {id}: {from} -> {to}");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Hide a finished booking from the caller's own listings.
    pub async fn hide_booking(&self, id: Ulid, caller: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let now = self.now();
        let booking = guard.get(id).ok_or(EngineError::NotFound(id))?;
        let party = visibility::hide_target(booking, caller, now)?;
        if booking.is_hidden_for(party) {
            return Ok(());
        }

        let event = Event::BookingHidden {
            id,
            provider_id: booking.provider_id,
            party,
        };
        self.commit(&mut guard, event).await
    }

    /// Replace the requester's notes while the booking is still open.
    pub async fn update_notes(
        &self,
        id: Ulid,
        caller: Ulid,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        check_notes(notes.as_deref())?;
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if booking.party_of(caller) != Some(Party::Requester) {
            return Err(EngineError::Forbidden("only the requester may edit notes"));
        }
        if booking.status.is_terminal() {
            return Err(EngineError::Immutable {
                status: booking.status,
            });
        }

        let event = Event::NotesUpdated {
            id,
            provider_id: booking.provider_id,
            notes,
            at: self.now(),
        };
        self.commit(&mut guard, event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn create_review(
        &self,
        booking_id: Ulid,
        caller: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Review, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let now = self.now();
        let booking = guard.get(booking_id).ok_or(EngineError::NotFound(booking_id))?;
        reviews::check_review(
            booking,
            caller,
            now,
            self.store.has_review(&booking_id),
            rating,
            comment.as_deref(),
        )?;

        let review = Review {
            id: Ulid::new(),
            booking_id,
            requester_id: booking.requester_id,
            provider_id: booking.provider_id,
            rating,
            comment,
            created_at: now,
        };
        self.commit(&mut guard, Event::ReviewCreated { review: review.clone() })
            .await?;
        tracing::info!("review {} for booking {booking_id}: {rating}/5", review.id);
        Ok(review)
    }
}
