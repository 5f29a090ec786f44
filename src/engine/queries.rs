use ulid::Ulid;

use crate::model::*;

use super::earnings::{self, resolve_tz};
use super::reviews::derive_candidates;
use super::visibility::visible_to;
use super::{Engine, EngineError};

impl Engine {
    /// One booking as seen by one of its parties. Strangers get `NotFound`
    /// so booking ids don't leak across users.
    pub async fn get_booking(&self, id: Ulid, caller: Ulid) -> Result<Booking, EngineError> {
        let guard = self.resolve_booking_read(&id).await?;
        let booking = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if booking.party_of(caller).is_none() {
            return Err(EngineError::NotFound(id));
        }
        Ok(booking.clone())
    }

    /// The caller's bookings in the given role, ordered by `(start, id)`.
    /// Bookings the caller hid are left out.
    pub async fn list_bookings(
        &self,
        caller: Ulid,
        role: Party,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let mut out = match role {
            Party::Provider => match self.store.calendar(&caller) {
                Some(cal) => cal.read().await.bookings.clone(),
                None => Vec::new(),
            },
            Party::Requester => self.requester_bookings(caller).await,
        };
        out.retain(|b| {
            b.party_id(role) == caller
                && visible_to(b, role)
                && status.is_none_or(|s| b.status == s)
        });
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    /// Everything the requester ever booked, hidden or not.
    async fn requester_bookings(&self, requester: Ulid) -> Vec<Booking> {
        let mut out = Vec::new();
        for id in self.store.bookings_of_requester(&requester) {
            if let Ok(guard) = self.resolve_booking_read(&id).await
                && let Some(b) = guard.get(id)
            {
                out.push(b.clone());
            }
        }
        out
    }

    /// Completed, ended, not-yet-reviewed bookings of `requester`.
    /// Recomputed from current state on each call.
    pub async fn list_review_candidates(&self, requester: Ulid) -> Vec<ReviewCandidate> {
        let bookings = self.requester_bookings(requester).await;
        derive_candidates(&bookings, requester, self.now(), |id| {
            self.store.has_review(&id)
        })
    }

    /// Reviews received by a provider, newest first.
    pub fn list_reviews(&self, provider_id: Ulid) -> Vec<Review> {
        let mut out: Vec<Review> = self
            .store
            .all_reviews()
            .into_iter()
            .filter(|r| r.provider_id == provider_id)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Completed earnings for the week and month around now, in the
    /// provider's own timezone.
    pub async fn earnings(&self, provider_id: Ulid) -> EarningsSummary {
        let tz_name = self
            .directory
            .resolve(provider_id)
            .await
            .and_then(|p| p.timezone);
        let tz = resolve_tz(tz_name.as_deref());
        let bookings = match self.store.calendar(&provider_id) {
            Some(cal) => cal.read().await.bookings.clone(),
            None => Vec::new(),
        };
        earnings::summarize(provider_id, &bookings, self.now(), tz, self.week_start)
    }
}
