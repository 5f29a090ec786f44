use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedCalendar = Arc<RwLock<ProviderCalendar>>;

/// In-memory materialization of the WAL.
///
/// Each provider calendar sits behind its own `RwLock`; every mutation of a
/// provider's bookings (and of reviews on them) happens while holding that
/// calendar's write guard. The indexes below are only touched from inside
/// `apply`, i.e. under the same guard.
pub struct BookingStore {
    calendars: DashMap<Ulid, SharedCalendar>,
    /// Reverse lookup: booking id → provider id
    booking_to_provider: DashMap<Ulid, Ulid>,
    /// Requester → booking ids, in creation order.
    by_requester: DashMap<Ulid, Vec<Ulid>>,
    /// Booking id → its single review.
    reviews: DashMap<Ulid, Review>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            calendars: DashMap::new(),
            booking_to_provider: DashMap::new(),
            by_requester: DashMap::new(),
            reviews: DashMap::new(),
        }
    }

    // ── Calendars ────────────────────────────────────────────

    pub fn calendar(&self, provider_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(provider_id).map(|e| e.value().clone())
    }

    /// Get the provider's calendar, creating an empty one on first use.
    pub fn calendar_or_create(&self, provider_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(provider_id)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderCalendar::new(provider_id))))
            .value()
            .clone()
    }

    pub fn calendar_count(&self) -> usize {
        self.calendars.len()
    }

    pub fn provider_ids(&self) -> Vec<Ulid> {
        self.calendars.iter().map(|e| *e.key()).collect()
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn provider_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_provider.get(booking_id).map(|e| *e.value())
    }

    pub fn bookings_of_requester(&self, requester_id: &Ulid) -> Vec<Ulid> {
        self.by_requester
            .get(requester_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn review_for(&self, booking_id: &Ulid) -> Option<Review> {
        self.reviews.get(booking_id).map(|e| e.value().clone())
    }

    pub fn has_review(&self, booking_id: &Ulid) -> bool {
        self.reviews.contains_key(booking_id)
    }

    pub fn review_count(&self) -> usize {
        self.reviews.len()
    }

    pub fn all_reviews(&self) -> Vec<Review> {
        self.reviews.iter().map(|e| e.value().clone()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. Caller holds the write guard of `cal`, which
    /// must be the calendar of `event.provider_id()`.
    pub fn apply(&self, cal: &mut ProviderCalendar, event: &Event) {
        debug_assert_eq!(cal.provider_id, event.provider_id());
        match event {
            Event::BookingCreated { booking } => {
                self.booking_to_provider.insert(booking.id, booking.provider_id);
                self.by_requester
                    .entry(booking.requester_id)
                    .or_default()
                    .push(booking.id);
                cal.insert_booking(booking.clone());
            }
            Event::StatusChanged { id, status, at, .. } => {
                if let Some(b) = cal.get_mut(*id) {
                    b.status = *status;
                    b.updated_at = *at;
                }
            }
            Event::NotesUpdated { id, notes, at, .. } => {
                if let Some(b) = cal.get_mut(*id) {
                    b.notes = notes.clone();
                    b.updated_at = *at;
                }
            }
            Event::BookingHidden { id, party, .. } => {
                if let Some(b) = cal.get_mut(*id) {
                    super::visibility::set_hidden(b, *party);
                }
            }
            Event::ReviewCreated { review } => {
                self.reviews.insert(review.booking_id, review.clone());
            }
        }
    }

    /// Rebuild state from a WAL replay. Runs before the store is shared, so
    /// the calendar locks are uncontended.
    pub fn replay(&self, events: &[Event]) {
        for event in events {
            let cal = self.calendar_or_create(event.provider_id());
            let mut guard = cal.try_write().expect("replay: uncontended write");
            self.apply(&mut guard, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::booking;

    #[tokio::test]
    async fn apply_created_indexes_booking() {
        let store = BookingStore::new();
        let pid = Ulid::new();
        let b = booking(pid, 100, 200, BookingStatus::Pending);
        let cal = store.calendar_or_create(pid);
        {
            let mut guard = cal.write().await;
            store.apply(&mut guard, &Event::BookingCreated { booking: b.clone() });
        }
        assert_eq!(store.provider_for_booking(&b.id), Some(pid));
        assert_eq!(store.bookings_of_requester(&b.requester_id), vec![b.id]);
        assert_eq!(cal.read().await.get(b.id), Some(&b));
    }

    #[tokio::test]
    async fn apply_status_and_hidden() {
        let store = BookingStore::new();
        let pid = Ulid::new();
        let b = booking(pid, 100, 200, BookingStatus::Pending);
        let events = vec![
            Event::BookingCreated { booking: b.clone() },
            Event::StatusChanged { id: b.id, provider_id: pid, status: BookingStatus::Cancelled, at: 50 },
            Event::BookingHidden { id: b.id, provider_id: pid, party: Party::Requester },
        ];
        store.replay(&events);

        let cal = store.calendar(&pid).unwrap();
        let guard = cal.read().await;
        let got = guard.get(b.id).unwrap();
        assert_eq!(got.status, BookingStatus::Cancelled);
        assert_eq!(got.updated_at, 50);
        assert!(got.hidden_for_requester);
        assert!(!got.hidden_for_provider);
    }

    #[test]
    fn replay_reviews() {
        let store = BookingStore::new();
        let pid = Ulid::new();
        let b = booking(pid, 100, 200, BookingStatus::Completed);
        let review = Review {
            id: Ulid::new(),
            booking_id: b.id,
            requester_id: b.requester_id,
            provider_id: pid,
            rating: 5,
            comment: None,
            created_at: 300,
        };
        store.replay(&[
            Event::BookingCreated { booking: b.clone() },
            Event::ReviewCreated { review: review.clone() },
        ]);
        assert!(store.has_review(&b.id));
        assert_eq!(store.review_for(&b.id), Some(review));
        assert_eq!(store.calendar_count(), 1);
    }

    #[test]
    fn unknown_calendar_is_none() {
        let store = BookingStore::new();
        assert!(store.calendar(&Ulid::new()).is_none());
        assert!(store.bookings_of_requester(&Ulid::new()).is_empty());
    }
}
