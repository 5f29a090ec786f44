use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC) — the only time type.
pub type Ms = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;

/// True iff the half-open intervals `[a_start, a_end)` and `[b_start, b_end)` intersect.
/// Touching endpoints do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && b_start < a_end
}

/// Length of `[start, end)` in hours. The interval must be non-empty.
pub fn duration_hours(start: Ms, end: Ms) -> Result<f64, InvalidInterval> {
    if end <= start {
        return Err(InvalidInterval { start, end });
    }
    Ok((end - start) as f64 / MS_PER_HOUR as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid interval [{start}, {end}): end must be after start")]
pub struct InvalidInterval {
    pub start: Ms,
    pub end: Ms,
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, InvalidInterval> {
        if end <= start {
            return Err(InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_ms() as f64 / MS_PER_HOUR as f64
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Declined,
        BookingStatus::Cancelled,
        BookingStatus::Completed,
    ];

    /// Occupies the provider's calendar.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Accepted)
    }

    /// No further lifecycle transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Declined | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Declined => "declined",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "accepted" => Some(BookingStatus::Accepted),
            "declined" => Some(BookingStatus::Declined),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller's relationship to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Party {
    Requester,
    Provider,
}

impl Party {
    pub fn as_str(self) -> &'static str {
        match self {
            Party::Requester => "requester",
            Party::Provider => "provider",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "requester" => Some(Party::Requester),
            "provider" => Some(Party::Provider),
            _ => None,
        }
    }
}

/// A booking between a requester and a provider.
///
/// `rate_snapshot`, `duration_hours` and `total_price` are captured once at
/// creation and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub provider_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub rate_snapshot: f64,
    pub duration_hours: f64,
    pub total_price: f64,
    pub notes: Option<String>,
    pub hidden_for_requester: bool,
    pub hidden_for_provider: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// Classify `caller` relative to this booking. `None` for strangers.
    pub fn party_of(&self, caller: Ulid) -> Option<Party> {
        if caller == self.provider_id {
            Some(Party::Provider)
        } else if caller == self.requester_id {
            Some(Party::Requester)
        } else {
            None
        }
    }

    pub fn is_hidden_for(&self, party: Party) -> bool {
        match party {
            Party::Requester => self.hidden_for_requester,
            Party::Provider => self.hidden_for_provider,
        }
    }

    /// The id of the party playing `party` on this booking.
    pub fn party_id(&self, party: Party) -> Ulid {
        match party {
            Party::Requester => self.requester_id,
            Party::Provider => self.provider_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub requester_id: Ulid,
    pub provider_id: Ulid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: Ms,
}

/// Everything one provider is committed to. Bookings are kept sorted by
/// `span.start`; terminal bookings stay in place as shared history.
#[derive(Debug, Clone)]
pub struct ProviderCalendar {
    pub provider_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl ProviderCalendar {
    pub fn new(provider_id: Ulid) -> Self {
        Self {
            provider_id,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn active_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.is_active()).count()
    }
}

/// The WAL record format. One variant per committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    StatusChanged {
        id: Ulid,
        provider_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    NotesUpdated {
        id: Ulid,
        provider_id: Ulid,
        notes: Option<String>,
        at: Ms,
    },
    BookingHidden {
        id: Ulid,
        provider_id: Ulid,
        party: Party,
    },
    ReviewCreated {
        review: Review,
    },
}

impl Event {
    /// The provider calendar this event belongs to.
    pub fn provider_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking } => booking.provider_id,
            Event::ReviewCreated { review } => review.provider_id,
            Event::StatusChanged { provider_id, .. }
            | Event::NotesUpdated { provider_id, .. }
            | Event::BookingHidden { provider_id, .. } => *provider_id,
        }
    }

    pub fn booking_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking } => booking.id,
            Event::ReviewCreated { review } => review.booking_id,
            Event::StatusChanged { id, .. }
            | Event::NotesUpdated { id, .. }
            | Event::BookingHidden { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::BookingCreated { .. } => "booking_created",
            Event::StatusChanged { .. } => "status_changed",
            Event::NotesUpdated { .. } => "notes_updated",
            Event::BookingHidden { .. } => "booking_hidden",
            Event::ReviewCreated { .. } => "review_created",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewCandidate {
    pub booking_id: Ulid,
    pub provider_id: Ulid,
    pub ended_at: Ms,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EarningsSummary {
    pub provider_id: Ulid,
    pub week: f64,
    pub month: f64,
    pub total: f64,
    pub completed_count: usize,
    pub week_start: Ms,
    pub month_start: Ms,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn booking(provider_id: Ulid, start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            requester_id: Ulid::new(),
            provider_id,
            span: Span::new(start, end),
            status,
            rate_snapshot: 0.0,
            duration_hours: 0.0,
            total_price: 0.0,
            notes: None,
            hidden_for_requester: false,
            hidden_for_provider: false,
            created_at: 0,
            updated_at: 0,
        }
    }
}
