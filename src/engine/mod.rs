mod conflict;
pub mod earnings;
mod error;
pub mod lifecycle;
mod mutations;
pub mod pricing;
mod queries;
pub mod reviews;
mod store;
pub mod visibility;

pub use earnings::WeekStart;
pub use error::EngineError;
pub use lifecycle::{Action, Decision};
pub use mutations::NewBooking;
pub use store::{BookingStore, SharedCalendar};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::directory::ProfileDirectory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: Ack,
    },
    Compact {
        events: Vec<Event>,
        response: Ack,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// wait for one append, drain whatever else is already queued, then write the
/// whole batch with a single fsync and answer every sender with the result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        // Non-append commands run after the appends queued ahead of them.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // Every sender hears the same failure, so none of the batch may survive
    // on disk to be replayed later.
    if let Err(e) = &result {
        tracing::error!("WAL batch of {} failed: {e}", batch.len());
        if let Err(rb) = wal.rollback() {
            tracing::error!("WAL rollback failed: {rb}");
        }
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine of one tenant.
pub struct Engine {
    pub(super) store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn ProfileDirectory>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) week_start: WeekStart,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append can land between the snapshot and the file swap.
    pub(super) compaction_gate: RwLock<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn ProfileDirectory>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = BookingStore::new();
        store.replay(&events);
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {} ({} providers)",
                events.len(),
                wal_path.display(),
                store.calendar_count()
            );
        }

        Ok(Self {
            store,
            wal_tx,
            notify,
            directory,
            clock,
            week_start: WeekStart::default(),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn with_week_start(mut self, week_start: WeekStart) -> Self {
        self.week_start = week_start;
        self
    }

    pub fn store(&self) -> &BookingStore {
        &self.store
    }

    pub(super) fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append, then apply, then notify both parties. Memory is untouched
    /// if the append fails.
    pub(super) async fn commit(
        &self,
        cal: &mut ProviderCalendar,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.store.apply(cal, &event);
        if let Some(b) = cal.get(event.booking_id()) {
            self.notify.send(b.requester_id, &event);
            self.notify.send(b.provider_id, &event);
        }
        Ok(())
    }

    /// Lookup booking → provider, acquire that calendar's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ProviderCalendar>, EngineError> {
        let cal = self.calendar_for_booking(booking_id)?;
        Ok(cal.write_owned().await)
    }

    pub(super) async fn resolve_booking_read(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockReadGuard<ProviderCalendar>, EngineError> {
        let cal = self.calendar_for_booking(booking_id)?;
        Ok(cal.read_owned().await)
    }

    fn calendar_for_booking(&self, booking_id: &Ulid) -> Result<SharedCalendar, EngineError> {
        let provider_id = self
            .store
            .provider_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        self.store
            .calendar(&provider_id)
            .ok_or(EngineError::NotFound(*booking_id))
    }

    /// Rewrite the WAL as one snapshot record per booking and review.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::new();
        let mut provider_ids = self.store.provider_ids();
        provider_ids.sort();
        for pid in provider_ids {
            let Some(cal) = self.store.calendar(&pid) else { continue };
            let guard = cal.read().await;
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }
        let mut reviews = self.store.all_reviews();
        reviews.sort_by_key(|r| r.id);
        events.extend(reviews.into_iter().map(|review| Event::ReviewCreated { review }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        tracing::info!("compacted WAL to {count} records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
