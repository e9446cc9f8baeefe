mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;
pub use mutations::{BookingDetails, BookingPatch};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::WRITE_LOCK_WAIT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedAreaBook = Arc<RwLock<AreaBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
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

pub struct Engine {
    /// Area id → area record plus its reservation book.
    pub state: DashMap<Ulid, SharedAreaBook>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Registered resident accounts.
    pub(super) requesters: DashMap<Ulid, Requester>,
    /// Reverse lookup: booking id → area id.
    pub(super) booking_to_area: DashMap<Ulid, Ulid>,
    /// Requester → booking ids, for by-requester listings.
    pub(super) by_requester: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event to one AreaBook (no locking — caller holds the lock).
/// Index maps are updated alongside so replay and live commits share one
/// code path.
fn apply_to_book(
    book: &mut AreaBook,
    event: &Event,
    booking_to_area: &DashMap<Ulid, Ulid>,
    by_requester: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::BookingCreated { booking } => {
            booking_to_area.insert(booking.id, booking.area_id);
            by_requester
                .entry(booking.requester_id)
                .or_default()
                .push(booking.id);
            book.insert_booking(booking.clone());
        }
        Event::BookingUpdated {
            booking,
            prev_area_id,
            prev_requester_id,
        } => {
            if book.area.id == *prev_area_id {
                book.remove_booking(booking.id);
            }
            // Index maintenance runs only on the target book so a cross-area
            // move applied to both guards does it once.
            if book.area.id == booking.area_id {
                book.insert_booking(booking.clone());
                booking_to_area.insert(booking.id, booking.area_id);
                if *prev_requester_id != booking.requester_id {
                    if let Some(mut ids) = by_requester.get_mut(prev_requester_id) {
                        ids.retain(|b| *b != booking.id);
                    }
                    by_requester
                        .entry(booking.requester_id)
                        .or_default()
                        .push(booking.id);
                }
            }
        }
        Event::BookingStateChanged { id, state, .. } => {
            if let Some(b) = book.booking_mut(*id) {
                b.state = *state;
            }
        }
        Event::BookingRemoved { id, .. } => {
            if let Some(prev) = book.remove_booking(*id) {
                booking_to_area.remove(id);
                if let Some(mut ids) = by_requester.get_mut(&prev.requester_id) {
                    ids.retain(|b| b != id);
                }
            }
        }
        Event::AreaUpdated { area } => {
            book.area = area.clone();
        }
        Event::AreaActiveSet { active, .. } => {
            book.area.active = *active;
        }
        // Area create/remove and requester events are handled at the map level
        Event::AreaCreated { .. }
        | Event::AreaRemoved { .. }
        | Event::RequesterRegistered { .. }
        | Event::RequesterRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            requesters: DashMap::new(),
            booking_to_area: DashMap::new(),
            by_requester: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy site
        // creation).
        for event in &events {
            match event {
                Event::AreaCreated { area } => {
                    engine
                        .state
                        .insert(area.id, Arc::new(RwLock::new(AreaBook::new(area.clone()))));
                }
                Event::AreaRemoved { id } => {
                    if let Some(entry) = engine.state.get(id) {
                        let guard = entry.try_read().expect("replay: uncontended read");
                        for b in &guard.bookings {
                            engine.booking_to_area.remove(&b.id);
                            if let Some(mut ids) = engine.by_requester.get_mut(&b.requester_id) {
                                ids.retain(|x| x != &b.id);
                            }
                        }
                    }
                    engine.state.remove(id);
                }
                Event::RequesterRegistered { requester } => {
                    engine.requesters.insert(requester.id, requester.clone());
                }
                Event::RequesterRemoved { id } => {
                    engine.requesters.remove(id);
                }
                other => {
                    for area_id in event_area_ids(other) {
                        if let Some(entry) = engine.state.get(&area_id) {
                            let book_arc = entry.clone();
                            let mut guard = book_arc.try_write().expect("replay: uncontended write");
                            apply_to_book(&mut guard, other, &engine.booking_to_area, &engine.by_requester);
                        }
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn book(&self, id: &Ulid) -> Option<SharedAreaBook> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn area_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_area.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call — the commit point of a
    /// transactional section. Nothing mutates if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        area_id: Ulid,
        book: &mut AreaBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_book(book, event, &self.booking_to_area, &self.by_requester);
        self.notify.send(area_id, event);
        Ok(())
    }

    /// Acquire an area book's write lock, waiting at most WRITE_LOCK_WAIT;
    /// on timeout the operation reports Contended and the caller may retry.
    pub(super) async fn lock_book(
        &self,
        area_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<AreaBook>, EngineError> {
        let book = self.book(&area_id).ok_or(EngineError::AreaNotFound(area_id))?;
        match tokio::time::timeout(WRITE_LOCK_WAIT, book.write_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(EngineError::Contended(area_id)),
        }
    }

    /// Resolve a booking id to its area and lock that book.
    pub(super) async fn lock_booking_area(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<AreaBook>), EngineError> {
        let area_id = self
            .area_of_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let guard = self.lock_book(area_id).await?;
        Ok((area_id, guard))
    }
}

/// Area ids an event applies to (empty for map-level events).
fn event_area_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::AreaUpdated { area } => vec![area.id],
        Event::AreaActiveSet { id, .. } => vec![*id],
        Event::BookingCreated { booking } => vec![booking.area_id],
        Event::BookingUpdated {
            booking,
            prev_area_id,
            ..
        } => {
            if *prev_area_id == booking.area_id {
                vec![booking.area_id]
            } else {
                vec![*prev_area_id, booking.area_id]
            }
        }
        Event::BookingStateChanged { area_id, .. } | Event::BookingRemoved { area_id, .. } => {
            vec![*area_id]
        }
        Event::AreaCreated { .. }
        | Event::AreaRemoved { .. }
        | Event::RequesterRegistered { .. }
        | Event::RequesterRemoved { .. } => Vec::new(),
    }
}
