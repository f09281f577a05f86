pub mod availability;
mod conflict;
mod error;
pub mod grid;
mod lifecycle;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{SlotQuery, available_slots, blocked_slots, conflicts_with, is_available};
pub use conflict::BookingRequest;
pub use error::{EngineError, ValidationError};
pub use grid::{Calendar, GridError, TimeGrid, WallClock};
pub use queries::AppointmentRow;
pub use store::{Directory, normalize_phone};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::dispatch::Dispatcher;
use crate::model::*;
use crate::wal::Wal;

pub type SharedDaySchedule = Arc<RwLock<DaySchedule>>;

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
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
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

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(error = %e, batch = batch.len(), "WAL flush failed");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so a half-written batch does not
    // leak into the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One salon's booking state: the directory, appointments partitioned by
/// local calendar day, and the WAL writer that makes it durable.
pub struct Engine {
    pub directory: Directory,
    pub calendar: Calendar,
    pub dispatcher: Arc<Dispatcher>,
    pub(super) days: DashMap<NaiveDate, SharedDaySchedule>,
    /// Committed copy of every appointment with the day holding it. Read by
    /// id lookups and compaction without touching the day locks.
    pub(super) appointment_index: DashMap<Ulid, (NaiveDate, Appointment)>,
    /// Held shared across every append+apply, exclusively by compaction.
    pub(super) compaction_gate: RwLock<()>,
    /// Serialises service type creation so names stay unique.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an appointment event to its day (caller holds the lock).
fn apply_to_day(ds: &mut DaySchedule, event: &Event) {
    match event {
        Event::AppointmentBooked { appointment, .. } => {
            ds.insert_appointment(appointment.clone());
        }
        Event::AppointmentStatusChanged { id, status, completed_at, .. } => {
            if let Some(a) = ds.get_mut(*id) {
                a.status = *status;
                if completed_at.is_some() {
                    a.completed_at = *completed_at;
                }
            }
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, calendar: Calendar, dispatcher: Arc<Dispatcher>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            directory: Directory::new(),
            calendar,
            dispatcher,
            days: DashMap::new(),
            appointment_index: DashMap::new(),
            compaction_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
            wal_tx,
        };

        // We are the sole owner of every Arc during replay, so try_write always
        // succeeds. Never block here: this can run inside an async context.
        for event in &events {
            match event {
                Event::AppointmentBooked { day, appointment } => {
                    let ds = engine.day_entry(*day);
                    let mut guard = ds.try_write().expect("replay: uncontended write");
                    apply_to_day(&mut guard, event);
                    engine.index_appointment(*day, appointment.id, &guard);
                }
                Event::AppointmentStatusChanged { id, day, .. } => {
                    if let Some(ds) = engine.get_day(day) {
                        let mut guard = ds.try_write().expect("replay: uncontended write");
                        apply_to_day(&mut guard, event);
                        engine.index_appointment(*day, *id, &guard);
                    } else {
                        warn!(appointment = %id, %day, "replay: status change for unknown day");
                    }
                }
                other => engine.directory.apply_event(other),
            }
        }

        Ok(engine)
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
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_day(&self, day: &NaiveDate) -> Option<SharedDaySchedule> {
        self.days.get(day).map(|e| e.value().clone())
    }

    /// The day partition, created empty on first use.
    pub(super) fn day_entry(&self, day: NaiveDate) -> SharedDaySchedule {
        self.days
            .entry(day)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new(day))))
            .clone()
    }

    pub fn day_of_appointment(&self, id: &Ulid) -> Option<NaiveDate> {
        self.appointment_index.get(id).map(|e| e.value().0)
    }

    fn index_appointment(&self, day: NaiveDate, id: Ulid, ds: &DaySchedule) {
        if let Some(a) = ds.get(id) {
            self.appointment_index.insert(id, (day, a.clone()));
        }
    }

    /// WAL-append then apply a directory event.
    pub(super) async fn persist_directory(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&event).await?;
        self.directory.apply_event(&event);
        Ok(())
    }

    /// WAL-append then apply an appointment event to a locked day.
    pub(super) async fn persist_and_apply(&self, ds: &mut DaySchedule, event: &Event) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        self.wal_append(event).await?;
        apply_to_day(ds, event);
        match event {
            Event::AppointmentBooked { day, appointment } => self.index_appointment(*day, appointment.id, ds),
            Event::AppointmentStatusChanged { id, day, .. } => self.index_appointment(*day, *id, ds),
            _ => {}
        }
        Ok(())
    }

    /// A professional that exists and is taking bookings.
    pub(super) fn bookable_professional(&self, id: Ulid) -> Result<Professional, EngineError> {
        let professional = self.directory.professional(&id).ok_or(EngineError::NotFound(id))?;
        if !professional.active {
            return Err(ValidationError::ProfessionalInactive(id).into());
        }
        Ok(professional)
    }

    /// Lookup appointment → day, acquire the day's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        id: &Ulid,
    ) -> Result<(NaiveDate, tokio::sync::OwnedRwLockWriteGuard<DaySchedule>), EngineError> {
        let day = self.day_of_appointment(id).ok_or(EngineError::NotFound(*id))?;
        let ds = self.get_day(&day).ok_or(EngineError::NotFound(*id))?;
        let guard = ds.write_owned().await;
        Ok((day, guard))
    }
}
