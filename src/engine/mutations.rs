use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::dispatch::{BookingConfirmation, CalendarEvent};
use crate::limits::*;
use crate::model::*;

use super::availability::SlotQuery;
use super::conflict::{
    BookingRequest, check_no_conflict, check_service_choice, now_ms, require_selection, validate_duration,
    validate_name, validate_text, validate_timestamp,
};
use super::store::normalize_phone;
use super::{Engine, EngineError, ValidationError, WalCommand};

impl Engine {
    // ── Professionals ────────────────────────────────────────

    pub async fn create_professional(&self, professional: Professional) -> Result<(), EngineError> {
        if self.directory.professional_count() >= MAX_PROFESSIONALS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many professionals"));
        }
        if self.directory.contains_id(&professional.id) {
            return Err(EngineError::AlreadyExists(professional.id));
        }
        validate_professional(&professional)?;
        self.persist_directory(Event::ProfessionalCreated(professional)).await
    }

    pub async fn update_professional(&self, professional: Professional) -> Result<(), EngineError> {
        if self.directory.professional(&professional.id).is_none() {
            return Err(EngineError::NotFound(professional.id));
        }
        validate_professional(&professional)?;
        self.persist_directory(Event::ProfessionalUpdated(professional)).await
    }

    // ── Service types ────────────────────────────────────────

    /// Add a catalog entry. Names are unique ignoring case; a clash reports
    /// the existing entry's id.
    pub async fn create_service_type(&self, mut service_type: ServiceType) -> Result<ServiceType, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        if self.directory.service_type_count() >= MAX_SERVICE_TYPES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many service types"));
        }
        if self.directory.contains_id(&service_type.id) {
            return Err(EngineError::AlreadyExists(service_type.id));
        }
        service_type.name = service_type.name.trim().to_string();
        validate_name(&service_type.name)?;
        if let Some(existing) = self.directory.service_type_named(&service_type.name) {
            return Err(EngineError::AlreadyExists(existing.id));
        }
        self.persist_directory(Event::ServiceTypeCreated(service_type.clone())).await?;
        info!(service_type = %service_type.name, "service type created");
        Ok(service_type)
    }

    // ── Services ─────────────────────────────────────────────

    /// The stored service carries the catalog spelling of its type.
    pub async fn create_service(&self, mut service: Service) -> Result<Service, EngineError> {
        if self.directory.service_count() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.directory.contains_id(&service.id) {
            return Err(EngineError::AlreadyExists(service.id));
        }
        self.validate_service(&mut service)?;
        self.persist_directory(Event::ServiceCreated(service.clone())).await?;
        Ok(service)
    }

    pub async fn update_service(&self, mut service: Service) -> Result<Service, EngineError> {
        if self.directory.service(&service.id).is_none() {
            return Err(EngineError::NotFound(service.id));
        }
        self.validate_service(&mut service)?;
        self.persist_directory(Event::ServiceUpdated(service.clone())).await?;
        Ok(service)
    }

    pub async fn set_service_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let mut service = self.directory.service(&id).ok_or(EngineError::NotFound(id))?;
        if service.active == active {
            return Ok(());
        }
        service.active = active;
        self.persist_directory(Event::ServiceUpdated(service)).await
    }

    /// Existing appointments keep the terms captured when they were booked.
    pub async fn delete_service(&self, id: Ulid) -> Result<(), EngineError> {
        if self.directory.service(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_directory(Event::ServiceDeleted { id }).await
    }

    fn validate_service(&self, service: &mut Service) -> Result<(), EngineError> {
        validate_name(&service.name)?;
        validate_text(&service.description, "description too long")?;
        validate_duration(service.duration_minutes)?;
        if service.price_cents < 0 {
            return Err(EngineError::LimitExceeded("price must not be negative"));
        }
        service.service_type = match service.service_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(
                self.directory
                    .service_type_named(name)
                    .ok_or_else(|| ValidationError::UnknownServiceType(name.to_string()))?
                    .name,
            ),
        };
        if service.blocks_equipment && service.service_type.is_none() {
            return Err(ValidationError::EquipmentNeedsType.into());
        }
        if let Some(pid) = service.professional_id
            && self.directory.professional(&pid).is_none()
        {
            return Err(EngineError::NotFound(pid));
        }
        Ok(())
    }

    // ── Clients ──────────────────────────────────────────────

    pub async fn create_client(&self, client: Client) -> Result<(), EngineError> {
        if self.directory.client_count() >= MAX_CLIENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many clients"));
        }
        if self.directory.contains_id(&client.id) {
            return Err(EngineError::AlreadyExists(client.id));
        }
        validate_name(&client.name)?;
        validate_text(&client.phone, "phone too long")?;
        validate_text(&client.email, "email too long")?;
        self.persist_directory(Event::ClientCreated(client)).await
    }

    /// Staff-entered customer. The phone is stored as digits only.
    pub async fn create_walk_in(&self, mut walk_in: WalkInClient) -> Result<WalkInClient, EngineError> {
        if self.directory.client_count() >= MAX_CLIENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many clients"));
        }
        if self.directory.contains_id(&walk_in.id) {
            return Err(EngineError::AlreadyExists(walk_in.id));
        }
        walk_in.name = walk_in.name.trim().to_string();
        validate_name(&walk_in.name)?;
        walk_in.phone = normalize_phone(&walk_in.phone);
        if walk_in.phone.is_empty() {
            return Err(ValidationError::MissingPhone.into());
        }
        if walk_in.phone.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("phone too long"));
        }
        self.persist_directory(Event::WalkInCreated(walk_in.clone())).await?;
        Ok(walk_in)
    }

    // ── Booking ──────────────────────────────────────────────

    /// Validate the request, then check and write under the day's lock.
    ///
    /// When the request names no professional the service owner, if any, is
    /// recorded on the appointment.
    pub async fn book_appointment(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let selection = require_selection(&req)?;
        if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        if !self.directory.booked_by_exists(selection.booked_by) {
            return Err(EngineError::NotFound(selection.booked_by.id()));
        }
        let service = self
            .directory
            .service(&selection.service_id)
            .ok_or(EngineError::NotFound(selection.service_id))?;
        if let Some(pid) = selection.professional_id {
            self.bookable_professional(pid)?;
        }
        let has_services = selection
            .professional_id
            .is_none_or(|pid| self.directory.has_active_services(pid));
        check_service_choice(&self.calendar, &selection, &service, has_services)?;

        let scheduled_at = self.calendar.slot_start(selection.day, selection.slot);
        validate_timestamp(scheduled_at)?;
        if self.appointment_index.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let terms = service.terms();
        let professional_id = selection.professional_id.or(service.professional_id);
        let query = SlotQuery {
            day: selection.day,
            terms: &terms,
            professional_id,
        };

        let ds = self.day_entry(selection.day);
        let mut guard = ds.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this day"));
        }
        if guard.get(req.id).is_some() {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if let Err(e) = check_no_conflict(&self.calendar, &query, &guard, selection.slot) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            debug!(day = %selection.day, slot = %selection.slot, "booking conflict");
            return Err(e);
        }

        let appointment = Appointment {
            id: req.id,
            scheduled_at,
            status: req.origin.initial_status(),
            service_id: service.id,
            terms: terms.clone(),
            professional_id,
            booked_by: selection.booked_by,
            completed_at: None,
            notes: req.notes,
            created_at: now_ms(),
        };
        let event = Event::AppointmentBooked {
            day: selection.day,
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            appointment = %appointment.id,
            day = %selection.day,
            slot = %selection.slot,
            status = %appointment.status,
            "appointment booked"
        );
        Ok(appointment)
    }

    // ── Lifecycle ────────────────────────────────────────────

    pub async fn transition_appointment(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        actor: Actor,
    ) -> Result<Appointment, EngineError> {
        self.transition_appointment_at(id, to, actor, now_ms()).await
    }

    /// Persist a status change decided by [`AppointmentStatus::transition`].
    /// Confirmation side effects run after the change is durable and the day
    /// lock is released; their failures never undo it.
    pub async fn transition_appointment_at(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        actor: Actor,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        let (day, mut guard) = self.resolve_appointment_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?.status;
        let next = current.transition(to, actor)?;
        let completed_at = (next == AppointmentStatus::Completed).then_some(now);

        let event = Event::AppointmentStatusChanged {
            id,
            day,
            status: next,
            completed_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        drop(guard);

        info!(appointment = %id, from = %current, to = %next, %actor, "appointment status changed");
        if next == AppointmentStatus::Confirmed {
            self.dispatch_confirmation(&updated).await;
        }
        Ok(updated)
    }

    async fn dispatch_confirmation(&self, appointment: &Appointment) {
        let (client_name, client_email) = self
            .directory
            .contact(appointment.booked_by)
            .unwrap_or_else(|| ("client".to_string(), None));
        let service_name = self
            .directory
            .service(&appointment.service_id)
            .map(|s| s.name)
            .unwrap_or_else(|| "appointment".to_string());
        let professional_name = appointment
            .professional_id
            .and_then(|pid| self.directory.professional(&pid))
            .map(|p| p.name);

        let confirmation = BookingConfirmation {
            appointment_id: appointment.id,
            client_name: client_name.clone(),
            client_email,
            service_name: service_name.clone(),
            professional_name,
            starts_at: appointment.scheduled_at,
            ends_at: appointment.nominal_end(),
            location: None,
        };
        let event = CalendarEvent {
            appointment_id: appointment.id,
            subject_name: client_name,
            service_name,
            starts_at: appointment.scheduled_at,
            duration_minutes: appointment.terms.duration_minutes,
        };
        self.dispatcher.on_confirmed(confirmation, event).await;
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut events = self.directory.snapshot_events();
        let mut appointments: Vec<(chrono::NaiveDate, Appointment)> =
            self.appointment_index.iter().map(|e| e.value().clone()).collect();
        appointments.sort_by_key(|(_, a)| (a.scheduled_at, a.id));
        events.extend(
            appointments
                .into_iter()
                .map(|(day, appointment)| Event::AppointmentBooked { day, appointment }),
        );

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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

fn validate_professional(p: &Professional) -> Result<(), EngineError> {
    validate_name(&p.name)?;
    validate_text(&p.bio, "bio too long")?;
    if p.specialties.len() > MAX_SPECIALTIES {
        return Err(EngineError::LimitExceeded("too many specialties"));
    }
    if p.specialties.iter().any(|s| s.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("specialty too long"));
    }
    Ok(())
}
