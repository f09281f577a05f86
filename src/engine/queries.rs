use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{SlotQuery, available_slots};
use super::conflict::check_offered;
use super::{Engine, EngineError, ValidationError};

/// An appointment as listed: its day, start slot and occupancy end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentRow {
    pub appointment: Appointment,
    pub day: NaiveDate,
    pub slot: Slot,
    /// `completed_at` once completed, the nominal end otherwise.
    pub ends_at: Ms,
}

impl Engine {
    /// Every slot of the grid, identical for every day.
    pub fn slots(&self) -> Vec<Slot> {
        self.calendar.grid.slots()
    }

    /// Slots on `day` that can start `service_id`, optionally with a given
    /// professional. Rejects the same service and professional choices the
    /// booking validator rejects. Takes the day's read lock.
    pub async fn compute_availability(
        &self,
        day: NaiveDate,
        service_id: Ulid,
        professional_id: Option<Ulid>,
    ) -> Result<Vec<Slot>, EngineError> {
        let service = self
            .directory
            .service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;
        if !service.active {
            return Err(ValidationError::ServiceInactive(service_id).into());
        }
        if let Some(pid) = professional_id {
            self.bookable_professional(pid)?;
            check_offered(&service, pid, self.directory.has_active_services(pid))?;
        }

        let terms = service.terms();
        let query = SlotQuery {
            day,
            terms: &terms,
            professional_id: professional_id.or(service.professional_id),
        };
        match self.get_day(&day) {
            Some(ds) => {
                let guard = ds.read().await;
                Ok(available_slots(&self.calendar, &query, &guard.appointments))
            }
            None => Ok(available_slots(&self.calendar, &query, &[])),
        }
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<AppointmentRow> {
        self.appointment_index
            .get(id)
            .map(|e| self.row(e.value().0, e.value().1.clone()))
    }

    /// Appointments matching `filter`, ordered by start time.
    pub fn list_appointments(&self, filter: &AppointmentFilter) -> Vec<AppointmentRow> {
        let mut rows: Vec<AppointmentRow> = self
            .appointment_index
            .iter()
            .filter(|e| filter.day.is_none_or(|d| e.value().0 == d))
            .filter(|e| filter.matches(&e.value().1))
            .map(|e| self.row(e.value().0, e.value().1.clone()))
            .collect();
        rows.sort_by_key(|r| (r.appointment.scheduled_at, r.appointment.id));
        rows
    }

    fn row(&self, day: NaiveDate, appointment: Appointment) -> AppointmentRow {
        let slot = Slot(self.calendar.clock.minute_of_day(appointment.scheduled_at));
        let ends_at = appointment
            .occupancy()
            .map(|s| s.end)
            .unwrap_or(appointment.scheduled_at);
        AppointmentRow {
            appointment,
            day,
            slot,
            ends_at,
        }
    }

    pub fn list_service_types(&self) -> Vec<ServiceType> {
        self.directory.list_service_types()
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.directory.service(id)
    }

    pub fn list_services(&self, professional_id: Option<Ulid>, active: Option<bool>) -> Vec<Service> {
        self.directory.list_services(professional_id, active)
    }

    pub fn get_professional(&self, id: &Ulid) -> Option<Professional> {
        self.directory.professional(id)
    }

    pub fn list_professionals(&self, active: Option<bool>) -> Vec<Professional> {
        self.directory.list_professionals(active)
    }

    pub fn search_clients(&self, needle: &str) -> Vec<ClientMatch> {
        self.directory.search_clients(needle)
    }
}
