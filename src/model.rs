use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only timestamp type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

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

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Slots ────────────────────────────────────────────────────────

/// A bookable start time, stored as minutes past local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot(pub u16);

impl Slot {
    pub fn minute(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSlotError(pub String);

impl fmt::Display for ParseSlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid slot '{}': expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseSlotError {}

impl FromStr for Slot {
    type Err = ParseSlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSlotError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        let h: u16 = h.parse().map_err(|_| err())?;
        let m: u16 = m.parse().map_err(|_| err())?;
        if h >= 24 || m >= 60 {
            return Err(err());
        }
        Ok(Slot(h * 60 + m))
    }
}

// ── Directory entities ───────────────────────────────────────────

/// The attributes of a service that decide what an appointment blocks.
/// Captured onto the appointment at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTerms {
    pub duration_minutes: u32,
    pub service_type: Option<String>,
    pub blocks_equipment: bool,
}

impl ServiceTerms {
    /// Both services tie up the same single-unit equipment.
    pub fn shares_equipment_with(&self, other: &ServiceTerms) -> bool {
        self.blocks_equipment
            && other.blocks_equipment
            && self.service_type.is_some()
            && self.service_type == other.service_type
    }
}

/// A catalog entry naming a kind of service. Equipment sharing compares
/// these names, so services pick one from the catalog instead of typing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceType {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub price_cents: i64,
    pub active: bool,
    /// Catalog name of a [`ServiceType`].
    pub service_type: Option<String>,
    pub blocks_equipment: bool,
    /// Owning professional; `None` in single-professional deployments.
    pub professional_id: Option<Ulid>,
}

impl Service {
    pub fn terms(&self) -> ServiceTerms {
        ServiceTerms {
            duration_minutes: self.duration_minutes,
            service_type: self.service_type.clone(),
            blocks_equipment: self.blocks_equipment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    pub name: String,
    pub bio: Option<String>,
    pub specialties: Vec<String>,
    pub active: bool,
}

/// A client with a self-service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// A customer entered by staff, without an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkInClient {
    pub id: Ulid,
    pub name: String,
    /// Digits only.
    pub phone: String,
    pub created_by: Option<Ulid>,
}

/// Who an appointment is for. Exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookedBy {
    Client(Ulid),
    WalkIn(Ulid),
}

impl BookedBy {
    pub fn id(&self) -> Ulid {
        match self {
            BookedBy::Client(id) | BookedBy::WalkIn(id) => *id,
        }
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "cancelled" | "canceled" => Ok(AppointmentStatus::Cancelled),
            "completed" => Ok(AppointmentStatus::Completed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Who is driving a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Staff,
    Client,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::Staff => "staff",
            Actor::Client => "client",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "staff" | "professional" | "admin" => Ok(Actor::Staff),
            "client" => Ok(Actor::Client),
            other => Err(format!("unknown actor: {other}")),
        }
    }
}

/// Where a booking came from; decides its initial status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOrigin {
    SelfService,
    Staff,
}

impl BookingOrigin {
    pub fn initial_status(self) -> AppointmentStatus {
        match self {
            BookingOrigin::SelfService => AppointmentStatus::Pending,
            BookingOrigin::Staff => AppointmentStatus::Confirmed,
        }
    }
}

impl FromStr for BookingOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" | "self" | "self_service" => Ok(BookingOrigin::SelfService),
            "staff" | "professional" | "admin" => Ok(BookingOrigin::Staff),
            other => Err(format!("unknown origin: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub scheduled_at: Ms,
    pub status: AppointmentStatus,
    pub service_id: Ulid,
    pub terms: ServiceTerms,
    pub professional_id: Option<Ulid>,
    pub booked_by: BookedBy,
    pub completed_at: Option<Ms>,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Appointment {
    /// Nominal end of the appointment from its service duration.
    pub fn nominal_end(&self) -> Ms {
        self.scheduled_at + self.terms.duration_minutes as Ms * MINUTE_MS
    }

    /// `[scheduled_at, end)` where end is `completed_at` once set, otherwise
    /// the nominal end. `None` when the interval is empty.
    pub fn occupancy(&self) -> Option<Span> {
        let end = self.completed_at.unwrap_or_else(|| self.nominal_end());
        (end > self.scheduled_at).then(|| Span::new(self.scheduled_at, end))
    }

    /// Cancelled and completed appointments never block new bookings.
    pub fn blocks_future_bookings(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// All appointments of one local calendar day.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub day: NaiveDate,
    /// Sorted by `scheduled_at`.
    pub appointments: Vec<Appointment>,
}

impl DaySchedule {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `scheduled_at`.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.scheduled_at <= appointment.scheduled_at);
        self.appointments.insert(pos, appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments that still hold their interval.
    pub fn active(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.iter().filter(|a| a.blocks_future_bookings())
    }
}

/// Flat event records. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalCreated(Professional),
    ProfessionalUpdated(Professional),
    ServiceCreated(Service),
    ServiceUpdated(Service),
    ServiceDeleted {
        id: Ulid,
    },
    ClientCreated(Client),
    WalkInCreated(WalkInClient),
    AppointmentBooked {
        day: NaiveDate,
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        day: NaiveDate,
        status: AppointmentStatus,
        completed_at: Option<Ms>,
    },
    ServiceTypeCreated(ServiceType),
}

impl Event {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ProfessionalCreated(_) => "professional_created",
            Event::ProfessionalUpdated(_) => "professional_updated",
            Event::ServiceCreated(_) => "service_created",
            Event::ServiceUpdated(_) => "service_updated",
            Event::ServiceDeleted { .. } => "service_deleted",
            Event::ClientCreated(_) => "client_created",
            Event::WalkInCreated(_) => "walk_in_created",
            Event::AppointmentBooked { .. } => "appointment_booked",
            Event::AppointmentStatusChanged { .. } => "appointment_status_changed",
            Event::ServiceTypeCreated(_) => "service_type_created",
        }
    }

    /// The schedule day an appointment event lands on.
    pub fn day(&self) -> Option<NaiveDate> {
        match self {
            Event::AppointmentBooked { day, .. } | Event::AppointmentStatusChanged { day, .. } => {
                Some(*day)
            }
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A row of a client search: registered and walk-in clients together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMatch {
    pub id: Ulid,
    pub name: String,
    pub phone: Option<String>,
    pub walk_in: bool,
}

/// Filter for appointment listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppointmentFilter {
    pub client_id: Option<Ulid>,
    pub walk_in_client_id: Option<Ulid>,
    pub professional_id: Option<Ulid>,
    pub status: Option<AppointmentStatus>,
    /// Applied by the engine when picking day partitions, not by `matches`.
    pub day: Option<NaiveDate>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        if let Some(cid) = self.client_id
            && a.booked_by != BookedBy::Client(cid)
        {
            return false;
        }
        if let Some(wid) = self.walk_in_client_id
            && a.booked_by != BookedBy::WalkIn(wid)
        {
            return false;
        }
        if let Some(pid) = self.professional_id
            && a.professional_id != Some(pid)
        {
            return false;
        }
        if let Some(status) = self.status
            && a.status != status
        {
            return false;
        }
        true
    }
}
