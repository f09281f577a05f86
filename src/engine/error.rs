use std::fmt;

use ulid::Ulid;

use crate::model::{Actor, AppointmentStatus, Slot};

/// A required booking input is missing or unusable. Recoverable by fixing
/// the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingBookedBy,
    AmbiguousBookedBy,
    MissingService,
    MissingDate,
    MissingSlot,
    NoActiveServices(Ulid),
    ServiceInactive(Ulid),
    ProfessionalInactive(Ulid),
    ServiceNotOffered { service_id: Ulid, professional_id: Ulid },
    SlotNotInGrid(Slot),
    InvalidDuration(u32),
    EmptyName,
    MissingPhone,
    UnknownServiceType(String),
    EquipmentNeedsType,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingBookedBy => write!(f, "select a client or walk-in client"),
            ValidationError::AmbiguousBookedBy => {
                write!(f, "an appointment is for a client or a walk-in client, not both")
            }
            ValidationError::MissingService => write!(f, "select a service"),
            ValidationError::MissingDate => write!(f, "select a date"),
            ValidationError::MissingSlot => write!(f, "select a time slot"),
            ValidationError::NoActiveServices(id) => {
                write!(f, "professional {id} has no active services")
            }
            ValidationError::ServiceInactive(id) => write!(f, "service {id} is not active"),
            ValidationError::ProfessionalInactive(id) => write!(f, "professional {id} is not active"),
            ValidationError::ServiceNotOffered { service_id, professional_id } => {
                write!(f, "service {service_id} is not offered by professional {professional_id}")
            }
            ValidationError::SlotNotInGrid(slot) => write!(f, "{slot} is not a bookable slot"),
            ValidationError::InvalidDuration(m) => write!(f, "invalid service duration: {m} minutes"),
            ValidationError::EmptyName => write!(f, "name must not be empty"),
            ValidationError::MissingPhone => write!(f, "a phone number is required"),
            ValidationError::UnknownServiceType(name) => write!(f, "unknown service type '{name}'"),
            ValidationError::EquipmentNeedsType => {
                write!(f, "a service that blocks equipment needs a service type")
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    /// The slot was taken between reading availability and booking.
    Conflict { slot: Slot },
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    NotPermitted {
        actor: Actor,
        to: AppointmentStatus,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "validation failed: {e}"),
            EngineError::Conflict { slot } => {
                write!(f, "slot {slot} is no longer available, please pick another")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::NotPermitted { actor, to } => {
                write!(f, "{actor} may not move an appointment to {to}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
