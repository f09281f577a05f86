use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{SlotQuery, is_available};
use super::grid::Calendar;
use super::{EngineError, ValidationError};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// A booking as submitted. Every selection is optional so that an
/// incomplete form reports which field is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub professional_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub slot: Option<Slot>,
    pub booked_by: Option<BookedBy>,
    pub origin: BookingOrigin,
    pub notes: Option<String>,
}

/// A request with every required selection present.
#[derive(Debug, Clone)]
pub(crate) struct Selection {
    pub professional_id: Option<Ulid>,
    pub service_id: Ulid,
    pub day: NaiveDate,
    pub slot: Slot,
    pub booked_by: BookedBy,
}

/// Required-field check, in the order a booking form is filled.
pub(crate) fn require_selection(req: &BookingRequest) -> Result<Selection, ValidationError> {
    let booked_by = req.booked_by.ok_or(ValidationError::MissingBookedBy)?;
    let service_id = req.service_id.ok_or(ValidationError::MissingService)?;
    let day = req.date.ok_or(ValidationError::MissingDate)?;
    let slot = req.slot.ok_or(ValidationError::MissingSlot)?;
    Ok(Selection {
        professional_id: req.professional_id,
        service_id,
        day,
        slot,
        booked_by,
    })
}

/// Check the chosen service against the chosen professional and the grid.
pub(crate) fn check_service_choice(
    calendar: &Calendar,
    selection: &Selection,
    service: &Service,
    professional_has_active_services: bool,
) -> Result<(), ValidationError> {
    if let Some(pid) = selection.professional_id {
        check_offered(service, pid, professional_has_active_services)?;
    }
    if !service.active {
        return Err(ValidationError::ServiceInactive(service.id));
    }
    validate_duration(service.duration_minutes)?;
    if !calendar.grid.contains(selection.slot.minute()) {
        return Err(ValidationError::SlotNotInGrid(selection.slot));
    }
    Ok(())
}

/// Whether `professional_id` can perform `service` at all. Shared by the
/// availability query and the booking validator.
pub(crate) fn check_offered(
    service: &Service,
    professional_id: Ulid,
    professional_has_active_services: bool,
) -> Result<(), ValidationError> {
    if !professional_has_active_services {
        return Err(ValidationError::NoActiveServices(professional_id));
    }
    if service.professional_id.is_some_and(|owner| owner != professional_id) {
        return Err(ValidationError::ServiceNotOffered {
            service_id: service.id,
            professional_id,
        });
    }
    Ok(())
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), ValidationError> {
    if minutes == 0 || minutes > MAX_SERVICE_DURATION_MINUTES {
        return Err(ValidationError::InvalidDuration(minutes));
    }
    Ok(())
}

pub(crate) fn validate_timestamp(at: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName.into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(text: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    if text.as_ref().is_some_and(|t| t.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Last line of defence: re-run the resolver against the live day. The
/// caller holds the day's write lock, so nothing can slip in between this
/// check and the write.
pub(crate) fn check_no_conflict(
    calendar: &Calendar,
    query: &SlotQuery<'_>,
    day: &DaySchedule,
    slot: Slot,
) -> Result<(), EngineError> {
    if is_available(calendar, query, &day.appointments, slot) {
        Ok(())
    } else {
        Err(EngineError::Conflict { slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BookingRequest {
        BookingRequest {
            id: Ulid::new(),
            professional_id: None,
            service_id: Some(Ulid::new()),
            date: NaiveDate::from_ymd_opt(2026, 10, 20),
            slot: Some(Slot(9 * 60)),
            booked_by: Some(BookedBy::Client(Ulid::new())),
            origin: BookingOrigin::SelfService,
            notes: None,
        }
    }

    fn service(owner: Option<Ulid>) -> Service {
        Service {
            id: Ulid::new(),
            name: "Limpeza de pele".into(),
            description: None,
            duration_minutes: 60,
            price_cents: 15_000,
            active: true,
            service_type: None,
            blocks_equipment: false,
            professional_id: owner,
        }
    }

    #[test]
    fn missing_fields_reported_in_form_order() {
        let mut req = request();
        req.booked_by = None;
        req.service_id = None;
        assert_eq!(require_selection(&req).unwrap_err(), ValidationError::MissingBookedBy);

        let mut req = request();
        req.service_id = None;
        req.slot = None;
        assert_eq!(require_selection(&req).unwrap_err(), ValidationError::MissingService);

        let mut req = request();
        req.date = None;
        assert_eq!(require_selection(&req).unwrap_err(), ValidationError::MissingDate);

        let mut req = request();
        req.slot = None;
        assert_eq!(require_selection(&req).unwrap_err(), ValidationError::MissingSlot);

        assert!(require_selection(&request()).is_ok());
    }

    #[test]
    fn service_choice_rules() {
        let cal = Calendar::default();
        let pid = Ulid::new();
        let mut req = request();
        req.professional_id = Some(pid);
        let sel = require_selection(&req).unwrap();

        let own = service(Some(pid));
        assert!(check_service_choice(&cal, &sel, &own, true).is_ok());
        assert_eq!(
            check_service_choice(&cal, &sel, &own, false),
            Err(ValidationError::NoActiveServices(pid))
        );

        let foreign = service(Some(Ulid::new()));
        assert!(matches!(
            check_service_choice(&cal, &sel, &foreign, true),
            Err(ValidationError::ServiceNotOffered { .. })
        ));

        let shared = service(None);
        assert!(check_service_choice(&cal, &sel, &shared, true).is_ok());

        let mut inactive = service(Some(pid));
        inactive.active = false;
        assert_eq!(
            check_service_choice(&cal, &sel, &inactive, true),
            Err(ValidationError::ServiceInactive(inactive.id))
        );
    }

    #[test]
    fn slot_must_be_on_grid() {
        let cal = Calendar::default();
        let mut req = request();
        req.slot = Some(Slot(12 * 60 + 15));
        let sel = require_selection(&req).unwrap();
        assert_eq!(
            check_service_choice(&cal, &sel, &service(None), true),
            Err(ValidationError::SlotNotInGrid(Slot(12 * 60 + 15)))
        );
    }

    #[test]
    fn duration_bounds() {
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(15).is_ok());
        assert!(validate_duration(MAX_SERVICE_DURATION_MINUTES + 1).is_err());
    }

    #[test]
    fn name_and_timestamp_checks() {
        assert!(matches!(
            validate_name("   "),
            Err(EngineError::Validation(ValidationError::EmptyName))
        ));
        assert!(validate_name("Ana").is_ok());
        assert!(matches!(
            validate_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_timestamp(0).is_err());
        assert!(validate_timestamp(now_ms()).is_ok());
    }
}
