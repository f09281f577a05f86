use std::sync::Mutex;

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::dispatch::{BookingConfirmation, CalendarEvent, CalendarSink, CollaboratorError, Notifier};
use crate::limits::*;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("salonbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Calendar::default(), Arc::new(Dispatcher::logging())).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

fn s(label: &str) -> Slot {
    label.parse().unwrap()
}

fn service(minutes: u32) -> Service {
    Service {
        id: Ulid::new(),
        name: format!("Service {minutes}"),
        description: None,
        duration_minutes: minutes,
        price_cents: 10_000,
        active: true,
        service_type: None,
        blocks_equipment: false,
        professional_id: None,
    }
}

fn laser(owner: Ulid) -> Service {
    Service {
        name: "Laser".into(),
        service_type: Some("laser".into()),
        blocks_equipment: true,
        professional_id: Some(owner),
        ..service(30)
    }
}

fn service_type(name: &str) -> ServiceType {
    ServiceType {
        id: Ulid::new(),
        name: name.into(),
    }
}

fn professional(name: &str) -> Professional {
    Professional {
        id: Ulid::new(),
        name: name.into(),
        bio: None,
        specialties: vec![],
        active: true,
    }
}

fn client(email: Option<&str>) -> Client {
    Client {
        id: Ulid::new(),
        name: "Maria".into(),
        phone: Some("63992906871".into()),
        email: email.map(String::from),
    }
}

fn request(service_id: Ulid, client_id: Ulid, slot: &str) -> BookingRequest {
    BookingRequest {
        id: Ulid::new(),
        professional_id: None,
        service_id: Some(service_id),
        date: Some(day()),
        slot: Some(s(slot)),
        booked_by: Some(BookedBy::Client(client_id)),
        origin: BookingOrigin::SelfService,
        notes: None,
    }
}

/// An engine with one service of `minutes` and one client.
async fn salon(name: &str, minutes: u32) -> (Engine, Service, Client) {
    let engine = new_engine(name);
    let svc = service(minutes);
    let c = client(None);
    engine.create_service(svc.clone()).await.unwrap();
    engine.create_client(c.clone()).await.unwrap();
    (engine, svc, c)
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn book_then_slot_run_disappears() {
    let (engine, svc, c) = salon("book_run.wal", 30).await;

    let appt = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();
    assert_eq!(appt.status, AppointmentStatus::Pending);
    assert_eq!(appt.scheduled_at, engine.calendar.slot_start(day(), s("09:00")));

    let free = engine.compute_availability(day(), svc.id, None).await.unwrap();
    assert!(free.contains(&s("08:30")));
    assert!(!free.contains(&s("08:45")));
    assert!(!free.contains(&s("09:00")));
    assert!(!free.contains(&s("09:15")));
    assert!(free.contains(&s("09:30")));
}

#[tokio::test]
async fn staff_bookings_start_confirmed() {
    let (engine, svc, c) = salon("staff_origin.wal", 30).await;
    let mut req = request(svc.id, c.id, "10:00");
    req.origin = BookingOrigin::Staff;
    let appt = engine.book_appointment(req).await.unwrap();
    assert_eq!(appt.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn overlapping_booking_conflicts() {
    let (engine, svc, c) = salon("overlap.wal", 60).await;
    assert_ok!(engine.book_appointment(request(svc.id, c.id, "09:00")).await);

    let result = engine.book_appointment(request(svc.id, c.id, "09:30")).await;
    assert!(matches!(result, Err(EngineError::Conflict { slot }) if slot == s("09:30")));

    // Starts exactly when the first one ends.
    assert_ok!(engine.book_appointment(request(svc.id, c.id, "10:00")).await);
}

#[tokio::test]
async fn concurrent_same_slot_has_one_winner() {
    let (engine, svc, c) = salon("concurrent.wal", 45).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let req = request(svc.id, c.id, "14:00");
        handles.push(tokio::spawn(async move { engine.book_appointment(req).await }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(engine.list_appointments(&AppointmentFilter::default()).len(), 1);
}

#[tokio::test]
async fn concurrent_overlapping_slots_never_double_book() {
    let (engine, svc, c) = salon("concurrent_overlap.wal", 60).await;
    let engine = Arc::new(engine);

    let starts = ["13:00", "13:15", "13:30", "13:45", "14:00", "14:15", "14:30"];
    let mut handles = Vec::new();
    for start in starts {
        let engine = engine.clone();
        let req = request(svc.id, c.id, start);
        handles.push(tokio::spawn(async move { engine.book_appointment(req).await }));
    }
    for h in handles {
        let _ = h.await.unwrap();
    }

    let rows = engine.list_appointments(&AppointmentFilter::default());
    assert!(!rows.is_empty());
    for pair in rows.windows(2) {
        assert!(
            pair[0].ends_at <= pair[1].appointment.scheduled_at,
            "{} overlaps {}",
            pair[0].slot,
            pair[1].slot
        );
    }
}

#[tokio::test]
async fn validation_reports_first_missing_field() {
    let (engine, svc, c) = salon("validation_order.wal", 30).await;

    let mut req = request(svc.id, c.id, "09:00");
    req.booked_by = None;
    req.service_id = None;
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::MissingBookedBy)));

    let mut req = request(svc.id, c.id, "09:00");
    req.service_id = None;
    req.slot = None;
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::MissingService)));

    let mut req = request(svc.id, c.id, "09:00");
    req.date = None;
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::MissingDate)));

    let mut req = request(svc.id, c.id, "09:00");
    req.slot = None;
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::MissingSlot)));
}

#[tokio::test]
async fn unknown_references_are_not_found() {
    let (engine, svc, c) = salon("unknown_refs.wal", 30).await;

    let ghost = Ulid::new();
    let err = engine.book_appointment(request(ghost, c.id, "09:00")).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(id) if id == ghost));

    let err = engine.book_appointment(request(svc.id, ghost, "09:00")).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(id) if id == ghost));

    // A client id used as a walk-in is not found.
    let mut req = request(svc.id, c.id, "09:00");
    req.booked_by = Some(BookedBy::WalkIn(c.id));
    assert!(matches!(
        engine.book_appointment(req).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn slot_outside_grid_is_rejected() {
    let (engine, svc, c) = salon("outside_grid.wal", 30).await;
    for bad in ["12:00", "07:45", "09:10", "17:00"] {
        let err = engine.book_appointment(request(svc.id, c.id, bad)).await.unwrap_err();
        assert!(
            matches!(err, EngineError::Validation(ValidationError::SlotNotInGrid(slot)) if slot == s(bad)),
            "{bad}: {err}"
        );
    }
}

#[tokio::test]
async fn booking_cannot_run_into_lunch() {
    let (engine, svc, c) = salon("lunch_run.wal", 90).await;

    let free = engine.compute_availability(day(), svc.id, None).await.unwrap();
    assert!(free.contains(&s("10:30")));
    assert!(!free.contains(&s("11:15")));
    assert!(!free.contains(&s("11:45")));

    let err = engine.book_appointment(request(svc.id, c.id, "11:15")).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

#[tokio::test]
async fn inactive_service_is_rejected() {
    let (engine, svc, c) = salon("inactive.wal", 30).await;
    engine.set_service_active(svc.id, false).await.unwrap();

    let err = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::ServiceInactive(_))));

    let err = engine.compute_availability(day(), svc.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::ServiceInactive(_))));
}

#[tokio::test]
async fn professional_must_offer_the_service() {
    let engine = new_engine("not_offered.wal");
    let ana = professional("Ana");
    let bia = professional("Bia");
    engine.create_professional(ana.clone()).await.unwrap();
    engine.create_professional(bia.clone()).await.unwrap();
    let ana_service = Service {
        professional_id: Some(ana.id),
        ..service(30)
    };
    let bia_service = Service {
        professional_id: Some(bia.id),
        ..service(45)
    };
    engine.create_service(ana_service.clone()).await.unwrap();
    engine.create_service(bia_service.clone()).await.unwrap();
    let c = client(None);
    engine.create_client(c.clone()).await.unwrap();

    let mut req = request(bia_service.id, c.id, "09:00");
    req.professional_id = Some(ana.id);
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::ServiceNotOffered { professional_id, .. }) if professional_id == ana.id
    ));

    // A professional with nothing active cannot be booked at all.
    engine.set_service_active(ana_service.id, false).await.unwrap();
    let mut req = request(ana_service.id, c.id, "09:00");
    req.professional_id = Some(ana.id);
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::NoActiveServices(id)) if id == ana.id));
}

#[tokio::test]
async fn appointment_inherits_service_owner() {
    let engine = new_engine("inherit_owner.wal");
    let ana = professional("Ana");
    engine.create_professional(ana.clone()).await.unwrap();
    let svc = Service {
        professional_id: Some(ana.id),
        ..service(30)
    };
    engine.create_service(svc.clone()).await.unwrap();
    let c = client(None);
    engine.create_client(c.clone()).await.unwrap();

    let appt = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();
    assert_eq!(appt.professional_id, Some(ana.id));

    let by_ana = engine.list_appointments(&AppointmentFilter {
        professional_id: Some(ana.id),
        ..Default::default()
    });
    assert_eq!(by_ana.len(), 1);
}

#[tokio::test]
async fn professionals_book_in_parallel_unless_equipment_is_shared() {
    let engine = new_engine("parallel_pros.wal");
    let ana = professional("Ana");
    let bia = professional("Bia");
    engine.create_professional(ana.clone()).await.unwrap();
    engine.create_professional(bia.clone()).await.unwrap();
    let ana_massage = Service {
        professional_id: Some(ana.id),
        ..service(60)
    };
    let bia_massage = Service {
        professional_id: Some(bia.id),
        ..service(60)
    };
    engine.create_service_type(service_type("laser")).await.unwrap();
    let ana_laser = laser(ana.id);
    let bia_laser = laser(bia.id);
    for svc in [&ana_massage, &bia_massage, &ana_laser, &bia_laser] {
        engine.create_service(svc.clone()).await.unwrap();
    }
    let c = client(None);
    engine.create_client(c.clone()).await.unwrap();

    assert_ok!(engine.book_appointment(request(ana_massage.id, c.id, "09:00")).await);
    assert_ok!(engine.book_appointment(request(bia_massage.id, c.id, "09:00")).await);

    assert_ok!(engine.book_appointment(request(ana_laser.id, c.id, "14:00")).await);
    // Same laser unit, other professional.
    let err = engine
        .book_appointment(request(bia_laser.id, c.id, "14:15"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
    let free = engine.compute_availability(day(), bia_laser.id, None).await.unwrap();
    assert!(!free.contains(&s("14:00")));
    assert!(free.contains(&s("14:30")));
    // Bia's massage is unaffected by Ana's laser.
    let free = engine.compute_availability(day(), bia_massage.id, None).await.unwrap();
    assert!(free.contains(&s("14:00")));
}

#[tokio::test]
async fn availability_applies_the_ownership_rule() {
    let engine = new_engine("availability_owner.wal");
    let ana = professional("Ana");
    let bia = professional("Bia");
    engine.create_professional(ana.clone()).await.unwrap();
    engine.create_professional(bia.clone()).await.unwrap();
    let ana_service = Service {
        professional_id: Some(ana.id),
        ..service(30)
    };
    let bia_service = Service {
        professional_id: Some(bia.id),
        ..service(30)
    };
    engine.create_service(ana_service.clone()).await.unwrap();
    engine.create_service(bia_service.clone()).await.unwrap();

    let err = engine
        .compute_availability(day(), bia_service.id, Some(ana.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::ServiceNotOffered { professional_id, .. }) if professional_id == ana.id
    ));
    assert_ok!(engine.compute_availability(day(), ana_service.id, Some(ana.id)).await);

    let ghost = Ulid::new();
    assert!(matches!(
        engine.compute_availability(day(), ana_service.id, Some(ghost)).await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
}

#[tokio::test]
async fn inactive_professional_cannot_be_booked() {
    let engine = new_engine("inactive_professional.wal");
    let mut ana = professional("Ana");
    engine.create_professional(ana.clone()).await.unwrap();
    let svc = Service {
        professional_id: Some(ana.id),
        ..service(30)
    };
    engine.create_service(svc.clone()).await.unwrap();
    let c = client(None);
    engine.create_client(c.clone()).await.unwrap();

    ana.active = false;
    engine.update_professional(ana.clone()).await.unwrap();

    let mut req = request(svc.id, c.id, "09:00");
    req.professional_id = Some(ana.id);
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::ProfessionalInactive(id)) if id == ana.id));

    let err = engine
        .compute_availability(day(), svc.id, Some(ana.id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::ProfessionalInactive(id)) if id == ana.id));
    assert!(engine.list_appointments(&AppointmentFilter::default()).is_empty());
}

#[tokio::test]
async fn blocked_morning_scenario() {
    let (engine, svc, c) = salon("scenario.wal", 30).await;
    let hour = service(60);
    engine.create_service(hour.clone()).await.unwrap();
    engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();

    let free = engine.compute_availability(day(), hour.id, None).await.unwrap();
    assert!(free.contains(&s("08:00")));
    for taken in ["08:15", "08:30", "08:45", "09:00", "09:15"] {
        assert!(!free.contains(&s(taken)), "{taken} should be excluded");
    }
    assert!(free.contains(&s("09:30")));
}

#[tokio::test]
async fn duplicate_appointment_id_rejected() {
    let (engine, svc, c) = salon("dup_appt.wal", 30).await;
    let req = request(svc.id, c.id, "09:00");
    let mut again = req.clone();
    again.slot = Some(s("15:00"));
    engine.book_appointment(req).await.unwrap();
    assert!(matches!(
        engine.book_appointment(again).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn notes_are_length_limited() {
    let (engine, svc, c) = salon("notes_limit.wal", 30).await;
    let mut req = request(svc.id, c.id, "09:00");
    req.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
    assert!(matches!(
        engine.book_appointment(req).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn deleted_service_keeps_booked_terms() {
    let (engine, svc, c) = salon("deleted_service.wal", 45).await;
    let appt = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();
    engine.delete_service(svc.id).await.unwrap();

    let row = engine.get_appointment(&appt.id).unwrap();
    assert_eq!(row.appointment.terms.duration_minutes, 45);
    assert!(engine.get_service(&svc.id).is_none());
    assert!(matches!(
        engine.compute_availability(day(), svc.id, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn cancel_frees_the_slot() {
    let (engine, svc, c) = salon("cancel_frees.wal", 30).await;
    let appt = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();

    let cancelled = engine
        .transition_appointment(appt.id, AppointmentStatus::Cancelled, Actor::Client)
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_ok!(engine.book_appointment(request(svc.id, c.id, "09:00")).await);
}

#[tokio::test]
async fn completion_records_time_and_frees_the_slot() {
    let (engine, svc, c) = salon("complete.wal", 60).await;
    let mut req = request(svc.id, c.id, "09:00");
    req.origin = BookingOrigin::Staff;
    let appt = engine.book_appointment(req).await.unwrap();

    let done_at = appt.scheduled_at + 20 * MINUTE_MS;
    let done = engine
        .transition_appointment_at(appt.id, AppointmentStatus::Completed, Actor::Staff, done_at)
        .await
        .unwrap();
    assert_eq!(done.completed_at, Some(done_at));

    let row = engine.get_appointment(&appt.id).unwrap();
    assert_eq!(row.ends_at, done_at);

    let free = engine.compute_availability(day(), svc.id, None).await.unwrap();
    assert!(free.contains(&s("09:00")));
    assert!(free.contains(&s("09:30")));
}

#[tokio::test]
async fn terminal_appointments_cannot_move() {
    let (engine, svc, c) = salon("terminal.wal", 30).await;
    let appt = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();
    engine
        .transition_appointment(appt.id, AppointmentStatus::Cancelled, Actor::Staff)
        .await
        .unwrap();

    for to in [AppointmentStatus::Confirmed, AppointmentStatus::Completed, AppointmentStatus::Pending] {
        let err = engine.transition_appointment(appt.id, to, Actor::Staff).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }), "{to}: {err}");
    }
}

#[tokio::test]
async fn clients_cannot_confirm() {
    let (engine, svc, c) = salon("client_confirm.wal", 30).await;
    let appt = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();
    let err = engine
        .transition_appointment(appt.id, AppointmentStatus::Confirmed, Actor::Client)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotPermitted { actor: Actor::Client, .. }));
    assert_eq!(
        engine.get_appointment(&appt.id).unwrap().appointment.status,
        AppointmentStatus::Pending
    );
}

#[tokio::test]
async fn transition_unknown_appointment() {
    let engine = new_engine("transition_unknown.wal");
    assert_err!(
        engine
            .transition_appointment(Ulid::new(), AppointmentStatus::Confirmed, Actor::Staff)
            .await
    );
}

// ── Confirmation side effects ────────────────────────────

#[derive(Default)]
struct Recorder {
    confirmations: Mutex<Vec<BookingConfirmation>>,
    events: Mutex<Vec<CalendarEvent>>,
    fail: bool,
}

#[async_trait]
impl Notifier for Recorder {
    async fn send_booking_confirmation(&self, confirmation: &BookingConfirmation) -> Result<(), CollaboratorError> {
        self.confirmations.lock().unwrap().push(confirmation.clone());
        if self.fail {
            return Err(CollaboratorError::Rejected {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarSink for Recorder {
    async fn create_calendar_event(&self, event: &CalendarEvent) -> Result<(), CollaboratorError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(CollaboratorError::Http("connection refused".into()));
        }
        Ok(())
    }
}

async fn recorded_salon(name: &str, fail: bool) -> (Engine, Arc<Recorder>, Service, Client) {
    let rec = Arc::new(Recorder {
        fail,
        ..Default::default()
    });
    let dispatcher = Arc::new(Dispatcher::new(rec.clone(), rec.clone()));
    let engine = Engine::new(test_wal_path(name), Calendar::default(), dispatcher).unwrap();
    let ana = professional("Ana");
    engine.create_professional(ana.clone()).await.unwrap();
    let svc = Service {
        name: "Limpeza de pele".into(),
        professional_id: Some(ana.id),
        ..service(60)
    };
    engine.create_service(svc.clone()).await.unwrap();
    let c = client(Some("maria@example.com"));
    engine.create_client(c.clone()).await.unwrap();
    (engine, rec, svc, c)
}

#[tokio::test]
async fn confirming_sends_invite_and_calendar_event() {
    let (engine, rec, svc, c) = recorded_salon("confirm_dispatch.wal", false).await;
    let appt = engine.book_appointment(request(svc.id, c.id, "10:00")).await.unwrap();
    assert!(rec.confirmations.lock().unwrap().is_empty());

    engine
        .transition_appointment(appt.id, AppointmentStatus::Confirmed, Actor::Staff)
        .await
        .unwrap();

    let sent = rec.confirmations.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].client_email.as_deref(), Some("maria@example.com"));
    assert_eq!(sent[0].service_name, "Limpeza de pele");
    assert_eq!(sent[0].professional_name.as_deref(), Some("Ana"));
    assert_eq!(sent[0].ends_at - sent[0].starts_at, 60 * MINUTE_MS);

    let events = rec.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject_name, "Maria");
    assert_eq!(events[0].duration_minutes, 60);
}

#[tokio::test]
async fn staff_booking_sends_nothing() {
    let (engine, rec, svc, c) = recorded_salon("staff_no_dispatch.wal", false).await;
    let mut req = request(svc.id, c.id, "10:00");
    req.origin = BookingOrigin::Staff;
    engine.book_appointment(req).await.unwrap();
    assert!(rec.confirmations.lock().unwrap().is_empty());
    assert!(rec.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_side_effects_keep_the_confirmation() {
    let (engine, rec, svc, c) = recorded_salon("dispatch_failure.wal", true).await;
    let appt = engine.book_appointment(request(svc.id, c.id, "10:00")).await.unwrap();

    let confirmed = assert_ok!(
        engine
            .transition_appointment(appt.id, AppointmentStatus::Confirmed, Actor::Staff)
            .await
    );
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    assert_eq!(rec.confirmations.lock().unwrap().len(), 1);
    assert_eq!(rec.events.lock().unwrap().len(), 1);
    assert_eq!(
        engine.get_appointment(&appt.id).unwrap().appointment.status,
        AppointmentStatus::Confirmed
    );
}

// ── Directories ──────────────────────────────────────────

#[tokio::test]
async fn walk_in_phone_is_normalised() {
    let engine = new_engine("walk_in_phone.wal");
    let w = engine
        .create_walk_in(WalkInClient {
            id: Ulid::new(),
            name: "  Joana ".into(),
            phone: "(63) 99290-6871".into(),
            created_by: None,
        })
        .await
        .unwrap();
    assert_eq!(w.phone, "63992906871");
    assert_eq!(w.name, "Joana");

    let hits = engine.search_clients("9929");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].walk_in);

    let err = engine
        .create_walk_in(WalkInClient {
            id: Ulid::new(),
            name: "Sem telefone".into(),
            phone: "n/a".into(),
            created_by: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::MissingPhone)));
}

#[tokio::test]
async fn walk_in_bookings_are_listed_by_walk_in() {
    let (engine, svc, _) = salon("walk_in_listing.wal", 30).await;
    let w = engine
        .create_walk_in(WalkInClient {
            id: Ulid::new(),
            name: "Joana".into(),
            phone: "63911112222".into(),
            created_by: None,
        })
        .await
        .unwrap();
    let mut req = request(svc.id, w.id, "11:00");
    req.booked_by = Some(BookedBy::WalkIn(w.id));
    req.origin = BookingOrigin::Staff;
    engine.book_appointment(req).await.unwrap();

    let rows = engine.list_appointments(&AppointmentFilter {
        walk_in_client_id: Some(w.id),
        ..Default::default()
    });
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].slot, s("11:00"));
    assert_eq!(rows[0].day, day());
    assert!(
        engine
            .list_appointments(&AppointmentFilter {
                client_id: Some(w.id),
                ..Default::default()
            })
            .is_empty()
    );
}

#[tokio::test]
async fn listing_filters_by_day_and_sorts() {
    let (engine, svc, c) = salon("listing_days.wal", 30).await;
    let tomorrow = day().succ_opt().unwrap();
    engine.book_appointment(request(svc.id, c.id, "15:00")).await.unwrap();
    engine.book_appointment(request(svc.id, c.id, "08:00")).await.unwrap();
    let mut req = request(svc.id, c.id, "08:00");
    req.date = Some(tomorrow);
    engine.book_appointment(req).await.unwrap();

    let today_rows = engine.list_appointments(&AppointmentFilter {
        day: Some(day()),
        ..Default::default()
    });
    let slots: Vec<Slot> = today_rows.iter().map(|r| r.slot).collect();
    assert_eq!(slots, vec![s("08:00"), s("15:00")]);
    assert_eq!(engine.list_appointments(&AppointmentFilter::default()).len(), 3);
}

#[tokio::test]
async fn listing_filters_by_status() {
    let (engine, svc, c) = salon("listing_status.wal", 30).await;
    let first = engine.book_appointment(request(svc.id, c.id, "08:00")).await.unwrap();
    let second = engine.book_appointment(request(svc.id, c.id, "09:00")).await.unwrap();
    engine.book_appointment(request(svc.id, c.id, "10:00")).await.unwrap();
    engine
        .transition_appointment(first.id, AppointmentStatus::Confirmed, Actor::Staff)
        .await
        .unwrap();
    engine
        .transition_appointment(second.id, AppointmentStatus::Cancelled, Actor::Client)
        .await
        .unwrap();

    let ids = |status| -> Vec<Ulid> {
        engine
            .list_appointments(&AppointmentFilter {
                status: Some(status),
                client_id: Some(c.id),
                ..Default::default()
            })
            .into_iter()
            .map(|r| r.appointment.id)
            .collect()
    };
    assert_eq!(ids(AppointmentStatus::Confirmed), vec![first.id]);
    assert_eq!(ids(AppointmentStatus::Cancelled), vec![second.id]);
    assert_eq!(ids(AppointmentStatus::Pending).len(), 1);
    assert!(ids(AppointmentStatus::Completed).is_empty());
}

#[tokio::test]
async fn directory_ids_are_unique_across_kinds() {
    let engine = new_engine("unique_ids.wal");
    let p = professional("Ana");
    engine.create_professional(p.clone()).await.unwrap();
    let clash = Client { id: p.id, ..client(None) };
    assert!(matches!(
        engine.create_client(clash).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn service_validation() {
    let engine = new_engine("service_validation.wal");
    let err = engine.create_service(service(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::InvalidDuration(0))));

    let negative = Service {
        price_cents: -1,
        ..service(30)
    };
    assert!(matches!(
        engine.create_service(negative).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let orphan = Service {
        professional_id: Some(Ulid::new()),
        ..service(30)
    };
    assert!(matches!(
        engine.create_service(orphan).await,
        Err(EngineError::NotFound(_))
    ));

    let blank = Service {
        name: "   ".into(),
        ..service(30)
    };
    assert!(matches!(
        engine.create_service(blank).await,
        Err(EngineError::Validation(ValidationError::EmptyName))
    ));
}

#[tokio::test]
async fn service_type_catalog_is_case_insensitive() {
    let engine = new_engine("service_type_catalog.wal");
    let laser_type = engine.create_service_type(service_type("  Laser ")).await.unwrap();
    assert_eq!(laser_type.name, "Laser");

    let err = engine.create_service_type(service_type("LASER")).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(id) if id == laser_type.id));
    assert!(matches!(
        engine.create_service_type(service_type(" ")).await,
        Err(EngineError::Validation(ValidationError::EmptyName))
    ));
    engine.create_service_type(service_type("Depilação")).await.unwrap();

    let names: Vec<String> = engine.list_service_types().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["Depilação", "Laser"]);
}

#[tokio::test]
async fn services_take_the_catalog_spelling() {
    let engine = new_engine("service_type_spelling.wal");
    engine.create_service_type(service_type("Laser")).await.unwrap();

    let svc = Service {
        service_type: Some("laser ".into()),
        blocks_equipment: true,
        ..service(30)
    };
    let stored = engine.create_service(svc.clone()).await.unwrap();
    assert_eq!(stored.service_type.as_deref(), Some("Laser"));
    assert_eq!(engine.get_service(&svc.id).unwrap().service_type.as_deref(), Some("Laser"));

    let unknown = Service {
        service_type: Some("peeling".into()),
        ..service(30)
    };
    let err = engine.create_service(unknown).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnknownServiceType(ref name)) if name == "peeling"
    ));

    let mut renamed = stored.clone();
    renamed.service_type = Some("peeling".into());
    assert!(matches!(
        engine.update_service(renamed).await,
        Err(EngineError::Validation(ValidationError::UnknownServiceType(_)))
    ));

    let untyped_equipment = Service {
        blocks_equipment: true,
        ..service(30)
    };
    assert!(matches!(
        engine.create_service(untyped_equipment).await,
        Err(EngineError::Validation(ValidationError::EquipmentNeedsType))
    ));
    // Untyped services without equipment stay allowed.
    assert_ok!(engine.create_service(service(45)).await);
}

#[tokio::test]
async fn professional_update_and_listing() {
    let engine = new_engine("professional_update.wal");
    let mut p = professional("Ana");
    engine.create_professional(p.clone()).await.unwrap();
    engine.create_professional(professional("Bia")).await.unwrap();

    p.active = false;
    p.specialties = vec!["laser".into()];
    engine.update_professional(p.clone()).await.unwrap();

    assert_eq!(engine.get_professional(&p.id).unwrap(), p);
    let active: Vec<String> = engine.list_professionals(Some(true)).into_iter().map(|p| p.name).collect();
    assert_eq!(active, vec!["Bia"]);
    assert!(matches!(
        engine.update_professional(professional("Ghost")).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_everything() {
    let path = test_wal_path("replay_all.wal");
    let (appt_id, svc_id, done_at) = {
        let engine = Engine::new(path.clone(), Calendar::default(), Arc::new(Dispatcher::logging())).unwrap();
        engine.create_service_type(service_type("Massagem")).await.unwrap();
        let svc = Service {
            service_type: Some("massagem".into()),
            ..service(60)
        };
        let c = client(None);
        engine.create_service(svc.clone()).await.unwrap();
        engine.create_client(c.clone()).await.unwrap();
        let mut req = request(svc.id, c.id, "09:00");
        req.origin = BookingOrigin::Staff;
        let appt = engine.book_appointment(req).await.unwrap();
        let done_at = appt.scheduled_at + 45 * MINUTE_MS;
        engine
            .transition_appointment_at(appt.id, AppointmentStatus::Completed, Actor::Staff, done_at)
            .await
            .unwrap();
        engine.book_appointment(request(svc.id, c.id, "13:00")).await.unwrap();
        (appt.id, svc.id, done_at)
    };

    let engine = Engine::new(path, Calendar::default(), Arc::new(Dispatcher::logging())).unwrap();
    assert_eq!(engine.directory.service_count(), 1);
    assert_eq!(engine.directory.client_count(), 1);
    assert_eq!(engine.directory.service_type_count(), 1);
    assert_eq!(
        engine.get_service(&svc_id).unwrap().service_type.as_deref(),
        Some("Massagem")
    );

    let row = engine.get_appointment(&appt_id).unwrap();
    assert_eq!(row.appointment.status, AppointmentStatus::Completed);
    assert_eq!(row.appointment.completed_at, Some(done_at));
    assert_eq!(row.ends_at, done_at);

    let free = engine.compute_availability(day(), svc_id, None).await.unwrap();
    assert!(free.contains(&s("09:00")));
    assert!(!free.contains(&s("13:00")));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction_state.wal");
    let engine = Engine::new(path.clone(), Calendar::default(), Arc::new(Dispatcher::logging())).unwrap();
    let svc = service(30);
    let c = client(None);
    engine.create_service(svc.clone()).await.unwrap();
    engine.create_client(c.clone()).await.unwrap();
    let peeling = engine.create_service_type(service_type("Peeling")).await.unwrap();

    let mut ids = Vec::new();
    for slot in ["08:00", "08:30", "09:00", "09:30"] {
        ids.push(engine.book_appointment(request(svc.id, c.id, slot)).await.unwrap().id);
    }
    engine
        .transition_appointment(ids[1], AppointmentStatus::Cancelled, Actor::Client)
        .await
        .unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 8);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    // Appends after compaction land in the new file.
    let late = engine.book_appointment(request(svc.id, c.id, "16:00")).await.unwrap();
    drop(engine);

    let engine = Engine::new(path, Calendar::default(), Arc::new(Dispatcher::logging())).unwrap();
    let rows = engine.list_appointments(&AppointmentFilter::default());
    assert_eq!(rows.len(), 5);
    assert_eq!(
        engine.get_appointment(&ids[1]).unwrap().appointment.status,
        AppointmentStatus::Cancelled
    );
    assert!(engine.get_appointment(&late.id).is_some());
    assert!(engine.search_clients("maria").len() == 1);
    assert_eq!(engine.list_service_types(), vec![peeling]);
}

#[tokio::test]
async fn writes_during_compaction_survive() {
    let path = test_wal_path("compaction_race.wal");
    let engine = Arc::new(Engine::new(path.clone(), Calendar::default(), Arc::new(Dispatcher::logging())).unwrap());
    let svc = service(15);
    let c = client(None);
    engine.create_service(svc.clone()).await.unwrap();
    engine.create_client(c.clone()).await.unwrap();

    let slots: Vec<Slot> = engine.slots();
    let writer = {
        let engine = engine.clone();
        let slots = slots.clone();
        tokio::spawn(async move {
            for slot in slots {
                let mut req = request(svc.id, c.id, "08:00");
                req.slot = Some(slot);
                engine.book_appointment(req).await.unwrap();
            }
        })
    };
    for _ in 0..5 {
        engine.compact_wal().await.unwrap();
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    drop(engine);

    let engine = Engine::new(path, Calendar::default(), Arc::new(Dispatcher::logging())).unwrap();
    assert_eq!(engine.list_appointments(&AppointmentFilter::default()).len(), slots.len());
}
