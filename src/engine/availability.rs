use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::grid::Calendar;

// ── Availability Algorithm ────────────────────────────────────────

/// What a caller wants to book: a day, the candidate service's terms, and
/// optionally the professional. `professional_id = None` means a
/// single-professional deployment where every appointment competes.
#[derive(Debug, Clone, Copy)]
pub struct SlotQuery<'a> {
    pub day: NaiveDate,
    pub terms: &'a ServiceTerms,
    pub professional_id: Option<Ulid>,
}

/// Whether `existing` competes with the candidate for time.
///
/// Same professional: always. Different professionals: only when both
/// services block the same typed equipment.
pub fn conflicts_with(existing: &Appointment, query: &SlotQuery<'_>) -> bool {
    let same_professional = match query.professional_id {
        None => true,
        Some(pid) => existing.professional_id == Some(pid),
    };
    same_professional || existing.terms.shares_equipment_with(query.terms)
}

/// Slots on `query.day` covered by a competing appointment's occupancy.
/// `appointments` may contain any day; other days are skipped here.
pub fn blocked_slots(
    calendar: &Calendar,
    query: &SlotQuery<'_>,
    appointments: &[Appointment],
) -> BTreeSet<Slot> {
    let grid_slots = calendar.grid.slots();
    let mut blocked = BTreeSet::new();

    for appointment in appointments {
        if !appointment.blocks_future_bookings() {
            continue;
        }
        if calendar.clock.day_of(appointment.scheduled_at) != query.day {
            continue;
        }
        if !conflicts_with(appointment, query) {
            continue;
        }
        let Some(occupied) = appointment.occupancy() else {
            continue;
        };
        for &slot in &grid_slots {
            if occupied.contains_instant(calendar.slot_start(query.day, slot)) {
                blocked.insert(slot);
            }
        }
    }

    blocked
}

/// Slots that can start a new booking of `query.terms`.
///
/// A slot qualifies only if the whole run of `ceil(duration / granularity)`
/// slots from it exists in the grid and is unblocked, so runs falling off
/// the end of the day or into the excluded hour are rejected.
pub fn available_slots(
    calendar: &Calendar,
    query: &SlotQuery<'_>,
    appointments: &[Appointment],
) -> Vec<Slot> {
    let blocked = blocked_slots(calendar, query, appointments);
    let grid = &calendar.grid;
    let run = grid.run_length(query.terms.duration_minutes).max(1);
    let step = grid.granularity() as u32;

    grid.slots()
        .into_iter()
        .filter(|start| {
            (0..run).all(|i| {
                let minute = start.minute() as u32 + i * step;
                match u16::try_from(minute) {
                    Ok(m) => grid.contains(m) && !blocked.contains(&Slot(m)),
                    Err(_) => false,
                }
            })
        })
        .collect()
}

/// True if `slot` is still free for the query.
pub fn is_available(
    calendar: &Calendar,
    query: &SlotQuery<'_>,
    appointments: &[Appointment],
    slot: Slot,
) -> bool {
    available_slots(calendar, query, appointments).contains(&slot)
}
