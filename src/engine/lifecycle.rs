use crate::model::{Actor, AppointmentStatus};

use super::EngineError;

use AppointmentStatus::*;

impl AppointmentStatus {
    /// The one place status changes are decided. Pure; the engine persists
    /// the result and runs side effects.
    ///
    /// ```text
    /// pending ──confirm──▶ confirmed ──complete──▶ completed
    ///    │                     │
    ///    └──cancel──▶ cancelled ◀──cancel──┘
    /// ```
    ///
    /// Confirm and complete are staff-only; either side may cancel.
    pub fn transition(self, to: AppointmentStatus, actor: Actor) -> Result<AppointmentStatus, EngineError> {
        let staff_only = match (self, to) {
            (Pending, Confirmed) => true,
            (Confirmed, Completed) => true,
            (Pending, Cancelled) | (Confirmed, Cancelled) => false,
            (from, to) => return Err(EngineError::InvalidTransition { from, to }),
        };
        if staff_only && actor != Actor::Staff {
            return Err(EngineError::NotPermitted { actor, to });
        }
        Ok(to)
    }
}
