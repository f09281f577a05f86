use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::model::{DAY_MS, MINUTE_MS, Ms, Slot};

/// `NaiveDate::num_days_from_ce()` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    ZeroGranularity,
    EmptyDay { start: u16, end: u16 },
    PastMidnight(u16),
    BadExcludedHour(u16),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::ZeroGranularity => write!(f, "slot granularity must be positive"),
            GridError::EmptyDay { start, end } => {
                write!(f, "day start {} must be before day end {}", Slot(*start), Slot(*end))
            }
            GridError::PastMidnight(end) => write!(f, "day end {end} is past midnight"),
            GridError::BadExcludedHour(h) => write!(f, "excluded hour {h} is not in 0..24"),
        }
    }
}

impl std::error::Error for GridError {}

/// Fixed discretisation of a business day into bookable slots.
/// Identical for every calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGrid {
    start_minute: u16,
    end_minute: u16,
    granularity: u16,
    excluded_hour: Option<u16>,
}

impl Default for TimeGrid {
    /// 08:00–17:00 in 15-minute steps, closed 12:00–13:00 for lunch.
    fn default() -> Self {
        Self {
            start_minute: 8 * 60,
            end_minute: 17 * 60,
            granularity: 15,
            excluded_hour: Some(12),
        }
    }
}

impl TimeGrid {
    pub fn new(
        start_minute: u16,
        end_minute: u16,
        granularity: u16,
        excluded_hour: Option<u16>,
    ) -> Result<Self, GridError> {
        if granularity == 0 {
            return Err(GridError::ZeroGranularity);
        }
        if end_minute > MINUTES_PER_DAY {
            return Err(GridError::PastMidnight(end_minute));
        }
        if start_minute >= end_minute {
            return Err(GridError::EmptyDay { start: start_minute, end: end_minute });
        }
        if let Some(h) = excluded_hour
            && h >= 24
        {
            return Err(GridError::BadExcludedHour(h));
        }
        Ok(Self {
            start_minute,
            end_minute,
            granularity,
            excluded_hour,
        })
    }

    pub fn granularity(&self) -> u16 {
        self.granularity
    }

    /// Every bookable slot, ascending. Slots in the excluded hour are
    /// dropped, not shifted.
    pub fn slots(&self) -> Vec<Slot> {
        (self.start_minute..self.end_minute)
            .step_by(self.granularity as usize)
            .map(Slot)
            .filter(|s| Some(s.hour()) != self.excluded_hour)
            .collect()
    }

    /// True if `minute` is the start of a slot in this grid.
    pub fn contains(&self, minute: u16) -> bool {
        minute >= self.start_minute
            && minute < self.end_minute
            && (minute - self.start_minute) % self.granularity == 0
            && Some(minute / 60) != self.excluded_hour
    }

    /// Number of consecutive slots a service of `duration_minutes` occupies.
    pub fn run_length(&self, duration_minutes: u32) -> u32 {
        duration_minutes.div_ceil(self.granularity as u32)
    }
}

/// Maps Unix ms to the salon's local calendar day and minute-of-day using a
/// single fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WallClock {
    offset_ms: Ms,
}

impl WallClock {
    pub fn with_offset_minutes(minutes: i32) -> Self {
        Self {
            offset_ms: minutes as Ms * MINUTE_MS,
        }
    }

    pub fn offset_minutes(&self) -> i32 {
        (self.offset_ms / MINUTE_MS) as i32
    }

    pub fn day_of(&self, at: Ms) -> NaiveDate {
        let days = (at + self.offset_ms).div_euclid(DAY_MS) + UNIX_EPOCH_DAYS_FROM_CE;
        i32::try_from(days)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn minute_of_day(&self, at: Ms) -> u16 {
        ((at + self.offset_ms).rem_euclid(DAY_MS) / MINUTE_MS) as u16
    }

    /// The instant at `minute` past local midnight of `day`.
    pub fn at(&self, day: NaiveDate, minute: u16) -> Ms {
        let days = day.num_days_from_ce() as i64 - UNIX_EPOCH_DAYS_FROM_CE;
        days * DAY_MS + minute as Ms * MINUTE_MS - self.offset_ms
    }

    /// `YYYY-MM-DD HH:MM` in local time.
    pub fn format(&self, at: Ms) -> String {
        format!("{} {}", self.day_of(at), Slot(self.minute_of_day(at)))
    }
}

/// The grid plus the clock that places it on real days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Calendar {
    pub grid: TimeGrid,
    pub clock: WallClock,
}

impl Calendar {
    pub fn new(grid: TimeGrid, clock: WallClock) -> Self {
        Self { grid, clock }
    }

    /// The instant `slot` starts on `day`.
    pub fn slot_start(&self, day: NaiveDate, slot: Slot) -> Ms {
        self.clock.at(day, slot.minute())
    }
}
