use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OccupancyError {
    #[error("occupancy cannot be computed across multiple dates: {0:?}")]
    MixedDates(Vec<NaiveDate>),
}

// ── Half-day load ────────────────────────────────────────────────

/// Running headcount of both halves of one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalfDayLoad {
    pub morning: u32,
    pub afternoon: u32,
}

impl HalfDayLoad {
    /// Seat taken by the booker plus the guests brought for each half.
    /// Day guests count in both halves.
    pub fn add(&mut self, booking: &impl Slotted) {
        let period = booking.period();
        let guests = booking.guests();
        self.morning += u32::from(period.covers_morning()) + guests.morning + guests.day;
        self.afternoon += u32::from(period.covers_afternoon()) + guests.afternoon + guests.day;
    }

    /// Both halves share one room, so the busier half is the occupancy.
    pub fn peak(&self) -> u32 {
        self.morning.max(self.afternoon)
    }

    /// Load already present on the halves `period` needs.
    pub fn load_for(&self, period: Period) -> u32 {
        match period {
            Period::Day => self.peak(),
            Period::Morning => self.morning,
            Period::Afternoon => self.afternoon,
        }
    }
}

// ── Occupancy ────────────────────────────────────────────────────

/// Peak simultaneous headcount of a single day's bookings.
pub fn occupancy<B: Slotted>(bookings: &[B]) -> Result<u32, OccupancyError> {
    let mut dates: Vec<NaiveDate> = bookings.iter().map(Slotted::date).collect();
    dates.sort();
    dates.dedup();
    if dates.len() > 1 {
        return Err(OccupancyError::MixedDates(dates));
    }

    let mut load = HalfDayLoad::default();
    for booking in bookings {
        load.add(booking);
    }
    Ok(load.peak())
}

/// Assign each booking its position in the allocation order.
///
/// Order-preserving: callers pass bookings sorted by `created_at` to get
/// first-come-first-served. A booking's index is one more than the load that
/// was already sitting on the half-days it occupies when it joined, so a
/// morning and an afternoon booking made after the same full-day booking
/// share an index.
///
/// This is not a running sum over every earlier booking: an afternoon booking
/// ignores earlier morning-only load, so on a day of two mornings then one
/// afternoon the indices are 1, 2, 1.
pub fn index_bookings(bookings: &[Booking]) -> Vec<IndexedBooking> {
    let mut load = HalfDayLoad::default();
    bookings
        .iter()
        .map(|booking| {
            let index = load.load_for(booking.period) + 1;
            load.add(booking);
            IndexedBooking {
                booking: booking.clone(),
                index,
            }
        })
        .collect()
}

/// Whether this person and their guests land past the nominal capacity.
pub fn is_overflow_booking(booking: &IndexedBooking, capacity: u32) -> bool {
    booking.index + booking.booking.guests.total() > capacity
}

/// Partition bookings by their own period. Guests stay attached to their booking.
pub fn group_bookings<B: Slotted>(bookings: Vec<B>) -> Grouped<B> {
    let mut grouped = Grouped::default();
    for booking in bookings {
        match booking.period() {
            Period::Day => grouped.day.push(booking),
            Period::Morning => grouped.morning.push(booking),
            Period::Afternoon => grouped.afternoon.push(booking),
        }
    }
    grouped
}

// ── Capacity ─────────────────────────────────────────────────────

/// Limits in force for `city` on the notice's date.
///
/// A temporary capacity replaces both the nominal and the hard ceiling for
/// that day. A notice without one changes nothing.
pub fn resolve_capacity(city: &City, notice: Option<&Notice>) -> EffectiveCapacity {
    match notice.and_then(|n| n.temp_capacity) {
        Some(temp) => EffectiveCapacity {
            soft: temp,
            hard: temp,
        },
        None => EffectiveCapacity {
            soft: city.capacity,
            hard: city.max_capacity,
        },
    }
}

// ── Calendar windows ─────────────────────────────────────────────

/// Half-open `[start, end)` window of whole weeks starting on this week's Monday.
/// On Saturday and Sunday the window starts on the following Monday.
pub fn request_period(today: NaiveDate, weeks: u32) -> (NaiveDate, NaiveDate) {
    let days_from_monday = i64::from(today.weekday().num_days_from_monday());
    let mut start = today - Duration::days(days_from_monday);
    if matches!(today.weekday(), Weekday::Sat | Weekday::Sun) {
        start += Duration::weeks(1);
    }
    let end = start + Duration::weeks(i64::from(weeks));
    (start, end)
}

/// Monday–Friday dates in `[start, end)`.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d < end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}
