use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unix milliseconds.
pub type Ms = i64;

/// Which part of the day a booking covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Morning,
    Afternoon,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Day, Period::Morning, Period::Afternoon];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
        }
    }

    /// Display label shown to end users.
    pub fn label(self) -> &'static str {
        match self {
            Period::Day => "Journée",
            Period::Morning => "Matin",
            Period::Afternoon => "Après-midi",
        }
    }

    /// A full-day booking holds a seat in both halves.
    pub fn covers_morning(self) -> bool {
        self != Period::Afternoon
    }

    pub fn covers_afternoon(self) -> bool {
        self != Period::Morning
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period: {0:?} (expected day, morning or afternoon)")]
pub struct InvalidPeriod(pub String);

impl FromStr for Period {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Period::Day),
            "morning" => Ok(Period::Morning),
            "afternoon" => Ok(Period::Afternoon),
            other => Err(InvalidPeriod(other.to_string())),
        }
    }
}

/// Extra people a booker brings, per period. Independent of the booker's own period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Guests {
    pub day: u32,
    pub morning: u32,
    pub afternoon: u32,
}

impl Guests {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, period: Period) -> u32 {
        match period {
            Period::Day => self.day,
            Period::Morning => self.morning,
            Period::Afternoon => self.afternoon,
        }
    }

    pub fn total(&self) -> u32 {
        self.day + self.morning + self.afternoon
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One row per (city, date, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub user_id: Uuid,
    pub city: String,
    pub date: NaiveDate,
    pub period: Period,
    pub guests: Guests,
    /// Who booked on the subject's behalf; `None` for self-service.
    pub booked_by: Option<Uuid>,
    pub created_at: Ms,
}

/// A booking with its 1-based position in the day's allocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedBooking {
    #[serde(flatten)]
    pub booking: Booking,
    pub index: u32,
}

/// Anything that sits in a day slot: enough to compute occupancy and groupings.
pub trait Slotted {
    fn date(&self) -> NaiveDate;
    fn period(&self) -> Period;
    fn guests(&self) -> &Guests;
}

impl Slotted for Booking {
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn period(&self) -> Period {
        self.period
    }
    fn guests(&self) -> &Guests {
        &self.guests
    }
}

impl<T: Slotted + ?Sized> Slotted for &T {
    fn date(&self) -> NaiveDate {
        (**self).date()
    }
    fn period(&self) -> Period {
        (**self).period()
    }
    fn guests(&self) -> &Guests {
        (**self).guests()
    }
}

impl Slotted for IndexedBooking {
    fn date(&self) -> NaiveDate {
        self.booking.date
    }
    fn period(&self) -> Period {
        self.booking.period
    }
    fn guests(&self) -> &Guests {
        &self.booking.guests
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub slug: String,
    pub label: String,
    /// Nominal headcount; beyond it people are flagged as overflow.
    pub capacity: u32,
    /// Hard ceiling; bookings past it are rejected.
    pub max_capacity: u32,
}

/// Per-date administrative override for a city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub city: String,
    pub date: NaiveDate,
    pub message: String,
    pub temp_capacity: Option<u32>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub favorite_city: Option<String>,
    pub created_at: Ms,
}

/// An authenticated caller, as vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

/// Stored admin grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Global,
    Local { cities: BTreeSet<String> },
}

impl AdminRole {
    pub fn covers(&self, city: &str) -> bool {
        match self {
            AdminRole::Global => true,
            AdminRole::Local { cities } => cities.contains(city),
        }
    }
}

/// Resolved admin role of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AdminInfo {
    Global { user_id: Uuid },
    Local { user_id: Uuid, cities: Vec<City> },
}

impl AdminInfo {
    pub fn user_id(&self) -> Uuid {
        match self {
            AdminInfo::Global { user_id } | AdminInfo::Local { user_id, .. } => *user_id,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, AdminInfo::Global { .. })
    }
}

// ── Hierarchical city state ─────────────────────────────────────

/// Everything stored under a city key: its bookings by date and its notices.
#[derive(Debug, Clone)]
pub struct CityState {
    pub city: City,
    /// Bookings per date, each day kept sorted by `created_at`.
    pub days: BTreeMap<NaiveDate, Vec<Booking>>,
    pub notices: BTreeMap<NaiveDate, Notice>,
}

impl CityState {
    pub fn new(city: City) -> Self {
        Self {
            city,
            days: BTreeMap::new(),
            notices: BTreeMap::new(),
        }
    }

    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_booking(&self, date: NaiveDate, user_id: Uuid) -> Option<&Booking> {
        self.bookings_on(date).iter().find(|b| b.user_id == user_id)
    }

    /// Replace the row for (date, user) or insert it, keeping the day sorted by `created_at`.
    pub fn put_booking(&mut self, booking: Booking) {
        let day = self.days.entry(booking.date).or_default();
        if let Some(pos) = day.iter().position(|b| b.user_id == booking.user_id) {
            if day[pos].created_at == booking.created_at {
                day[pos] = booking;
                return;
            }
            day.remove(pos);
        }
        let pos = day.partition_point(|b| b.created_at <= booking.created_at);
        day.insert(pos, booking);
    }

    pub fn take_booking(&mut self, date: NaiveDate, user_id: Uuid) -> Option<Booking> {
        let day = self.days.get_mut(&date)?;
        let pos = day.iter().position(|b| b.user_id == user_id)?;
        let removed = day.remove(pos);
        if day.is_empty() {
            self.days.remove(&date);
        }
        Some(removed)
    }

    /// Bookings with `from <= date <= to`, in date order then creation order.
    pub fn bookings_between(&self, from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.days.range(from..=to).flat_map(|(_, day)| day.iter())
    }

    pub fn notice_on(&self, date: NaiveDate) -> Option<&Notice> {
        self.notices.get(&date)
    }

    pub fn booking_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CityCreated { city: City },
    CityUpdated { city: City },
    CityDeleted { slug: String },
    NoticePosted { notice: Notice },
    NoticeRemoved { city: String, date: NaiveDate },
    BookingSaved { booking: Booking },
    BookingRemoved { city: String, date: NaiveDate, user_id: Uuid },
    ProfileSaved { profile: Profile },
    ProfileRemoved { user_id: Uuid },
    AdminSaved { user_id: Uuid, role: AdminRole },
    AdminRemoved { user_id: Uuid },
}

impl Event {
    /// The city whose state this event touches, if any.
    pub fn city(&self) -> Option<&str> {
        match self {
            Event::CityCreated { city } | Event::CityUpdated { city } => Some(&city.slug),
            Event::CityDeleted { slug } => Some(slug),
            Event::NoticePosted { notice } => Some(&notice.city),
            Event::NoticeRemoved { city, .. } | Event::BookingRemoved { city, .. } => Some(city),
            Event::BookingSaved { booking } => Some(&booking.city),
            Event::ProfileSaved { .. }
            | Event::ProfileRemoved { .. }
            | Event::AdminSaved { .. }
            | Event::AdminRemoved { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Capacity limits in force for a city on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveCapacity {
    /// Advisory threshold; drives overflow flags, never blocks a write.
    pub soft: u32,
    /// Enforced ceiling.
    pub hard: u32,
}

/// Bookings split by their own period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grouped<B> {
    pub day: Vec<B>,
    pub morning: Vec<B>,
    pub afternoon: Vec<B>,
}

impl<B> Default for Grouped<B> {
    fn default() -> Self {
        Self {
            day: Vec::new(),
            morning: Vec::new(),
            afternoon: Vec::new(),
        }
    }
}

impl<B> Grouped<B> {
    pub fn get(&self, period: Period) -> &[B] {
        match period {
            Period::Day => &self.day,
            Period::Morning => &self.morning,
            Period::Afternoon => &self.afternoon,
        }
    }

    pub fn len(&self) -> usize {
        self.day.len() + self.morning.len() + self.afternoon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Occupancy overview of one day, as shown on a city calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub city: String,
    pub date: NaiveDate,
    pub occupancy: u32,
    pub capacity: EffectiveCapacity,
    pub notice: Option<String>,
    #[serde(flatten)]
    pub bookings: Grouped<IndexedBooking>,
}

/// A person listed on the day view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayEntry {
    #[serde(flatten)]
    pub booking: IndexedBooking,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    /// Accepted under the hard ceiling but past the nominal capacity.
    pub overflow: bool,
}

impl Slotted for DayEntry {
    fn date(&self) -> NaiveDate {
        self.booking.date()
    }
    fn period(&self) -> Period {
        self.booking.period()
    }
    fn guests(&self) -> &Guests {
        self.booking.guests()
    }
}

/// Everything needed to render one city/date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayView {
    pub city: City,
    pub date: NaiveDate,
    pub notice: Option<String>,
    pub capacity: EffectiveCapacity,
    pub occupancy: u32,
    pub is_full: bool,
    /// Occupancy beyond the nominal capacity: people will spill into other rooms.
    pub overflowing: bool,
    pub bookings: Grouped<DayEntry>,
    pub self_booking: Option<IndexedBooking>,
    pub viewer_is_admin: bool,
}
