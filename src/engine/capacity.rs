use chrono::NaiveDate;
use tracing::warn;

use crate::limits::*;
use crate::model::*;
use crate::occupancy::{occupancy, resolve_capacity};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

pub(crate) fn validate_guests(guests: &Guests) -> Result<(), EngineError> {
    if Period::ALL
        .iter()
        .any(|p| guests.get(*p) > MAX_GUESTS_PER_PERIOD)
    {
        return Err(EngineError::LimitExceeded("too many guests for one period"));
    }
    Ok(())
}

pub(crate) fn validate_city(city: &City) -> Result<(), EngineError> {
    let slug_ok = !city.slug.is_empty()
        && city
            .slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !slug_ok {
        return Err(EngineError::Validation(format!(
            "city slug {:?} must be lowercase letters, digits or '-'",
            city.slug
        )));
    }
    if city.slug.len() > MAX_SLUG_LEN {
        return Err(EngineError::LimitExceeded("city slug too long"));
    }
    if city.label.trim().is_empty() {
        return Err(EngineError::Validation("city label is empty".into()));
    }
    if city.label.len() > MAX_LABEL_LEN {
        return Err(EngineError::LimitExceeded("city label too long"));
    }
    if city.max_capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if city.capacity > city.max_capacity {
        return Err(EngineError::Validation(format!(
            "capacity {} exceeds max capacity {}",
            city.capacity, city.max_capacity
        )));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    let len = name.trim().chars().count();
    if len < MIN_NAME_LEN {
        return Err(EngineError::Validation(format!(
            "name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    if len > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.contains('@'));
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(EngineError::Validation(format!("invalid email {email:?}")));
    }
    Ok(())
}

pub(crate) fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if to < from {
        return Err(EngineError::Validation(format!("range ends before it starts: {from}..{to}")));
    }
    if (to - from).num_days() >= MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

/// Reject `booking` if, once it replaces the subject's current row for the day,
/// the day's occupancy would pass the hard ceiling. The nominal capacity never blocks.
pub(crate) fn check_capacity(cs: &CityState, booking: &Booking) -> Result<(), EngineError> {
    let day = cs.bookings_on(booking.date);
    if day.len() >= MAX_BOOKINGS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many bookings for one day"));
    }

    let limits = resolve_capacity(&cs.city, cs.notice_on(booking.date));
    let mut after: Vec<&Booking> = day.iter().filter(|b| b.user_id != booking.user_id).collect();
    after.push(booking);
    let occupancy = occupancy(&after)?;

    if occupancy > limits.hard {
        warn!(
            "rejecting booking in {} on {}: occupancy {occupancy} > {}",
            cs.city.slug, booking.date, limits.hard
        );
        metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL).increment(1);
        return Err(EngineError::CapacityExceeded {
            occupancy,
            max_capacity: limits.hard,
        });
    }
    Ok(())
}
