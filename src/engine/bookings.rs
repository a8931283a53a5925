use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

use crate::model::*;

use super::capacity::{now_ms, validate_guests, validate_range};
use super::{Engine, EngineError};

impl Engine {
    // ── Queries ──────────────────────────────────────────

    /// One day's bookings in creation order.
    pub async fn get_bookings(&self, slug: &str, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        let cs = self.city_state(slug)?;
        let guard = cs.read().await;
        Ok(guard.bookings_on(date).to_vec())
    }

    /// Bookings with `from <= date <= to`, by date then creation order.
    pub async fn get_bookings_range(
        &self,
        slug: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_range(from, to)?;
        let cs = self.city_state(slug)?;
        let guard = cs.read().await;
        Ok(guard.bookings_between(from, to).cloned().collect())
    }

    /// A user's bookings in every city during the month containing `month`.
    pub async fn get_my_bookings(&self, user_id: Uuid, month: NaiveDate) -> Vec<Booking> {
        let Some(first) = month.with_day(1) else {
            return Vec::new();
        };
        let last = first
            .checked_add_months(chrono::Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX);

        let states: Vec<_> = self.cities.iter().map(|e| e.value().clone()).collect();
        let mut mine = Vec::new();
        for cs in states {
            let guard = cs.read().await;
            mine.extend(
                guard
                    .bookings_between(first, last)
                    .filter(|b| b.user_id == user_id)
                    .cloned(),
            );
        }
        mine.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then(a.created_at.cmp(&b.created_at))
                .then_with(|| a.city.cmp(&b.city))
        });
        mine
    }

    // ── Store-level writes ───────────────────────────────
    //
    // No capacity gate here; `invite` and `book_for` add it.

    /// Insert, or update period/guests/booked_by of the existing row in place.
    /// `created_at` is stamped on insert and never changes afterwards.
    pub async fn upsert_booking(&self, mut booking: Booking) -> Result<Booking, EngineError> {
        validate_guests(&booking.guests)?;
        let _gate = self.begin_write().await;
        let mut guard = self.city_write(&booking.city).await?;

        booking.created_at = guard
            .find_booking(booking.date, booking.user_id)
            .map_or_else(now_ms, |existing| existing.created_at);
        let event = Event::BookingSaved {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    /// Idempotent: returns whether a row was removed.
    pub async fn delete_booking(&self, slug: &str, date: NaiveDate, user_id: Uuid) -> Result<bool, EngineError> {
        let _gate = self.begin_write().await;
        let mut guard = self.city_write(slug).await?;
        if guard.find_booking(date, user_id).is_none() {
            return Ok(false);
        }

        let event = Event::BookingRemoved {
            city: slug.to_string(),
            date,
            user_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }
}
