use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::identity::user_id_for_email;
use crate::limits::*;
use crate::model::*;
use crate::occupancy::{
    group_bookings, index_bookings, is_overflow_booking, occupancy, request_period, resolve_capacity, weekdays,
};

use super::capacity::{check_capacity, now_ms, today, validate_guests};
use super::{Engine, EngineError};

/// The person a booking is made for when it isn't the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingTarget {
    /// Known user id; derived from `email` when absent.
    pub user_id: Option<Uuid>,
    pub email: String,
    pub full_name: String,
}

impl Engine {
    /// Book a slot for the caller, creating their profile on first use.
    /// Re-booking the same day replaces period and guests but keeps the
    /// original place in the queue.
    pub async fn invite(
        &self,
        caller: &Identity,
        slug: &str,
        date: NaiveDate,
        period: Period,
        guests: Guests,
    ) -> Result<Booking, EngineError> {
        validate_guests(&guests)?;
        let _gate = self.begin_write().await;
        self.ensure_profile(Profile {
            user_id: caller.user_id,
            email: caller.email.clone(),
            full_name: caller.full_name.clone(),
            avatar_url: caller.avatar_url.clone(),
            favorite_city: None,
            created_at: 0,
        })
        .await?;

        let mut guard = self.city_write(slug).await?;
        let created_at = guard
            .find_booking(date, caller.user_id)
            .map_or_else(now_ms, |existing| existing.created_at);
        let booking = Booking {
            user_id: caller.user_id,
            city: slug.to_string(),
            date,
            period,
            guests,
            booked_by: None,
            created_at,
        };
        check_capacity(&guard, &booking)?;

        let event = Event::BookingSaved {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("{} booked {slug} on {date} ({period})", caller.user_id);
        Ok(booking)
    }

    /// Book a slot on someone else's behalf. Any earlier row of theirs for the
    /// day is dropped, and the new one goes to the back of the queue without guests.
    pub async fn book_for(
        &self,
        caller: &Identity,
        slug: &str,
        date: NaiveDate,
        period: Period,
        target: BookingTarget,
    ) -> Result<Booking, EngineError> {
        let user_id = target
            .user_id
            .unwrap_or_else(|| user_id_for_email(&target.email));
        let _gate = self.begin_write().await;
        self.ensure_profile(Profile {
            user_id,
            email: target.email,
            full_name: target.full_name,
            avatar_url: None,
            favorite_city: None,
            created_at: 0,
        })
        .await?;

        let mut guard = self.city_write(slug).await?;
        let booking = Booking {
            user_id,
            city: slug.to_string(),
            date,
            period,
            guests: Guests::none(),
            booked_by: Some(caller.user_id),
            created_at: now_ms(),
        };
        check_capacity(&guard, &booking)?;

        let event = Event::BookingSaved {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("{} booked {slug} on {date} for {user_id}", caller.user_id);
        Ok(booking)
    }

    /// Cancel a booking. Anyone may cancel their own; cancelling someone
    /// else's needs admin rights on the city.
    pub async fn remove_booking(
        &self,
        caller: &Identity,
        slug: &str,
        date: NaiveDate,
        user_id: Uuid,
    ) -> Result<bool, EngineError> {
        if user_id != caller.user_id && !self.is_user_admin(caller.user_id, slug) {
            return Err(EngineError::Forbidden("cannot remove another user's booking"));
        }
        self.delete_booking(slug, date, user_id).await
    }

    // ── Read models ──────────────────────────────────────

    /// Everything needed to render one city and date for `viewer`.
    pub async fn day_view(&self, viewer: Uuid, slug: &str, date: NaiveDate) -> Result<DayView, EngineError> {
        let cs = self.city_state(slug)?;
        let guard = cs.read().await;
        let day = guard.bookings_on(date);
        let notice = guard.notice_on(date);
        let capacity = resolve_capacity(&guard.city, notice);
        let occupancy = occupancy(day)?;
        let indexed = index_bookings(day);

        let self_booking = indexed
            .iter()
            .find(|ib| ib.booking.user_id == viewer)
            .cloned();
        let entries = indexed
            .into_iter()
            .map(|booking| {
                let profile = self.get_profile_by_id(booking.booking.user_id);
                DayEntry {
                    overflow: is_overflow_booking(&booking, capacity.soft),
                    full_name: profile.as_ref().map(|p| p.full_name.clone()),
                    email: profile.as_ref().map(|p| p.email.clone()),
                    avatar_url: profile.and_then(|p| p.avatar_url),
                    booking,
                }
            })
            .collect();

        Ok(DayView {
            city: guard.city.clone(),
            date,
            notice: notice.map(|n| n.message.clone()),
            capacity,
            occupancy,
            is_full: occupancy >= capacity.hard,
            overflowing: occupancy > capacity.soft,
            bookings: group_bookings(entries),
            self_booking,
            viewer_is_admin: self.is_user_admin(viewer, slug),
        })
    }

    /// Per-weekday summaries for `weeks` weeks from the week containing `from`
    /// (this week, or next week on a weekend, when absent).
    pub async fn calendar(
        &self,
        slug: &str,
        from: Option<NaiveDate>,
        weeks: u32,
    ) -> Result<Vec<DailySummary>, EngineError> {
        if weeks == 0 || weeks > MAX_WEEKS {
            return Err(EngineError::LimitExceeded("calendar window out of range"));
        }
        let (start, end) = request_period(from.unwrap_or_else(today), weeks);
        let cs = self.city_state(slug)?;
        let guard = cs.read().await;

        let mut summaries = Vec::new();
        for date in weekdays(start, end) {
            let day = guard.bookings_on(date);
            let notice = guard.notice_on(date);
            summaries.push(DailySummary {
                city: slug.to_string(),
                date,
                occupancy: occupancy(day)?,
                capacity: resolve_capacity(&guard.city, notice),
                notice: notice.map(|n| n.message.clone()),
                bookings: group_bookings(index_bookings(day)),
            });
        }
        Ok(summaries)
    }
}
