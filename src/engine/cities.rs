use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use crate::limits::*;
use crate::model::*;
use crate::occupancy::resolve_capacity;

use super::capacity::{now_ms, validate_city};
use super::{Engine, EngineError};

impl Engine {
    // ── Queries ──────────────────────────────────────────

    pub async fn get_city(&self, slug: &str) -> Option<City> {
        let cs = self.get_city_state(slug)?;
        let guard = cs.read().await;
        Some(guard.city.clone())
    }

    /// All cities, sorted by label.
    pub async fn get_cities(&self) -> Vec<City> {
        let states: Vec<_> = self.cities.iter().map(|e| e.value().clone()).collect();
        let mut cities = Vec::with_capacity(states.len());
        for cs in states {
            cities.push(cs.read().await.city.clone());
        }
        cities.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.slug.cmp(&b.slug)));
        cities
    }

    pub async fn get_notice(&self, slug: &str, date: NaiveDate) -> Result<Option<Notice>, EngineError> {
        let cs = self.city_state(slug)?;
        let guard = cs.read().await;
        Ok(guard.notice_on(date).cloned())
    }

    /// Notices dated on or after `after`, and on or before `before` when given.
    pub async fn get_notices(
        &self,
        slug: &str,
        after: NaiveDate,
        before: Option<NaiveDate>,
    ) -> Result<Vec<Notice>, EngineError> {
        let cs = self.city_state(slug)?;
        let guard = cs.read().await;
        let notices = guard
            .notices
            .range(after..)
            .take_while(|(date, _)| before.is_none_or(|b| **date <= b))
            .map(|(_, n)| n.clone())
            .collect();
        Ok(notices)
    }

    pub async fn effective_capacity(&self, slug: &str, date: NaiveDate) -> Result<EffectiveCapacity, EngineError> {
        let cs = self.city_state(slug)?;
        let guard = cs.read().await;
        Ok(resolve_capacity(&guard.city, guard.notice_on(date)))
    }

    // ── Mutations ────────────────────────────────────────

    pub async fn create_city(&self, actor: Uuid, city: City) -> Result<City, EngineError> {
        if !self.is_user_super_admin(actor) {
            return Err(EngineError::Forbidden("only global admins can create cities"));
        }
        validate_city(&city)?;
        let _gate = self.begin_write().await;
        if self.cities.len() >= MAX_CITIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many cities"));
        }
        if self.cities.contains_key(&city.slug) {
            return Err(EngineError::AlreadyExists(format!("city {}", city.slug)));
        }

        let event = Event::CityCreated { city: city.clone() };
        self.persist_and_apply_global(&event).await?;
        info!("city {} created by {actor}", city.slug);
        Ok(city)
    }

    /// Change label and capacities. The slug is the key and never changes.
    pub async fn update_city(&self, actor: Uuid, city: City) -> Result<City, EngineError> {
        if !self.is_user_admin(actor, &city.slug) {
            return Err(EngineError::Forbidden("not an admin of this city"));
        }
        validate_city(&city)?;
        let _gate = self.begin_write().await;
        let mut guard = self.city_write(&city.slug).await?;

        let event = Event::CityUpdated { city: city.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(city)
    }

    /// Delete a city with its bookings and notices.
    pub async fn delete_city(&self, actor: Uuid, slug: &str) -> Result<(), EngineError> {
        if !self.is_user_super_admin(actor) {
            return Err(EngineError::Forbidden("only global admins can delete cities"));
        }
        let _gate = self.begin_write().await;
        let guard = self.city_write(slug).await?;
        let bookings = guard.booking_count();

        let event = Event::CityDeleted { slug: slug.to_string() };
        self.persist_and_apply_global(&event).await?;
        drop(guard);
        info!("city {slug} deleted by {actor} ({bookings} bookings dropped)");
        Ok(())
    }

    /// Post or replace the notice for a city and date.
    pub async fn create_notice(
        &self,
        actor: Uuid,
        slug: &str,
        date: NaiveDate,
        message: String,
        temp_capacity: Option<u32>,
    ) -> Result<Notice, EngineError> {
        if !self.is_user_admin(actor, slug) {
            return Err(EngineError::Forbidden("not an admin of this city"));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(EngineError::LimitExceeded("notice message too long"));
        }
        if temp_capacity.is_some_and(|c| c > MAX_CAPACITY) {
            return Err(EngineError::LimitExceeded("capacity too large"));
        }
        let _gate = self.begin_write().await;
        let mut guard = self.city_write(slug).await?;

        let notice = Notice {
            city: slug.to_string(),
            date,
            message,
            temp_capacity,
            created_at: now_ms(),
        };
        let event = Event::NoticePosted { notice: notice.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(notice)
    }

    /// Idempotent: returns whether a notice was removed.
    pub async fn delete_notice(&self, actor: Uuid, slug: &str, date: NaiveDate) -> Result<bool, EngineError> {
        if !self.is_user_admin(actor, slug) {
            return Err(EngineError::Forbidden("not an admin of this city"));
        }
        let _gate = self.begin_write().await;
        let mut guard = self.city_write(slug).await?;
        if guard.notice_on(date).is_none() {
            return Ok(false);
        }

        let event = Event::NoticeRemoved {
            city: slug.to_string(),
            date,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }
}
