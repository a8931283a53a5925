use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::*;

use super::Engine;

// ── Event application ────────────────────────────────────
//
// Shared by replay and live writes, so every transition here must be
// deterministic and infallible: validation happens before the WAL append.

/// Apply a city-scoped event to a city the caller has already locked.
pub(super) fn apply_to_city(cs: &mut CityState, event: &Event) {
    match event {
        Event::CityUpdated { city } => cs.city = city.clone(),
        Event::NoticePosted { notice } => {
            cs.notices.insert(notice.date, notice.clone());
        }
        Event::NoticeRemoved { date, .. } => {
            cs.notices.remove(date);
        }
        Event::BookingSaved { booking } => cs.put_booking(booking.clone()),
        Event::BookingRemoved { date, user_id, .. } => {
            cs.take_booking(*date, *user_id);
        }
        // Created/Deleted and non-city events are handled at the map level.
        Event::CityCreated { .. }
        | Event::CityDeleted { .. }
        | Event::ProfileSaved { .. }
        | Event::ProfileRemoved { .. }
        | Event::AdminSaved { .. }
        | Event::AdminRemoved { .. } => {}
    }
}

impl Engine {
    /// Apply an event that adds or removes a map entry.
    pub(super) fn apply_global(&self, event: &Event) {
        match event {
            Event::CityCreated { city } => {
                let cs = CityState::new(city.clone());
                self.cities.insert(city.slug.clone(), Arc::new(RwLock::new(cs)));
            }
            Event::CityDeleted { slug } => {
                self.cities.remove(slug);
                // Local grants lose the city; an emptied grant stays but resolves to no admin info.
                for mut entry in self.admins.iter_mut() {
                    if let AdminRole::Local { cities } = entry.value_mut() {
                        cities.remove(slug);
                    }
                }
                for mut profile in self.profiles.iter_mut() {
                    if profile.favorite_city.as_deref() == Some(slug.as_str()) {
                        profile.favorite_city = None;
                    }
                }
            }
            Event::ProfileSaved { profile } => {
                self.profiles.insert(profile.user_id, profile.clone());
                self.search.invalidate();
            }
            Event::ProfileRemoved { user_id } => {
                self.profiles.remove(user_id);
                self.search.invalidate();
            }
            Event::AdminSaved { user_id, role } => {
                self.admins.insert(*user_id, role.clone());
            }
            Event::AdminRemoved { user_id } => {
                self.admins.remove(user_id);
            }
            Event::CityUpdated { .. }
            | Event::NoticePosted { .. }
            | Event::NoticeRemoved { .. }
            | Event::BookingSaved { .. }
            | Event::BookingRemoved { .. } => {}
        }
    }

    /// Minimal event sequence that recreates the current state.
    /// Caller holds the write gate, so no mutation is in flight.
    pub(super) async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let mut slugs: Vec<String> = self.cities.iter().map(|e| e.key().clone()).collect();
        slugs.sort();
        for slug in slugs {
            let Some(cs) = self.get_city_state(&slug) else { continue };
            let guard = cs.read().await;
            events.push(Event::CityCreated {
                city: guard.city.clone(),
            });
            for notice in guard.notices.values() {
                events.push(Event::NoticePosted {
                    notice: notice.clone(),
                });
            }
            for booking in guard.days.values().flatten() {
                events.push(Event::BookingSaved {
                    booking: booking.clone(),
                });
            }
        }

        let mut profiles: Vec<Profile> = self.profiles.iter().map(|e| e.value().clone()).collect();
        profiles.sort_by_key(|p| (p.created_at, p.user_id));
        events.extend(profiles.into_iter().map(|profile| Event::ProfileSaved { profile }));

        let mut admins: Vec<(uuid::Uuid, AdminRole)> = self
            .admins
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        admins.sort_by_key(|(user_id, _)| *user_id);
        events.extend(
            admins
                .into_iter()
                .map(|(user_id, role)| Event::AdminSaved { user_id, role }),
        );

        events
    }
}
