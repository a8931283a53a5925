use tracing::debug;
use uuid::Uuid;

use crate::limits::*;
use crate::model::*;
use crate::search::SearchHit;

use super::capacity::{now_ms, validate_email, validate_name};
use super::{Engine, EngineError};

/// Fields a user may change on a profile. `None` leaves a field untouched;
/// `Some(None)` clears an optional one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub avatar_url: Option<Option<String>>,
    pub favorite_city: Option<Option<String>>,
}

fn validate_avatar(url: Option<&str>) -> Result<(), EngineError> {
    if url.is_some_and(|u| u.len() > MAX_URL_LEN) {
        return Err(EngineError::LimitExceeded("avatar url too long"));
    }
    Ok(())
}

impl Engine {
    pub fn get_profile_by_id(&self, user_id: Uuid) -> Option<Profile> {
        self.profiles.get(&user_id).map(|p| p.value().clone())
    }

    pub fn require_profile(&self, user_id: Uuid) -> Result<Profile, EngineError> {
        self.get_profile_by_id(user_id)
            .ok_or_else(|| EngineError::profile(user_id))
    }

    /// Profiles for the given ids; unknown ids are skipped.
    pub fn get_profiles(&self, ids: &[Uuid]) -> Vec<Profile> {
        ids.iter().filter_map(|id| self.get_profile_by_id(*id)).collect()
    }

    pub fn find_profile(&self, email: &str) -> Option<Profile> {
        self.profiles
            .iter()
            .find(|p| p.email == email)
            .map(|p| p.value().clone())
    }

    pub fn search_profiles(&self, query: &str) -> Vec<SearchHit> {
        let index = self
            .search
            .get_or_build(|| self.profiles.iter().map(|p| p.value().clone()).collect());
        index.search(query, MAX_SEARCH_RESULTS)
    }

    pub fn clear_profile_cache(&self) {
        self.search.invalidate();
    }

    pub async fn create_profile(&self, profile: Profile) -> Result<Profile, EngineError> {
        let _gate = self.begin_write().await;
        self.insert_profile(profile).await
    }

    /// Caller already holds the write gate.
    pub(super) async fn insert_profile(&self, mut profile: Profile) -> Result<Profile, EngineError> {
        validate_name(&profile.full_name)?;
        validate_email(&profile.email)?;
        validate_avatar(profile.avatar_url.as_deref())?;
        if self.profiles.len() >= MAX_PROFILES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many profiles"));
        }
        if self.profiles.contains_key(&profile.user_id) {
            return Err(EngineError::AlreadyExists(format!("profile {}", profile.user_id)));
        }
        if let Some(slug) = &profile.favorite_city
            && !self.cities.contains_key(slug)
        {
            return Err(EngineError::city(slug));
        }
        profile.full_name = profile.full_name.trim().to_string();
        profile.created_at = now_ms();

        let event = Event::ProfileSaved {
            profile: profile.clone(),
        };
        self.persist_and_apply_global(&event).await?;
        debug!("profile {} created", profile.user_id);
        Ok(profile)
    }

    /// Profile of a freshly authenticated caller, created on first login.
    /// An existing profile (possibly a placeholder made by `book_for`) is kept as is.
    pub async fn sign_in(&self, caller: &Identity) -> Result<Profile, EngineError> {
        let _gate = self.begin_write().await;
        self.ensure_profile(Profile {
            user_id: caller.user_id,
            email: caller.email.clone(),
            full_name: caller.full_name.clone(),
            avatar_url: caller.avatar_url.clone(),
            favorite_city: None,
            created_at: 0,
        })
        .await
    }

    /// Profile for `user_id`, created from `fallback` when missing.
    /// Caller already holds the write gate.
    pub(super) async fn ensure_profile(&self, fallback: Profile) -> Result<Profile, EngineError> {
        match self.get_profile_by_id(fallback.user_id) {
            Some(existing) => Ok(existing),
            None => self.insert_profile(fallback).await,
        }
    }

    pub async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<Profile, EngineError> {
        let _gate = self.begin_write().await;
        let mut profile = self.require_profile(user_id)?;

        if let Some(name) = update.full_name {
            validate_name(&name)?;
            profile.full_name = name.trim().to_string();
        }
        if let Some(avatar_url) = update.avatar_url {
            validate_avatar(avatar_url.as_deref())?;
            profile.avatar_url = avatar_url;
        }
        if let Some(favorite_city) = update.favorite_city {
            if let Some(slug) = &favorite_city
                && !self.cities.contains_key(slug)
            {
                return Err(EngineError::city(slug));
            }
            profile.favorite_city = favorite_city;
        }

        let event = Event::ProfileSaved {
            profile: profile.clone(),
        };
        self.persist_and_apply_global(&event).await?;
        Ok(profile)
    }

    /// A user may delete their own profile; global admins may delete anyone's.
    pub async fn delete_profile(&self, actor: Uuid, user_id: Uuid) -> Result<(), EngineError> {
        if actor != user_id && !self.is_user_super_admin(actor) {
            return Err(EngineError::Forbidden("cannot delete another user's profile"));
        }
        let _gate = self.begin_write().await;
        if !self.profiles.contains_key(&user_id) {
            return Err(EngineError::profile(user_id));
        }

        let event = Event::ProfileRemoved { user_id };
        self.persist_and_apply_global(&event).await
    }
}
