use tracing::info;
use uuid::Uuid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn is_user_super_admin(&self, user_id: Uuid) -> bool {
        self.root_admins.contains(&user_id)
            || self
                .admins
                .get(&user_id)
                .is_some_and(|role| *role == AdminRole::Global)
    }

    /// Global admins administer every city; local admins only their own.
    pub fn is_user_admin(&self, user_id: Uuid, city: &str) -> bool {
        self.root_admins.contains(&user_id)
            || self
                .admins
                .get(&user_id)
                .is_some_and(|role| role.covers(city))
    }

    /// Resolved role, or `None` for non-admins and local admins left without a city.
    pub async fn get_admin_info(&self, user_id: Uuid) -> Option<AdminInfo> {
        if self.is_user_super_admin(user_id) {
            return Some(AdminInfo::Global { user_id });
        }
        let slugs = match self.admins.get(&user_id)?.value() {
            AdminRole::Global => return Some(AdminInfo::Global { user_id }),
            AdminRole::Local { cities } => cities.clone(),
        };
        let mut cities = Vec::with_capacity(slugs.len());
        for slug in &slugs {
            if let Some(city) = self.get_city(slug).await {
                cities.push(city);
            }
        }
        if cities.is_empty() {
            return None;
        }
        Some(AdminInfo::Local { user_id, cities })
    }

    /// Every admin, global ones first.
    pub async fn get_all_admins(&self) -> Vec<AdminInfo> {
        let mut ids: Vec<Uuid> = self
            .admins
            .iter()
            .map(|e| *e.key())
            .chain(self.root_admins.iter().copied())
            .collect();
        ids.sort();
        ids.dedup();

        let mut all = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.get_admin_info(id).await {
                all.push(info);
            }
        }
        all.sort_by_key(|info| (!info.is_global(), info.user_id()));
        all
    }

    pub async fn create_admin(&self, actor: Uuid, user_id: Uuid, role: AdminRole) -> Result<AdminInfo, EngineError> {
        self.require_super_admin(actor)?;
        let _gate = self.begin_write().await;
        if self.admins.contains_key(&user_id) {
            return Err(EngineError::AlreadyExists(format!("admin {user_id}")));
        }
        self.save_admin(user_id, role).await?;
        info!("admin {user_id} granted by {actor}");
        self.resolved(user_id).await
    }

    pub async fn update_admin(&self, actor: Uuid, user_id: Uuid, role: AdminRole) -> Result<AdminInfo, EngineError> {
        self.require_super_admin(actor)?;
        let _gate = self.begin_write().await;
        if !self.admins.contains_key(&user_id) {
            return Err(EngineError::NotFound(format!("admin {user_id}")));
        }
        self.save_admin(user_id, role).await?;
        self.resolved(user_id).await
    }

    pub async fn delete_admin(&self, actor: Uuid, user_id: Uuid) -> Result<(), EngineError> {
        self.require_super_admin(actor)?;
        let _gate = self.begin_write().await;
        if !self.admins.contains_key(&user_id) {
            return Err(EngineError::NotFound(format!("admin {user_id}")));
        }
        let event = Event::AdminRemoved { user_id };
        self.persist_and_apply_global(&event).await?;
        info!("admin {user_id} revoked by {actor}");
        Ok(())
    }

    fn require_super_admin(&self, actor: Uuid) -> Result<(), EngineError> {
        if self.is_user_super_admin(actor) {
            Ok(())
        } else {
            Err(EngineError::Forbidden("only global admins can manage admins"))
        }
    }

    async fn save_admin(&self, user_id: Uuid, role: AdminRole) -> Result<(), EngineError> {
        if let AdminRole::Local { cities } = &role {
            if cities.is_empty() {
                return Err(EngineError::Validation("local admin needs at least one city".into()));
            }
            if let Some(missing) = cities.iter().find(|slug| !self.cities.contains_key(*slug)) {
                return Err(EngineError::city(missing));
            }
        }
        let event = Event::AdminSaved { user_id, role };
        self.persist_and_apply_global(&event).await
    }

    async fn resolved(&self, user_id: Uuid) -> Result<AdminInfo, EngineError> {
        self.get_admin_info(user_id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("admin {user_id}")))
    }
}
