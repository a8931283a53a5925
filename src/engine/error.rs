use crate::occupancy::OccupancyError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("full: occupancy would reach {occupancy}, capacity is {max_capacity}")]
    CapacityExceeded { occupancy: u32, max_capacity: u32 },
    #[error("invalid: {0}")]
    Validation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error(transparent)]
    Occupancy(#[from] OccupancyError),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn city(slug: &str) -> Self {
        EngineError::NotFound(format!("city {slug}"))
    }

    pub(crate) fn profile(user_id: uuid::Uuid) -> Self {
        EngineError::NotFound(format!("profile {user_id}"))
    }
}
