pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod identity;
pub mod limits;
pub mod model;
pub mod observability;
pub mod occupancy;
pub mod protocol;
pub mod search;
pub mod tenant;
pub mod wal;
pub mod wire;
