use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Process settings, read from `DESKBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Emails that are global admins in every tenant.
    pub superadmins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            password: "deskbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            superadmins: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind: get("DESKBOOK_BIND").unwrap_or(defaults.bind),
            port: parse(&get, "DESKBOOK_PORT")?.unwrap_or(defaults.port),
            data_dir: get("DESKBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: get("DESKBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse(&get, "DESKBOOK_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            compact_threshold: parse(&get, "DESKBOOK_COMPACT_THRESHOLD")?.unwrap_or(defaults.compact_threshold),
            metrics_port: parse(&get, "DESKBOOK_METRICS_PORT")?,
            superadmins: get("DESKBOOK_SUPERADMINS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
