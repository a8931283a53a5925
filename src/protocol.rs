use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

/// First line of every connection: `{"op": "hello", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Hello {
    pub tenant: String,
    pub password: String,
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Greeting {
    Hello(Hello),
}

/// Someone booked by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForUser {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub email: String,
    pub full_name: String,
}

/// One request line, after JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    ListCities,
    GetCity {
        city: String,
    },
    CreateCity {
        slug: String,
        label: String,
        capacity: u32,
        max_capacity: u32,
    },
    UpdateCity {
        slug: String,
        label: String,
        capacity: u32,
        max_capacity: u32,
    },
    DeleteCity {
        city: String,
    },
    ListNotices {
        city: String,
        /// Defaults to today.
        #[serde(default)]
        after: Option<NaiveDate>,
        #[serde(default)]
        before: Option<NaiveDate>,
    },
    GetNotice {
        city: String,
        date: NaiveDate,
    },
    PostNotice {
        city: String,
        date: NaiveDate,
        message: String,
        #[serde(default)]
        temp_capacity: Option<u32>,
    },
    DeleteNotice {
        city: String,
        date: NaiveDate,
    },
    DayView {
        city: String,
        date: NaiveDate,
    },
    Calendar {
        city: String,
        #[serde(default)]
        from: Option<NaiveDate>,
        #[serde(default)]
        weeks: Option<u32>,
    },
    MyBookings {
        /// Any day of the wanted month; defaults to the current month.
        #[serde(default)]
        month: Option<NaiveDate>,
    },
    Invite {
        city: String,
        date: NaiveDate,
        period: Period,
        #[serde(default)]
        guests: Guests,
    },
    Book {
        city: String,
        date: NaiveDate,
        period: Period,
        for_user: ForUser,
    },
    Remove {
        city: String,
        date: NaiveDate,
        /// Defaults to the caller.
        #[serde(default)]
        user_id: Option<Uuid>,
    },
    Me,
    UpdateMe {
        #[serde(default)]
        full_name: Option<String>,
        /// An empty string clears the avatar.
        #[serde(default)]
        avatar_url: Option<String>,
    },
    SetFavoriteCity {
        #[serde(default)]
        city: Option<String>,
    },
    FindProfile {
        email: String,
    },
    SearchProfiles {
        query: String,
    },
    ListAdmins,
    AdminInfo {
        #[serde(default)]
        user_id: Option<Uuid>,
    },
    GrantAdmin {
        user_id: Uuid,
        role: AdminRole,
    },
    UpdateAdmin {
        user_id: Uuid,
        role: AdminRole,
    },
    RevokeAdmin {
        user_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

pub fn parse_hello(line: &str) -> Result<Hello, ProtocolError> {
    let Greeting::Hello(hello) =
        serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if hello.tenant.trim().is_empty() {
        return Err(ProtocolError::Invalid("tenant is empty".into()));
    }
    Ok(hello)
}

/// Decode and sanity-check one request line.
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let cmd: Command = serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    validate(&cmd)?;
    Ok(cmd)
}

fn invalid(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::Invalid(msg.into())
}

fn check_slug(slug: &str) -> Result<(), ProtocolError> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(invalid(format!("city must be 1 to {MAX_SLUG_LEN} bytes")));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), ProtocolError> {
    let len = name.trim().chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(invalid(format!(
            "full_name must be {MIN_NAME_LEN} to {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), ProtocolError> {
    let ok = email.len() <= MAX_EMAIL_LEN
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !ok {
        return Err(invalid(format!("invalid email {email:?}")));
    }
    Ok(())
}

fn validate(cmd: &Command) -> Result<(), ProtocolError> {
    match cmd {
        Command::ListCities | Command::Me | Command::ListAdmins | Command::MyBookings { .. } => Ok(()),
        Command::AdminInfo { .. } | Command::RevokeAdmin { .. } => Ok(()),
        Command::GetCity { city }
        | Command::DeleteCity { city }
        | Command::GetNotice { city, .. }
        | Command::DeleteNotice { city, .. }
        | Command::DayView { city, .. }
        | Command::Remove { city, .. } => check_slug(city),
        Command::CreateCity {
            slug,
            label,
            capacity,
            max_capacity,
        }
        | Command::UpdateCity {
            slug,
            label,
            capacity,
            max_capacity,
        } => {
            check_slug(slug)?;
            if label.trim().is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(invalid(format!("label must be 1 to {MAX_LABEL_LEN} bytes")));
            }
            if capacity > max_capacity {
                return Err(invalid("capacity cannot exceed max_capacity"));
            }
            Ok(())
        }
        Command::ListNotices { city, after, before } => {
            check_slug(city)?;
            if let (Some(a), Some(b)) = (after, before)
                && b < a
            {
                return Err(invalid("before is earlier than after"));
            }
            Ok(())
        }
        Command::PostNotice { city, message, .. } => {
            check_slug(city)?;
            if message.len() > MAX_MESSAGE_LEN {
                return Err(invalid(format!("message longer than {MAX_MESSAGE_LEN} bytes")));
            }
            Ok(())
        }
        Command::Calendar { city, weeks, .. } => {
            check_slug(city)?;
            if weeks.is_some_and(|w| w == 0 || w > MAX_WEEKS) {
                return Err(invalid(format!("weeks must be 1 to {MAX_WEEKS}")));
            }
            Ok(())
        }
        Command::Invite { city, guests, .. } => {
            check_slug(city)?;
            if Period::ALL.iter().any(|p| guests.get(*p) > MAX_GUESTS_PER_PERIOD) {
                return Err(invalid(format!(
                    "at most {MAX_GUESTS_PER_PERIOD} guests per period"
                )));
            }
            Ok(())
        }
        Command::Book { city, for_user, .. } => {
            check_slug(city)?;
            check_email(&for_user.email)?;
            check_name(&for_user.full_name)
        }
        Command::UpdateMe { full_name, avatar_url } => {
            if let Some(name) = full_name {
                check_name(name)?;
            }
            if avatar_url.as_ref().is_some_and(|u| u.len() > MAX_URL_LEN) {
                return Err(invalid("avatar_url too long"));
            }
            Ok(())
        }
        Command::SetFavoriteCity { city } => city.as_deref().map_or(Ok(()), check_slug),
        Command::FindProfile { email } => check_email(email),
        Command::SearchProfiles { query } => {
            if query.trim().is_empty() || query.len() > MAX_QUERY_LEN {
                return Err(invalid(format!("query must be 1 to {MAX_QUERY_LEN} bytes")));
            }
            Ok(())
        }
        Command::GrantAdmin { role, .. } | Command::UpdateAdmin { role, .. } => match role {
            AdminRole::Local { cities } if cities.is_empty() => Err(invalid("local admin needs at least one city")),
            AdminRole::Local { cities } => cities.iter().try_for_each(|c| check_slug(c)),
            AdminRole::Global => Ok(()),
        },
    }
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    NotFound,
    AlreadyExists,
    Forbidden,
    Full,
    LimitExceeded,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(data: &impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::error(ErrorCode::Internal, e.to_string()),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":{{"code":"internal","message":"{e}"}}}}"#)
        })
    }
}

impl From<&ProtocolError> for Response {
    fn from(e: &ProtocolError) -> Self {
        Response::error(ErrorCode::BadRequest, e.to_string())
    }
}

impl From<&EngineError> for Response {
    fn from(e: &EngineError) -> Self {
        let code = match e {
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            EngineError::Forbidden(_) => ErrorCode::Forbidden,
            EngineError::CapacityExceeded { .. } => ErrorCode::Full,
            EngineError::Validation(_) => ErrorCode::BadRequest,
            EngineError::LimitExceeded(_) => ErrorCode::LimitExceeded,
            EngineError::Occupancy(_) | EngineError::WalError(_) => ErrorCode::Internal,
        };
        Response::error(code, e.to_string())
    }
}
