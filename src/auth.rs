use async_trait::async_trait;

use crate::identity::user_id_for_email;
use crate::limits::*;
use crate::model::Identity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid identity: {0}")]
    InvalidIdentity(&'static str),
}

/// What a client claims about itself in its hello.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub password: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

/// Turns client credentials into a trusted identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credentials: Credentials) -> Result<Identity, AuthError>;
}

/// Accepts any identity presented together with the shared server password.
#[derive(Debug)]
pub struct SharedSecretProvider {
    password: String,
}

impl SharedSecretProvider {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl IdentityProvider for SharedSecretProvider {
    async fn authenticate(&self, credentials: Credentials) -> Result<Identity, AuthError> {
        if credentials.password != self.password {
            return Err(AuthError::InvalidCredentials);
        }
        let email = credentials.email.trim();
        if !plausible_email(email) {
            return Err(AuthError::InvalidIdentity("email"));
        }
        // Same bounds a stored profile name must meet.
        let full_name = credentials.full_name.trim();
        if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&full_name.chars().count()) {
            return Err(AuthError::InvalidIdentity("full_name"));
        }
        if credentials.avatar_url.as_ref().is_some_and(|u| u.len() > MAX_URL_LEN) {
            return Err(AuthError::InvalidIdentity("avatar_url"));
        }
        Ok(Identity {
            user_id: user_id_for_email(email),
            email: email.to_string(),
            full_name: full_name.to_string(),
            avatar_url: credentials.avatar_url,
        })
    }
}

fn plausible_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.contains('@'))
}
