use std::sync::LazyLock;

use uuid::Uuid;

static NAMESPACE: LazyLock<Uuid> = LazyLock::new(|| Uuid::new_v5(&Uuid::nil(), b"foursfeir"));

/// Stable user id for an email address (UUIDv5 under the application namespace).
///
/// Used both for authenticated callers and for people booked by someone else,
/// so a placeholder profile and the person's later login land on the same id.
/// The email is hashed exactly as given.
pub fn user_id_for_email(email: &str) -> Uuid {
    Uuid::new_v5(&NAMESPACE, email.as_bytes())
}
