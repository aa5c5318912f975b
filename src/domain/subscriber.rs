use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_status::SubscriberStatus;
use crate::domain::verification_token::VerificationToken;

#[derive(Debug)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: SubscriberEmail,
    pub phone: Option<String>,
    pub verification_token: VerificationToken,
    pub status: SubscriberStatus,
    pub created_at: DateTime<Utc>,
}

/// Row shape returned by the admin listing. Never carries the verification token.
#[derive(Debug, serde::Serialize, sqlx::FromRow)]
pub struct SubscriberSummary {
    pub id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}
