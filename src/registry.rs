use chrono::Utc;
use sqlx::{
    postgres::{PgDatabaseError, PgRow},
    PgPool, Row,
};
use uuid::Uuid;

use crate::domain::{
    new_subscriber::NewSubscriber,
    subscriber::{Subscriber, SubscriberSummary},
    subscriber_email::SubscriberEmail,
    verification_token::VerificationToken,
};

const UNIQUE_VIOLATION: &str = "23505";
const EMAIL_CONSTRAINT: &str = "subscribers_email_key";
const TOKEN_CONSTRAINT: &str = "subscribers_verification_token_key";

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("A subscriber with this email already exists.")]
    EmailConflict,
    #[error("The verification token is already assigned to another subscriber.")]
    TokenConflict,
    #[error("No subscriber holds the given verification token.")]
    NotFound,
    #[error("Failed to execute query on the subscribers table.")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        let conflict = match &err {
            sqlx::Error::Database(db_err) => db_err
                .try_downcast_ref::<PgDatabaseError>()
                .filter(|pg_err| pg_err.code() == UNIQUE_VIOLATION)
                .and_then(|pg_err| match pg_err.constraint() {
                    Some(EMAIL_CONSTRAINT) => Some(RegistryError::EmailConflict),
                    Some(TOKEN_CONSTRAINT) => Some(RegistryError::TokenConflict),
                    _ => None,
                }),
            _ => None,
        };

        conflict.unwrap_or_else(|| RegistryError::Database(err))
    }
}

/// Owns the `subscribers` table. Uniqueness of emails and tokens is left to
/// the table constraints, this type only translates their violations.
#[derive(Clone)]
pub struct SubscriberRegistry {
    db_pool: PgPool,
}

impl SubscriberRegistry {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    #[tracing::instrument(
        name = "Insert a pending subscriber into the database",
        skip(self, new_subscriber, token),
        fields(subscriber_email = %new_subscriber.email)
    )]
    pub async fn insert_pending(
        &self,
        new_subscriber: &NewSubscriber,
        token: &VerificationToken,
    ) -> Result<Subscriber, RegistryError> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (id, email, phone, verification_token, verified, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            RETURNING id, email, phone, verification_token, verified, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_subscriber.email.as_ref())
        .bind(new_subscriber.phone.as_ref().map(|phone| phone.as_ref()))
        .bind(token.as_ref())
        .bind(Utc::now())
        .try_map(subscriber_from_row)
        .fetch_one(&self.db_pool)
        .await
        .map_err(RegistryError::from)
    }

    #[tracing::instrument(name = "Find a subscriber by email", skip(self))]
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>, RegistryError> {
        let subscriber = sqlx::query(
            r#"
            SELECT id, email, phone, verification_token, verified, created_at
            FROM subscribers
            WHERE email = $1
            "#,
        )
        .bind(email)
        .try_map(subscriber_from_row)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(subscriber)
    }

    #[tracing::instrument(name = "Find a subscriber by verification token", skip(self, token))]
    pub async fn find_by_token(&self, token: &str) -> Result<Option<Subscriber>, RegistryError> {
        let subscriber = sqlx::query(
            r#"
            SELECT id, email, phone, verification_token, verified, created_at
            FROM subscribers
            WHERE verification_token = $1
            "#,
        )
        .bind(token)
        .try_map(subscriber_from_row)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(subscriber)
    }

    /// Flips `verified` to true. Calling it for an already verified row is a
    /// no-op that still returns the row.
    #[tracing::instrument(name = "Mark a subscriber as verified", skip(self, token))]
    pub async fn mark_verified(&self, token: &str) -> Result<Subscriber, RegistryError> {
        let updated = sqlx::query(
            r#"
            UPDATE subscribers
            SET verified = TRUE
            WHERE verification_token = $1 AND verified = FALSE
            RETURNING id, email, phone, verification_token, verified, created_at
            "#,
        )
        .bind(token)
        .try_map(subscriber_from_row)
        .fetch_optional(&self.db_pool)
        .await?;

        match updated {
            Some(subscriber) => Ok(subscriber),
            None => self
                .find_by_token(token)
                .await?
                .ok_or(RegistryError::NotFound),
        }
    }

    #[tracing::instrument(name = "List all subscribers", skip(self))]
    pub async fn list_all(&self) -> Result<Vec<SubscriberSummary>, RegistryError> {
        let subscribers = sqlx::query_as::<_, SubscriberSummary>(
            r#"
            SELECT id, email, phone, verified, created_at
            FROM subscribers
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        Ok(subscribers)
    }
}

fn subscriber_from_row(row: PgRow) -> Result<Subscriber, sqlx::Error> {
    let email = SubscriberEmail::parse(row.try_get("email")?)
        .map_err(|err| sqlx::Error::Decode(err.into()))?;
    let verification_token: String = row.try_get("verification_token")?;
    let verified: bool = row.try_get("verified")?;

    Ok(Subscriber {
        id: row.try_get("id")?,
        email,
        phone: row.try_get("phone")?,
        verification_token: VerificationToken::from(verification_token),
        status: verified.into(),
        created_at: row.try_get("created_at")?,
    })
}
