use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::Instrument;

use crate::{
    domain::{
        new_subscriber::{NewSubscriber, NewSubscriberBody, NewSubscriberError},
        subscriber::Subscriber,
        subscriber_email::SubscriberEmail,
        verification_token::VerificationToken,
    },
    email_client::EmailClient,
    registry::{RegistryError, SubscriberRegistry},
    routes::error_chain_fmt,
    startup::ApplicationBaseUrl,
};

const MAX_TOKEN_ATTEMPTS: usize = 3;
const VERIFICATION_SUBJECT: &str = "Confirm your email for snow day alerts";

#[derive(thiserror::Error)]
pub enum SignupError {
    #[error("Email required")]
    MissingEmail,
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Invalid phone number")]
    InvalidPhone,
    /// The duplicate could not be inspected, so no verification state is reported.
    #[error("Email already registered.")]
    AlreadyRegistered,
    #[error("Email already registered. Check your inbox for the verification link.")]
    EmailAlreadyRegistered,
    #[error("Email already registered and verified.")]
    EmailAlreadyVerified,
    #[error("Failed to send verification email.")]
    DeliveryFailure(#[source] reqwest::Error),
    #[error("Something went wrong.")]
    Storage(#[source] RegistryError),
}

#[derive(Serialize)]
struct SignupErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl SignupError {
    /// Machine readable code so clients can branch on duplicate signups.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            SignupError::EmailAlreadyRegistered => Some("EMAIL_ALREADY_REGISTERED"),
            SignupError::EmailAlreadyVerified => Some("EMAIL_ALREADY_VERIFIED"),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SignupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<NewSubscriberError> for SignupError {
    fn from(err: NewSubscriberError) -> Self {
        match err {
            NewSubscriberError::MissingEmail => SignupError::MissingEmail,
            NewSubscriberError::InvalidEmail(reason) => {
                tracing::warn!("Validation error: {}", reason);
                SignupError::InvalidEmail
            }
            NewSubscriberError::InvalidPhone(reason) => {
                tracing::warn!("Validation error: {}", reason);
                SignupError::InvalidPhone
            }
        }
    }
}

impl ResponseError for SignupError {
    fn status_code(&self) -> StatusCode {
        match self {
            SignupError::MissingEmail
            | SignupError::InvalidEmail
            | SignupError::InvalidPhone
            | SignupError::AlreadyRegistered
            | SignupError::EmailAlreadyRegistered
            | SignupError::EmailAlreadyVerified => StatusCode::BAD_REQUEST,
            SignupError::DeliveryFailure(_) | SignupError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(SignupErrorBody {
            error: self.to_string(),
            code: self.code(),
        })
    }
}

#[tracing::instrument(
    name = "Signing up a new subscriber",
    skip(body, registry, email_client, base_url),
    fields(
        subscriber_email = ?body.email,
        subscriber_phone = ?body.phone
    )
)]
pub async fn handle_signup(
    body: web::Json<NewSubscriberBody>,
    registry: web::Data<SubscriberRegistry>,
    email_client: web::Data<EmailClient>,
    base_url: web::Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, SignupError> {
    let new_subscriber: NewSubscriber = body.into_inner().try_into()?;

    let subscriber =
        match insert_with_fresh_token(&registry, &new_subscriber, VerificationToken::issue).await {
            Ok(subscriber) => subscriber,
            Err(RegistryError::EmailConflict) => {
                return Err(
                    classify_duplicate(&registry, email_client, base_url, &new_subscriber.email)
                        .await,
                );
            }
            Err(err) => return Err(SignupError::Storage(err)),
        };

    // The row stays pending when delivery fails, there is no compensating delete.
    send_verification_email(
        &email_client,
        &subscriber.email,
        &base_url,
        &subscriber.verification_token,
    )
    .await
    .map_err(SignupError::DeliveryFailure)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// Token uniqueness is only checked by the insert, so a collision is
/// answered by asking `issue_token` for another one, up to three attempts.
pub async fn insert_with_fresh_token(
    registry: &SubscriberRegistry,
    new_subscriber: &NewSubscriber,
    mut issue_token: impl FnMut() -> VerificationToken,
) -> Result<Subscriber, RegistryError> {
    let mut attempt = 1;

    loop {
        let token = issue_token();

        match registry.insert_pending(new_subscriber, &token).await {
            Err(RegistryError::TokenConflict) if attempt < MAX_TOKEN_ATTEMPTS => {
                tracing::warn!("Verification token collision on attempt {}", attempt);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Resolves an email conflict into the error reported to the client. The
/// lookup is not atomic with the failed insert.
#[tracing::instrument(
    name = "Classify a duplicate signup",
    skip(registry, email_client, base_url),
    fields(subscriber_email = %email)
)]
async fn classify_duplicate(
    registry: &SubscriberRegistry,
    email_client: web::Data<EmailClient>,
    base_url: web::Data<ApplicationBaseUrl>,
    email: &SubscriberEmail,
) -> SignupError {
    let existing = match registry.find_by_email(email.as_ref()).await {
        Ok(Some(existing)) => existing,
        Ok(None) => {
            tracing::warn!("Conflicting subscriber disappeared before the lookup");
            return SignupError::AlreadyRegistered;
        }
        Err(err) => {
            tracing::error!("Failed to look up the conflicting subscriber: {:?}", err);
            return SignupError::AlreadyRegistered;
        }
    };

    if existing.status.is_verified() {
        return SignupError::EmailAlreadyVerified;
    }

    // Pending duplicates get the original link again, the token is never
    // rotated. The rejection does not wait for the notifier.
    actix_web::rt::spawn(async move {
        if let Err(err) = send_verification_email(
            &email_client,
            &existing.email,
            &base_url,
            &existing.verification_token,
        )
        .await
        {
            tracing::error!(
                "Failed to resend the verification email to {}: {:?}",
                existing.email,
                err
            );
        }
    }
    .instrument(tracing::Span::current()));

    SignupError::EmailAlreadyRegistered
}

#[tracing::instrument(
    name = "Send a verification email to a subscriber",
    skip(email_client, recipient, base_url, token),
    fields(recipient = %recipient)
)]
async fn send_verification_email(
    email_client: &EmailClient,
    recipient: &SubscriberEmail,
    base_url: &ApplicationBaseUrl,
    token: &VerificationToken,
) -> Result<(), reqwest::Error> {
    let verification_link = base_url.verification_link(token);
    let html_body = verification_email_html(verification_link.as_str());

    email_client
        .send_email(recipient, VERIFICATION_SUBJECT, &html_body)
        .await
}

fn verification_email_html(verification_link: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
  </head>
  <body style="margin:0;padding:0;background:#f6f7fb;font-family:Arial,sans-serif;">
    <div style="max-width:560px;margin:24px auto;background:#ffffff;border-radius:12px;border:1px solid #e5e7eb;padding:20px;">
      <div style="font-size:18px;font-weight:700;">McMaster Snow Day Alerts</div>
      <p style="font-size:14px;line-height:1.6;color:#374151;">
        Click the button below to confirm your email and start receiving snow day alerts.
      </p>
      <p style="text-align:center;">
        <a href="{link}" style="display:inline-block;padding:12px 32px;background:#2563eb;color:#ffffff;text-decoration:none;border-radius:6px;">Confirm Email</a>
      </p>
      <p style="font-size:13px;color:#6b7280;">Or copy this link:<br/>{link}</p>
      <p style="font-size:12px;color:#9ca3af;">Didn't sign up? You can safely ignore this email.</p>
    </div>
  </body>
</html>"#,
        link = verification_link
    )
}
