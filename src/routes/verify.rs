use actix_web::{
    http::StatusCode,
    web::{self, Query},
    HttpResponse, ResponseError,
};
use serde::Deserialize;

use crate::{
    domain::verification_token::VerificationToken,
    registry::{RegistryError, SubscriberRegistry},
    routes::error_chain_fmt,
};

#[derive(Deserialize, Debug)]
pub struct Parameters {
    pub token: Option<String>,
}

#[derive(thiserror::Error)]
pub enum VerifyError {
    #[error("Token required")]
    MissingToken,
    /// Tokens never expire, in practice this means the token was never issued.
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("Verification failed")]
    Storage(#[source] RegistryError),
}

impl std::fmt::Debug for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<RegistryError> for VerifyError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound => VerifyError::InvalidOrExpiredToken,
            err => VerifyError::Storage(err),
        }
    }
}

impl ResponseError for VerifyError {
    fn status_code(&self) -> StatusCode {
        match self {
            VerifyError::MissingToken | VerifyError::InvalidOrExpiredToken => {
                StatusCode::BAD_REQUEST
            }
            VerifyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

#[tracing::instrument(name = "Verify a subscriber email", skip(registry, parameters))]
pub async fn handle_verify(
    registry: web::Data<SubscriberRegistry>,
    parameters: Query<Parameters>,
) -> Result<HttpResponse, VerifyError> {
    let token = match parameters.into_inner().token {
        Some(token) if !token.is_empty() => token,
        _ => return Err(VerifyError::MissingToken),
    };

    // Postgres rejects some byte sequences (NUL) outright, which would surface as a 500.
    if !VerificationToken::could_have_been_issued(&token) {
        return Err(VerifyError::InvalidOrExpiredToken);
    }

    let subscriber = registry
        .find_by_token(&token)
        .await?
        .ok_or(VerifyError::InvalidOrExpiredToken)?;

    if subscriber.status.is_verified() {
        return Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "email": subscriber.email,
            "message": "Already verified",
        })));
    }

    let subscriber = registry.mark_verified(&token).await?;

    tracing::info!("Subscriber {} verified", subscriber.email);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "email": subscriber.email,
    })))
}
