use actix_web::{
    http::{header, StatusCode},
    web, HttpRequest, HttpResponse, ResponseError,
};
use secrecy::{ExposeSecret, Secret};

use crate::{
    registry::{RegistryError, SubscriberRegistry},
    routes::error_chain_fmt,
};

/// Bearer token guarding the admin listing. `None` leaves the listing open.
pub struct AdminToken(pub Option<Secret<String>>);

#[derive(thiserror::Error)]
pub enum AdminError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Failed to fetch users")]
    Storage(#[source] RegistryError),
}

impl std::fmt::Debug for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for AdminError {
    fn status_code(&self) -> StatusCode {
        match self {
            AdminError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdminError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());

        if let AdminError::Unauthorized = self {
            response.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }

        response.json(serde_json::json!({ "error": self.to_string() }))
    }
}

#[tracing::instrument(
    name = "List subscribers for the admin",
    skip(request, registry, admin_token)
)]
pub async fn handle_list_users(
    request: HttpRequest,
    registry: web::Data<SubscriberRegistry>,
    admin_token: web::Data<AdminToken>,
) -> Result<HttpResponse, AdminError> {
    authorize(&request, &admin_token)?;

    let subscribers = registry.list_all().await.map_err(AdminError::Storage)?;

    Ok(HttpResponse::Ok().json(subscribers))
}

fn authorize(request: &HttpRequest, admin_token: &AdminToken) -> Result<(), AdminError> {
    let expected = match &admin_token.0 {
        Some(expected) => expected,
        None => return Ok(()),
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(provided) if provided == expected.expose_secret().as_str() => Ok(()),
        _ => {
            tracing::warn!("Rejected admin request with a missing or wrong token");
            Err(AdminError::Unauthorized)
        }
    }
}
