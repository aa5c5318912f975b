use actix_web::dev::Server;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use reqwest::Url;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use tracing_actix_web::TracingLogger;

use crate::config::{DatabaseSettings, Settings};
use crate::domain::verification_token::VerificationToken;
use crate::email_client::EmailClient;
use crate::registry::SubscriberRegistry;
use crate::routes::{handle_list_users, handle_signup, handle_verify, health_check, AdminToken};

/// Front-end origin the verification links are built from.
#[derive(Debug, Clone)]
pub struct ApplicationBaseUrl(pub Url);

impl ApplicationBaseUrl {
    pub fn parse(base_url: &str) -> Result<Self, String> {
        let url = Url::parse(base_url)
            .map_err(|err| format!("{} is not a valid base url: {}", base_url, err))?;

        if url.cannot_be_a_base() {
            return Err(format!("{} cannot be used as a base url", base_url));
        }

        Ok(Self(url))
    }

    /// `<base_url>/verify?token=<token>`, with the token percent-encoded.
    pub fn verification_link(&self, token: &VerificationToken) -> Url {
        let mut link = self.0.clone();
        let path = format!("{}/verify", link.path().trim_end_matches('/'));

        link.set_path(&path);
        link.query_pairs_mut().append_pair("token", token.as_ref());

        link
    }
}

pub struct Application {
    pub port: u16,
    pub server: Server,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, std::io::Error> {
        let db_pool = get_connection_db_pool(&config.database);
        let sender_email = config
            .get_email_client_sender()
            .map_err(invalid_configuration)?;
        let email_client = EmailClient::new(
            config.email_client.base_url.clone(),
            sender_email,
            config.email_client.sender_name.clone(),
            config.email_client.api_key.clone(),
            Some(config.email_client.get_timeout()),
        )
        .map_err(invalid_configuration)?;
        let base_url =
            ApplicationBaseUrl::parse(&config.get_app_base_url()).map_err(invalid_configuration)?;
        let admin_token = AdminToken(config.get_admin_token());

        if admin_token.0.is_none() {
            tracing::warn!("No admin token configured, /api/admin/users is not authenticated");
        }

        let listener = TcpListener::bind(config.get_address())?;
        let port = listener.local_addr()?.port();
        let server = run(listener, db_pool, email_client, base_url, admin_token)?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn run(
    listener: TcpListener,
    db_pool: Pool<Postgres>,
    email_client: EmailClient,
    base_url: ApplicationBaseUrl,
    admin_token: AdminToken,
) -> Result<Server, std::io::Error> {
    let registry = web::Data::new(SubscriberRegistry::new(db_pool));
    let email_client = web::Data::new(email_client);
    let base_url = web::Data::new(base_url);
    let admin_token = web::Data::new(admin_token);

    let server = HttpServer::new(move || {
        // App is where your application logic lives: routing, middlewares, request handler, etc
        App::new()
            // 'wrap' method adds a middleware to the App. This specific middleware provide incoming
            // request logger
            .wrap(TracingLogger::default())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .route("/health", web::get().to(health_check))
            .route("/api/signup", web::post().to(handle_signup))
            .route("/api/verify", web::get().to(handle_verify))
            .route("/api/admin/users", web::get().to(handle_list_users))
            .app_data(registry.clone())
            .app_data(email_client.clone())
            .app_data(base_url.clone())
            .app_data(admin_token.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}

/// Malformed bodies get the same `{"error": ...}` shape as every other rejection.
fn json_error_handler(err: JsonPayloadError, _request: &HttpRequest) -> actix_web::Error {
    let response =
        HttpResponse::BadRequest().json(serde_json::json!({ "error": err.to_string() }));

    InternalError::from_response(err, response).into()
}

fn invalid_configuration(err: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
}
