use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use sqlx::SqlitePool;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::db::{get_session_by_token, get_user};
use crate::error::{AppError, ErrorResponse};

use super::token::{SESSION_COOKIE, verify_token};
use super::User;

/// Resolves a session token to the user that still lists it as active.
pub async fn resolve_session(
    pool: &SqlitePool,
    config: &AppConfig,
    token: &str,
) -> Result<User, AppError> {
    let claims = verify_token(token, &config.jwt_secret)?;

    let session = get_session_by_token(pool, token).await?;
    if session.user_id != claims.sub {
        return Err(AppError::Authentication("Invalid session".to_string()));
    }
    if !session.is_valid() {
        return Err(AppError::Authentication("Session expired".to_string()));
    }

    match get_user(pool, claims.sub).await {
        Ok(user) => Ok(user),
        Err(AppError::NotFound(_)) => Err(AppError::Authentication("Invalid session".to_string())),
        Err(err) => Err(err),
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");

        async move {
            let Some(token) = request
                .cookies()
                .get(SESSION_COOKIE)
                .map(|c| c.value().to_string())
            else {
                tracing::debug!("No session cookie on request");
                return Outcome::Error((
                    Status::Unauthorized,
                    AppError::Authentication("No token provided".to_string()),
                ));
            };

            let (Some(pool), Some(config)) = (
                request.rocket().state::<SqlitePool>(),
                request.rocket().state::<AppConfig>(),
            ) else {
                tracing::error!("Database pool or config not found in managed state");
                return Outcome::Error((
                    Status::InternalServerError,
                    AppError::Internal("Missing managed state".to_string()),
                ));
            };

            match resolve_session(pool, config, &token).await {
                Ok(user) => {
                    tracing::info!(username = %user.username, role = %user.role.as_str(), "User authenticated via session token");
                    Outcome::Success(user)
                }
                Err(err) => {
                    let status = err.status_code();
                    err.log_and_record("Session resolution");
                    Outcome::Error((status, err))
                }
            }
        }
        .instrument(auth_span)
        .await
    }
}

fn error_json(status: Status, message: &str) -> Custom<Json<ErrorResponse>> {
    Custom(status, Json(ErrorResponse::new(message)))
}

#[catch(400)]
pub fn bad_request_api(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_json(Status::BadRequest, "Malformed request")
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_json(Status::Unauthorized, "Authentication required")
}

#[catch(403)]
pub fn forbidden_api(req: &Request) -> Custom<Json<ErrorResponse>> {
    tracing::warn!(uri = %req.uri(), "Forbidden access attempt");
    error_json(
        Status::Forbidden,
        "You don't have permission to perform this action",
    )
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_json(Status::NotFound, "Resource not found")
}

// Bodies that parse but don't fit the expected shape are a client error too.
#[catch(422)]
pub fn unprocessable_api(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_json(Status::BadRequest, "Invalid request body")
}

#[catch(500)]
pub fn internal_error_api(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_json(Status::InternalServerError, "Internal server error")
}
