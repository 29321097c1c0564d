#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use api::{
    api_add_course, api_change_status, api_create_feedback, api_create_notification,
    api_delete_course, api_delete_feedback, api_delete_notification, api_download_resume,
    api_get_accepted_applications, api_get_all_applications, api_get_all_feedbacks,
    api_get_feedbacks_for, api_get_my_applications, api_get_notifications_for_role,
    api_get_notifications_for_user, api_get_profile, api_get_req_courses, api_login, api_logout,
    api_mark_notification_seen, api_signup, api_submit_application, api_update_profile,
    api_validate_session, health,
};
use auth::{
    bad_request_api, forbidden_api, internal_error_api, not_found_api, unauthorized_api,
    unprocessable_api,
};
use config::{AppConfig, TelemetryConfig, load_environment};
use db::clean_expired_sessions;
use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::AdHoc;
use rocket::fs::{FileServer, Options};
use rocket::{Build, Rocket};
use routes::spa_fallback;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use telemetry::{TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;
use tracing::{error, info};

const SESSION_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(anyhow::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Config(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let environment = load_environment()?;
    init_tracing(&TelemetryConfig::load())?;
    environment.log();

    let config = AppConfig::load()?;

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    spawn_session_sweeper(pool.clone());

    init_rocket(pool, config)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async { shutdown_telemetry() })
        }))
        .launch()
        .await?;

    Ok(())
}

fn spawn_session_sweeper(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS))
                .await;
        }
    });
}

pub fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting TA management server");

    let limits = Limits::default()
        .limit("file", 10.mebibytes())
        .limit("data-form", 12.mebibytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    let frontend_dir = config.frontend_dir.clone();

    rocket::custom(figment)
        .manage(pool)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_signup,
                api_login,
                api_logout,
                api_validate_session,
                api_get_profile,
                api_update_profile,
                api_submit_application,
                api_get_all_applications,
                api_get_my_applications,
                api_get_accepted_applications,
                api_change_status,
                api_download_resume,
                api_add_course,
                api_get_req_courses,
                api_delete_course,
                api_create_feedback,
                api_get_all_feedbacks,
                api_get_feedbacks_for,
                api_delete_feedback,
                api_create_notification,
                api_delete_notification,
                api_mark_notification_seen,
                api_get_notifications_for_user,
                api_get_notifications_for_role,
                health,
            ],
        )
        .register(
            "/api",
            catchers![
                bad_request_api,
                unauthorized_api,
                forbidden_api,
                not_found_api,
                unprocessable_api,
                internal_error_api,
            ],
        )
        .mount("/", FileServer::new(frontend_dir, Options::Missing | Options::Index))
        .mount("/", routes![spa_fallback])
        .attach(TelemetryFairing)
}
