#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod db;
mod env;
mod error;
mod models;
mod telemetry;
mod validation;

#[cfg(test)]
mod test;

use std::sync::Mutex;

use api::{
    api_create_dossier, api_create_exam_center, api_create_school, api_create_student,
    api_create_user, api_delete_exam_center, api_delete_school, api_delete_student,
    api_delete_user, api_get_dossier, api_get_dossiers, api_get_dossiers_by_school,
    api_get_exam_center, api_get_exam_centers, api_get_school, api_get_school_recent_activity,
    api_get_school_stats, api_get_schools, api_get_student, api_get_student_dossier_progress,
    api_get_students, api_get_students_by_school, api_get_users, api_login,
    api_update_dossier_step, api_update_exam_center, api_update_school, api_update_student,
    api_update_user, health,
};
use auth::unauthorized_api;
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use telemetry::{OtelGuard, TelemetryFairing, init_tracing};
use tracing::info;

static TELEMETRY_GUARD: Mutex<Option<OtelGuard>> = Mutex::new(None);

#[launch]
async fn rocket() -> _ {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    let guard = init_tracing();
    if let Ok(mut slot) = TELEMETRY_GUARD.lock() {
        *slot = guard;
    }

    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();

    let pool = SqlitePool::connect(&database_url)
        .await
        .expect("Failed to connect to SQLite database");

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    if let Err(e) = db::ensure_default_admin(&pool).await {
        error!("Failed to seed default admin user: {}", e);
    }

    init_rocket(pool).await
}

pub async fn init_rocket(pool: SqlitePool) -> Rocket<Build> {
    info!("Starting dossier tracker");

    rocket::build()
        .manage(pool)
        .mount(
            "/api",
            routes![
                api_login,
                api_get_dossiers,
                api_get_dossiers_by_school,
                api_get_dossier,
                api_create_dossier,
                api_update_dossier_step,
                api_get_schools,
                api_get_school,
                api_create_school,
                api_update_school,
                api_delete_school,
                api_get_school_stats,
                api_get_school_recent_activity,
                api_get_students,
                api_get_students_by_school,
                api_get_student,
                api_create_student,
                api_update_student,
                api_delete_student,
                api_get_student_dossier_progress,
                api_get_users,
                api_create_user,
                api_update_user,
                api_delete_user,
                api_get_exam_centers,
                api_get_exam_center,
                api_create_exam_center,
                api_update_exam_center,
                api_delete_exam_center,
            ],
        )
        .register("/api", catchers![unauthorized_api])
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
