use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;

use crate::auth::verify_token;
use crate::db::get_auth_user;
use crate::error::AppError;

use super::AuthUser;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let token = request
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "));

        let Some(token) = token else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let claims = match verify_token(token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::warn!(error = ?err, "Bearer token failed verification");
                return Outcome::Error((Status::Unauthorized, ()));
            }
        };

        let db = match request.rocket().state::<SqlitePool>() {
            Some(pool) => pool,
            _ => {
                tracing::error!("Database pool not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        // The token may outlive its subject; a deleted user gets 404.
        match get_auth_user(db, claims.sub).await {
            Ok(user) => {
                tracing::info!(username = %user.username, role = %user.role, "User authenticated via bearer token");
                Outcome::Success(user)
            }
            Err(AppError::NotFound(msg)) => {
                tracing::warn!(user_id = %claims.sub, message = %msg, "Token subject no longer exists");
                Outcome::Error((Status::NotFound, ()))
            }
            Err(err) => {
                tracing::error!(user_id = %claims.sub, error = ?err, "Failed to resolve token subject");
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Unauthorized",
        "message": "Authentication required"
    });

    Custom(Status::Unauthorized, Json(error_json))
}
