// Route module decomposition — each domain area in its own file.
// Shared request guards live here; route functions in submodules.

mod auth_routes;
mod chat_ws;
mod files;
mod roster;
mod system;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use auth_routes::{login, logoff, me, register, register_info, reset_password};
pub use chat_ws::chat_socket;
pub use files::{get_image, upload_image};
pub use roster::{list_chats, list_users};
pub use system::{forbidden, health, not_found, unauthorized};

use crate::auth::{AuthError, AuthService};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use std::sync::Arc;

/// Map a core auth error onto the transport: status code plus a JSON
/// error body. Login failures all surface the same opaque message.
pub(crate) fn auth_error(e: AuthError) -> (Status, Json<serde_json::Value>) {
    let status = match &e {
        AuthError::NotFound(_) => Status::NotFound,
        AuthError::Unauthorized(_) => Status::Unauthorized,
        AuthError::Throttled(_) => Status::TooManyRequests,
        AuthError::Validation(_) => Status::BadRequest,
        AuthError::Conflict(_) => Status::Conflict,
        AuthError::Persistence(_) => Status::InternalServerError,
    };
    let message = match &e {
        // Storage detail stays in the server log.
        AuthError::Persistence(inner) => {
            eprintln!("⚠️ storage error: {inner}");
            "Internal error".to_string()
        }
        other => other.to_string(),
    };
    (status, Json(serde_json::json!({"error": message})))
}

/// Extract the raw session token: `Authorization: Bearer` or
/// `X-Auth-Token` for programmatic clients, else the `token` cookie.
pub(crate) fn session_token(req: &Request<'_>) -> Option<String> {
    if let Some(auth) = req.headers().get_one("Authorization")
        && let Some(token) = auth.strip_prefix("Bearer ")
    {
        return Some(token.to_string());
    }
    if let Some(token) = req.headers().get_one("X-Auth-Token") {
        return Some(token.to_string());
    }
    req.cookies().get("token").map(|c| c.value().to_string())
}

/// A validated session. Resolving this guard slides the token's TTL and
/// refreshes the user's presence.
pub struct AuthedUser {
    pub user_id: String,
    pub raw_token: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthedUser {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(auth) = req.rocket().state::<Arc<AuthService>>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let Some(raw_token) = session_token(req) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        match auth.validate_token(&raw_token) {
            Ok(user_id) => Outcome::Success(AuthedUser {
                user_id,
                raw_token,
            }),
            Err(_) => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// CSRF defense for cookie-authenticated POSTs: when a browser sends an
/// Origin (or, failing that, a Referer), its host must match the Host
/// header. Requests carrying neither header pass (non-browser clients).
pub struct SameOrigin;

fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = &rest[..rest.find('/').unwrap_or(rest.len())];
    if host.is_empty() { None } else { Some(host) }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SameOrigin {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let host = match req.host() {
            Some(h) => h.to_string().to_lowercase(),
            None => return Outcome::Success(SameOrigin),
        };
        let origin = req.headers().get_one("Origin");
        let referer = req.headers().get_one("Referer");
        if origin.is_none() && referer.is_none() {
            return Outcome::Success(SameOrigin);
        }
        let origin_ok = origin
            .and_then(url_host)
            .is_some_and(|h| h.to_lowercase() == host);
        let referer_ok = referer
            .and_then(url_host)
            .is_some_and(|h| h.to_lowercase() == host);
        if origin_ok || referer_ok {
            Outcome::Success(SameOrigin)
        } else {
            Outcome::Error((Status::Forbidden, ()))
        }
    }
}
