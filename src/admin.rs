// Admin API — served on its own listener (ADMIN_ADDR), never exposed on
// the public port. Basic auth against ADMIN_USER / ADMIN_PASSWORD.

use crate::auth::AuthService;
use crate::config::Config;
use crate::hub::Hub;
use crate::models::{AddUserRequest, SetupLink, User};
use crate::routes::auth_error;
use base64::Engine;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub struct AdminAuth;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminAuth {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let authorized = req
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Basic "))
            .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|creds| {
                creds
                    .split_once(':')
                    .map(|(user, pass)| (user.to_string(), pass.to_string()))
            })
            .is_some_and(|(user, pass)| {
                let user_ok = user.as_bytes().ct_eq(config.admin_user.as_bytes());
                let pass_ok = pass.as_bytes().ct_eq(config.admin_password.as_bytes());
                bool::from(user_ok & pass_ok)
            });
        if authorized {
            Outcome::Success(AdminAuth)
        } else {
            Outcome::Error((Status::Unauthorized, ()))
        }
    }
}

/// Everyone, tombstones included.
#[get("/admin/users")]
pub fn admin_list_users(auth: &State<Arc<AuthService>>, _admin: AdminAuth) -> Json<Vec<User>> {
    Json(auth.get_all_users())
}

/// Provision a user (or re-invite one stuck in setup) and return the
/// setup link to hand to them out of band.
#[post("/admin/users", format = "json", data = "<body>")]
pub fn admin_add_user(
    auth: &State<Arc<AuthService>>,
    config: &State<Config>,
    _admin: AdminAuth,
    body: Json<AddUserRequest>,
) -> Result<Json<SetupLink>, (Status, Json<serde_json::Value>)> {
    let (user, token) = auth
        .add_user(&body.username, body.display_name.as_deref())
        .map_err(auth_error)?;
    Ok(Json(SetupLink {
        user_id: user.id,
        username: user.username,
        registration_url: config.registration_url(&token),
    }))
}

/// Revoke every session, return the user to Created, and force their
/// connection closed. Responds with the fresh setup link.
#[post("/admin/users/<id>/reset")]
pub fn admin_reset_password(
    auth: &State<Arc<AuthService>>,
    hub: &State<Arc<Hub>>,
    config: &State<Config>,
    _admin: AdminAuth,
    id: &str,
) -> Result<Json<SetupLink>, (Status, Json<serde_json::Value>)> {
    let username = auth.get_user(id).map(|u| u.username).unwrap_or_default();
    let token = auth.reset_password(id).map_err(auth_error)?;
    hub.disconnect_user(id);
    Ok(Json(SetupLink {
        user_id: id.to_string(),
        username,
        registration_url: config.registration_url(&token),
    }))
}

/// Tombstone a user. Their connection closes, their DMs leave the
/// registry (messages remain attributed by ID), everyone else is told.
#[delete("/admin/users/<id>")]
pub fn admin_delete_user(
    auth: &State<Arc<AuthService>>,
    hub: &State<Arc<Hub>>,
    _admin: AdminAuth,
    id: &str,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    auth.delete_user(id).map_err(auth_error)?;
    hub.remove_deleted_user(id);
    Ok(Json(serde_json::json!({"deleted": true})))
}
