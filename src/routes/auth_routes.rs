use crate::auth::AuthService;
use crate::config::Config;
use crate::hub::Hub;
use crate::models::{LoginRequest, RegisterRequest, RegistrationInfo, SetupLink, TokenResponse};
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use std::sync::Arc;

use super::{AuthedUser, SameOrigin, auth_error, session_token};

fn session_cookie(token: &str) -> Cookie<'static> {
    Cookie::build(("token", token.to_string()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .build()
}

#[post("/api/login", format = "json", data = "<body>")]
pub fn login(
    auth: &State<Arc<AuthService>>,
    cookies: &CookieJar<'_>,
    _origin: SameOrigin,
    body: Json<LoginRequest>,
) -> Result<Json<TokenResponse>, (Status, Json<serde_json::Value>)> {
    let (token, token_expiry) = auth
        .login(&body.username, &body.password, &body.totp)
        .map_err(auth_error)?;
    cookies.add(session_cookie(&token));
    Ok(Json(TokenResponse {
        token,
        token_expiry,
    }))
}

/// Complete an invited user's setup. On success the user becomes Active,
/// their DM chats are materialized, and everyone online hears about them.
#[post("/api/register", format = "json", data = "<body>")]
pub fn register(
    auth: &State<Arc<AuthService>>,
    hub: &State<Arc<Hub>>,
    cookies: &CookieJar<'_>,
    _origin: SameOrigin,
    body: Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, (Status, Json<serde_json::Value>)> {
    let (user, token, token_expiry) = auth
        .complete_registration(
            &body.token,
            body.display_name.as_deref(),
            &body.password,
            &body.totp,
        )
        .map_err(auth_error)?;

    hub.ensure_dms_for(&user, &auth.get_users())
        .map_err(auth_error)?;
    hub.broadcast_new_user(&user);

    cookies.add(session_cookie(&token));
    Ok(Json(TokenResponse {
        token,
        token_expiry,
    }))
}

#[get("/api/register-info?<token>")]
pub fn register_info(
    auth: &State<Arc<AuthService>>,
    token: &str,
) -> Result<Json<RegistrationInfo>, (Status, Json<serde_json::Value>)> {
    let (username, display_name, totp_secret) =
        auth.registration_info(token).map_err(auth_error)?;
    Ok(Json(RegistrationInfo {
        username,
        display_name,
        totp_secret,
    }))
}

/// Invalidates the presented token. Unknown tokens succeed silently, so
/// this never needs the AuthedUser guard.
#[post("/api/logoff")]
pub fn logoff(
    auth: &State<Arc<AuthService>>,
    cookies: &CookieJar<'_>,
    _origin: SameOrigin,
    req_token: RawToken,
) -> Json<serde_json::Value> {
    if let Some(raw) = req_token.0 {
        auth.logoff(&raw);
    }
    cookies.remove(Cookie::build("token").path("/"));
    Json(serde_json::json!({"ok": true}))
}

/// Raw token without validation; logoff must accept expired or unknown
/// tokens without erroring.
pub struct RawToken(pub Option<String>);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for RawToken {
    type Error = ();

    async fn from_request(
        req: &'r rocket::request::Request<'_>,
    ) -> rocket::request::Outcome<Self, Self::Error> {
        rocket::request::Outcome::Success(RawToken(session_token(req)))
    }
}

/// Self-service reset: revokes every session (including this one) and
/// returns a fresh setup link. The connection, if any, is closed.
#[post("/api/reset-password")]
pub fn reset_password(
    auth: &State<Arc<AuthService>>,
    hub: &State<Arc<Hub>>,
    config: &State<Config>,
    cookies: &CookieJar<'_>,
    _origin: SameOrigin,
    user: AuthedUser,
) -> Result<Json<SetupLink>, (Status, Json<serde_json::Value>)> {
    let username = auth
        .get_user(&user.user_id)
        .map(|u| u.username)
        .unwrap_or_default();
    let token = auth.reset_password(&user.user_id).map_err(auth_error)?;
    hub.disconnect_user(&user.user_id);
    cookies.remove(Cookie::build("token").path("/"));
    Ok(Json(SetupLink {
        user_id: user.user_id,
        username,
        registration_url: config.registration_url(&token),
    }))
}

#[get("/api/me")]
pub fn me(
    auth: &State<Arc<AuthService>>,
    user: AuthedUser,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let me = auth.get_user(&user.user_id).ok_or((
        Status::Unauthorized,
        Json(serde_json::json!({"error": "unauthorized"})),
    ))?;
    Ok(Json(serde_json::json!({"id": me.id, "name": me.display_name})))
}
