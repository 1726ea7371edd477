use crate::auth::AuthService;
use crate::hub::Hub;
use crate::models::{Chat, User};
use rocket::serde::json::Json;
use rocket::{State, get};
use std::sync::Arc;

use super::AuthedUser;

/// Active users with presence — the roster clients render.
#[get("/api/users")]
pub fn list_users(auth: &State<Arc<AuthService>>, _user: AuthedUser) -> Json<Vec<User>> {
    Json(auth.get_users())
}

/// Chats visible to the caller: Town Hall plus every DM of theirs.
#[get("/api/chats")]
pub fn list_chats(hub: &State<Arc<Hub>>, user: AuthedUser) -> Json<Vec<Chat>> {
    Json(hub.visible_chats(&user.user_id))
}
