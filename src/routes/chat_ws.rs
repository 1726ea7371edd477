use crate::connection;
use crate::hub::Hub;
use rocket::{State, get};
use rocket_ws as ws;
use std::sync::Arc;

use super::AuthedUser;

/// Upgrade to the persistent duplex connection. Authentication happens
/// before the upgrade (guard); the connection adapter owns the socket
/// from there.
#[get("/api/chat")]
pub fn chat_socket(
    ws: ws::WebSocket,
    user: AuthedUser,
    hub: &State<Arc<Hub>>,
) -> ws::Channel<'static> {
    let hub = hub.inner().clone();
    let user_id = user.user_id;
    ws.channel(move |stream| Box::pin(connection::run(stream, hub, user_id)))
}
