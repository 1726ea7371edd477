use crate::models::{Attachment, Chat, ChatRecord, User};
use serde::{Deserialize, Serialize};

/// Events a client may send over the persistent connection.
/// One JSON object per frame, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Request the recent history of a chat; answered to this client only.
    Join { chat_id: String },
    /// Purely client-local (clears an unread marker); no server state changes.
    Leave { chat_id: String },
    /// Append a message to a chat and fan it out to online members.
    Send {
        chat_id: String,
        content: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
}

impl ClientEvent {
    pub fn chat_id(&self) -> &str {
        match self {
            ClientEvent::Join { chat_id }
            | ClientEvent::Leave { chat_id }
            | ClientEvent::Send { chat_id, .. } => chat_id,
        }
    }
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// History on join, or a freshly appended record, always in ascending
    /// sequence order.
    Messages {
        chat_id: String,
        messages: Vec<ChatRecord>,
    },
    /// A user connected or disconnected.
    Presence {
        user_id: String,
        online: bool,
        last_seen: i64,
    },
    /// Someone finished registration; `chat` is the DM the recipient now
    /// shares with them.
    NewUser { user: User, chat: Chat },
    /// Admin deleted a user; recipients prune their local DM lists.
    UserDeleted { user_id: String },
    /// Reported to the offending client only.
    Error { message: String },
}
