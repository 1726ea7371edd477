use crate::auth::{AuthError, AuthService, now_secs};
use crate::chatlog::ChatLog;
use crate::db::Db;
use crate::events::{ClientEvent, ServerEvent};
use crate::models::{Chat, ChatRecord, User, UserStatus};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

pub const TOWNHALL_ID: &str = "townhall";
pub const TOWNHALL_NAME: &str = "Town Hall";

/// Ring capacities (Town Hall sees far more traffic than any DM).
pub const TOWNHALL_MAX_RECORDS: usize = 100;
pub const DM_MAX_RECORDS: usize = 50;

/// Per-user delivery queue capacity. A full queue drops the event: the
/// record is already durable, and a slow client catches up by re-joining
/// the chat and fetching history.
pub const DELIVERY_QUEUE_CAPACITY: usize = 100;

/// Canonical DM chat ID for an unordered user pair.
pub fn dm_chat_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("dm_{lo}_{hi}")
}

/// The two participant IDs of a DM chat, if the ID parses as one.
fn dm_participants(chat_id: &str) -> Option<(&str, &str)> {
    chat_id.strip_prefix("dm_")?.split_once('_')
}

/// Connected users and their bounded delivery queues. Kept separate from
/// the hub so chat-log callbacks can capture it without a hub reference.
pub(crate) struct Connected {
    map: RwLock<HashMap<String, mpsc::Sender<ServerEvent>>>,
}

impl Connected {
    /// Non-blocking enqueue; drops the event when the queue is full or
    /// the user is offline.
    fn deliver(&self, user_id: &str, event: ServerEvent) {
        if let Some(tx) = self.map.read().unwrap().get(user_id) {
            let _ = tx.try_send(event);
        }
    }
}

/// The process-wide fan-out engine: chat registry, connection registry,
/// presence, dispatch, and lifecycle broadcasts.
pub struct Hub {
    chats: RwLock<HashMap<String, Arc<ChatLog>>>,
    connected: Arc<Connected>,
    auth: Arc<AuthService>,
    db: Arc<Db>,
}

impl Hub {
    /// Load the chat registry from persistence: Town Hall (created if
    /// missing) plus a DM chat for every pair of Active users. Ring
    /// buffers start empty and fill on demand.
    pub fn new(db: Arc<Db>, auth: Arc<AuthService>) -> Result<Arc<Hub>, AuthError> {
        let hub = Arc::new(Hub {
            chats: RwLock::new(HashMap::new()),
            connected: Arc::new(Connected {
                map: RwLock::new(HashMap::new()),
            }),
            auth,
            db,
        });

        let stored = hub.db.list_chats()?;
        {
            let mut chats = hub.chats.write().unwrap();
            for chat in &stored {
                chats.insert(chat.id.clone(), hub.make_log(chat));
            }
        }
        if !hub.chats.read().unwrap().contains_key(TOWNHALL_ID) {
            let townhall = Chat {
                id: TOWNHALL_ID.to_string(),
                name: TOWNHALL_NAME.to_string(),
                is_dm: false,
                last_seq: 0,
            };
            hub.db.upsert_chat(&townhall)?;
            hub.chats
                .write()
                .unwrap()
                .insert(townhall.id.clone(), hub.make_log(&townhall));
        }

        let active = hub.auth.get_users();
        for user in &active {
            hub.ensure_dms_for(user, &active)?;
        }
        Ok(hub)
    }

    fn make_log(&self, chat: &Chat) -> Arc<ChatLog> {
        let capacity = if chat.is_dm {
            DM_MAX_RECORDS
        } else {
            TOWNHALL_MAX_RECORDS
        };
        let connected = self.connected.clone();
        let deliver = Arc::new(move |user_id: &str, event: ServerEvent| {
            connected.deliver(user_id, event);
        });
        Arc::new(ChatLog::new(chat, capacity, deliver, self.db.clone()))
    }

    /// Create (in memory and storage) the canonical DM between `user` and
    /// every other Active user in `all`. Idempotent.
    pub fn ensure_dms_for(&self, user: &User, all: &[User]) -> Result<(), AuthError> {
        for other in all {
            if other.id == user.id || other.status != UserStatus::Active {
                continue;
            }
            let id = dm_chat_id(&user.id, &other.id);
            if self.chats.read().unwrap().contains_key(&id) {
                continue;
            }
            let (lo, hi) = if user.username <= other.username {
                (&user.username, &other.username)
            } else {
                (&other.username, &user.username)
            };
            let chat = Chat {
                id: id.clone(),
                name: format!("{lo} & {hi}"),
                is_dm: true,
                last_seq: 0,
            };
            self.db.upsert_chat(&chat)?;
            self.chats.write().unwrap().insert(id, self.make_log(&chat));
        }
        Ok(())
    }

    /// Whether a user belongs to a chat: everyone belongs to Town Hall,
    /// a DM only to the two users named by its ID.
    fn is_chat_member(chat_id: &str, user_id: &str) -> bool {
        if chat_id == TOWNHALL_ID {
            return true;
        }
        match dm_participants(chat_id) {
            Some((a, b)) => a == user_id || b == user_id,
            None => false,
        }
    }

    /// Register a connection: allocate the delivery queue, mark the user
    /// online in every chat of theirs, and announce presence to everyone
    /// else. A prior connection of the same user is displaced (its queue
    /// closes). The caller drains the returned receiver to the transport.
    pub fn join(&self, user_id: &str) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);
        self.connected
            .map
            .write()
            .unwrap()
            .insert(user_id.to_string(), tx);

        for log in self.chats.read().unwrap().values() {
            if Self::is_chat_member(log.chat_id(), user_id) {
                log.join(user_id);
            }
        }
        self.auth.set_presence(user_id, true);
        self.broadcast_except(
            user_id,
            ServerEvent::Presence {
                user_id: user_id.to_string(),
                online: true,
                last_seen: now_secs(),
            },
        );
        rx
    }

    /// Tear down a connection: membership flags off, queue removed,
    /// presence persisted and announced to whoever is still connected.
    pub fn leave(&self, user_id: &str) {
        for log in self.chats.read().unwrap().values() {
            if Self::is_chat_member(log.chat_id(), user_id) {
                log.leave(user_id);
            }
        }
        self.connected.map.write().unwrap().remove(user_id);
        let last_seen = self.auth.set_presence(user_id, false);
        self.broadcast_except(
            user_id,
            ServerEvent::Presence {
                user_id: user_id.to_string(),
                online: false,
                last_seen,
            },
        );
    }

    /// Validate and execute one client event. Errors go back to the
    /// sender only; other clients never observe them.
    pub fn dispatch(&self, user_id: &str, event: ClientEvent) -> Result<(), HubError> {
        let chat_id = event.chat_id().to_string();
        let log = {
            let chats = self.chats.read().unwrap();
            chats.get(&chat_id).cloned()
        };
        let log = log.ok_or(HubError::UnknownChat)?;
        if !Self::is_chat_member(&chat_id, user_id) {
            return Err(HubError::NotAMember);
        }

        match event {
            ClientEvent::Join { .. } => {
                // History for this client only. Idempotent.
                let messages = log.get_last(log.max_records())?;
                self.connected.deliver(
                    user_id,
                    ServerEvent::Messages {
                        chat_id,
                        messages,
                    },
                );
                Ok(())
            }
            ClientEvent::Leave { .. } => Ok(()),
            ClientEvent::Send {
                content,
                attachments,
                ..
            } => {
                let content = content.trim().to_string();
                if content.is_empty() && attachments.is_empty() {
                    return Err(HubError::EmptyMessage);
                }
                log.append(ChatRecord {
                    seq: 0,
                    timestamp: now_secs(),
                    user_id: user_id.to_string(),
                    content,
                    attachments,
                })?;
                Ok(())
            }
        }
    }

    /// Announce a freshly registered user. Each recipient also learns the
    /// DM chat they now share with them.
    pub fn broadcast_new_user(&self, user: &User) {
        let recipients: Vec<String> = self
            .connected
            .map
            .read()
            .unwrap()
            .keys()
            .filter(|id| *id != &user.id)
            .cloned()
            .collect();
        for recipient in recipients {
            let dm_id = dm_chat_id(&user.id, &recipient);
            let chat = self
                .chats
                .read()
                .unwrap()
                .get(&dm_id)
                .map(|log| log.describe());
            if let Some(chat) = chat {
                self.connected.deliver(
                    &recipient,
                    ServerEvent::NewUser {
                        user: user.clone(),
                        chat,
                    },
                );
            }
        }
    }

    /// Admin deleted a user: close their connection, drop every DM of
    /// theirs from the registry (stored messages remain), tell everyone
    /// else to prune.
    pub fn remove_deleted_user(&self, user_id: &str) {
        self.connected.map.write().unwrap().remove(user_id);
        self.chats.write().unwrap().retain(|chat_id, _| {
            match dm_participants(chat_id) {
                Some((a, b)) => a != user_id && b != user_id,
                None => true,
            }
        });
        self.broadcast_except(
            user_id,
            ServerEvent::UserDeleted {
                user_id: user_id.to_string(),
            },
        );
    }

    /// Close a user's connection without any broadcast (password reset).
    pub fn disconnect_user(&self, user_id: &str) {
        self.connected.map.write().unwrap().remove(user_id);
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.connected.map.read().unwrap().contains_key(user_id)
    }

    /// Chats visible to a user: Town Hall plus their DMs.
    pub fn visible_chats(&self, user_id: &str) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .chats
            .read()
            .unwrap()
            .values()
            .filter(|log| Self::is_chat_member(log.chat_id(), user_id))
            .map(|log| log.describe())
            .collect();
        chats.sort_by(|a, b| a.id.cmp(&b.id));
        chats
    }

    fn broadcast_except(&self, except: &str, event: ServerEvent) {
        let map = self.connected.map.read().unwrap();
        for (user_id, tx) in map.iter() {
            if user_id != except {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

#[derive(Debug)]
pub enum HubError {
    UnknownChat,
    NotAMember,
    EmptyMessage,
    Persistence(rusqlite::Error),
}

impl From<rusqlite::Error> for HubError {
    fn from(e: rusqlite::Error) -> Self {
        HubError::Persistence(e)
    }
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::UnknownChat => write!(f, "Unknown chat"),
            HubError::NotAMember => write!(f, "Not a member of this chat"),
            HubError::EmptyMessage => write!(f, "Message must not be empty"),
            HubError::Persistence(e) => write!(f, "storage error: {e}"),
        }
    }
}
