use crate::db::Db;
use crate::events::ServerEvent;
use crate::models::{Chat, ChatRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Delivery callback: invoked once per online member for every appended
/// record. Implementations must never block (the hub enqueues with
/// `try_send` and drops on a full queue).
pub type DeliverFn = Arc<dyn Fn(&str, ServerEvent) + Send + Sync>;

/// The per-chat message log: a bounded in-memory ring over the durable
/// sequence-keyed store. Appends assign gap-free, strictly increasing
/// sequences; the writer lock is held across the persistence write so
/// per-chat ordering equals persistence order.
pub struct ChatLog {
    chat_id: String,
    name: String,
    is_dm: bool,
    max_records: usize,
    deliver: DeliverFn,
    db: Arc<Db>,
    inner: RwLock<LogInner>,
}

struct LogInner {
    ring: VecDeque<ChatRecord>,
    /// Sequence of the oldest ring entry; last_seq + 1 while the ring is
    /// empty, so every read falls through to storage.
    first_seq: i64,
    last_seq: i64,
    /// Member → currently-online flag.
    members: HashMap<String, bool>,
}

impl ChatLog {
    /// `chat.last_seq` seeds the sequence counter; the ring starts empty
    /// and fills on append.
    pub fn new(chat: &Chat, max_records: usize, deliver: DeliverFn, db: Arc<Db>) -> Self {
        ChatLog {
            chat_id: chat.id.clone(),
            name: chat.name.clone(),
            is_dm: chat.is_dm,
            max_records,
            deliver,
            db,
            inner: RwLock::new(LogInner {
                ring: VecDeque::with_capacity(max_records),
                first_seq: chat.last_seq + 1,
                last_seq: chat.last_seq,
                members: HashMap::new(),
            }),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Current chat metadata (for /api/chats and new-user broadcasts).
    pub fn describe(&self) -> Chat {
        let inner = self.inner.read().unwrap();
        Chat {
            id: self.chat_id.clone(),
            name: self.name.clone(),
            is_dm: self.is_dm,
            last_seq: inner.last_seq,
        }
    }

    /// Assign the next sequence, persist, insert into the ring, then fan
    /// out to every online member. On a persistence error the in-memory
    /// state does not advance.
    pub fn append(&self, mut record: ChatRecord) -> Result<ChatRecord, rusqlite::Error> {
        let mut inner = self.inner.write().unwrap();
        record.seq = inner.last_seq + 1;
        self.db.append_message(&self.chat_id, &record)?;
        inner.last_seq = record.seq;
        if inner.ring.len() == self.max_records {
            inner.ring.pop_front();
        }
        inner.ring.push_back(record.clone());
        let first = inner.ring.front().map(|r| r.seq).unwrap_or(record.seq);
        inner.first_seq = first;

        for (user_id, online) in inner.members.iter() {
            if *online {
                (self.deliver)(
                    user_id,
                    ServerEvent::Messages {
                        chat_id: self.chat_id.clone(),
                        messages: vec![record.clone()],
                    },
                );
            }
        }
        Ok(record)
    }

    /// Records with sequences in `[from, to)`, ascending. Sequences below
    /// the ring come from storage, the rest from memory; the result is
    /// contiguous. Out-of-range bounds are clamped; `from >= to` is empty.
    pub fn get_range(&self, from: i64, to: i64) -> Result<Vec<ChatRecord>, rusqlite::Error> {
        let inner = self.inner.read().unwrap();
        let from = from.max(1);
        let to = to.min(inner.last_seq + 1);
        if from >= to {
            return Ok(Vec::new());
        }

        let mut result = Vec::with_capacity((to - from) as usize);
        let mem_start = inner.first_seq.max(from);
        if from < inner.first_seq {
            let stored = self
                .db
                .list_messages(&self.chat_id, from, to.min(inner.first_seq))?;
            result.extend(stored);
        }
        if mem_start < to && !inner.ring.is_empty() {
            let skip = (mem_start - inner.first_seq) as usize;
            let take = (to - mem_start) as usize;
            result.extend(inner.ring.iter().skip(skip).take(take).cloned());
        }
        Ok(result)
    }

    /// The up-to-`n` most recent records, ascending.
    pub fn get_last(&self, n: usize) -> Result<Vec<ChatRecord>, rusqlite::Error> {
        let last_seq = self.inner.read().unwrap().last_seq;
        let from = (last_seq - n as i64 + 1).max(1);
        self.get_range(from, last_seq + 1)
    }

    pub fn last_seq(&self) -> i64 {
        self.inner.read().unwrap().last_seq
    }

    /// Mark a member online. A member not previously known is added online.
    pub fn join(&self, user_id: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.members.insert(user_id.to_string(), true);
    }

    /// Mark a member offline. Unknown members are ignored.
    pub fn leave(&self, user_id: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(online) = inner.members.get_mut(user_id) {
            *online = false;
        }
    }
}
