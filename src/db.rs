use crate::models::{Chat, ChatRecord, FileMeta, User, UserStatus};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

/// SQLite persistence. One connection behind a mutex; every public
/// operation is a single statement or a single transaction, so each
/// write is independently snapshot-consistent.
pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                avatar_url TEXT,
                status TEXT NOT NULL DEFAULT 'created',
                online INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER NOT NULL DEFAULT 0,
                password_hash TEXT NOT NULL DEFAULT '',
                totp_secret TEXT NOT NULL DEFAULT '',
                last_totp INTEGER NOT NULL DEFAULT -1,
                failed_logins INTEGER NOT NULL DEFAULT 0,
                last_failed_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_dm INTEGER NOT NULL DEFAULT 0,
                last_seq INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS messages (
                chat_id TEXT NOT NULL REFERENCES chats(id),
                seq INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                attachments TEXT,
                PRIMARY KEY (chat_id, seq)
            );

            CREATE TABLE IF NOT EXISTS tokens_v2 (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens_v2(user_id);

            CREATE TABLE IF NOT EXISTS registration_tokens (
                user_id TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                mime TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                owner TEXT NOT NULL,
                scope TEXT NOT NULL DEFAULT 'chat'
            );",
        )?;
        Ok(())
    }

    /// One-time migration from the legacy plaintext `tokens` table: hash
    /// each stored raw token with the server secret, move it into
    /// `tokens_v2`, and drop the old table — all in one transaction.
    pub fn migrate_legacy_tokens(
        &self,
        hash: impl Fn(&str) -> String,
    ) -> Result<usize, rusqlite::Error> {
        let mut conn = self.conn.lock().unwrap();
        let legacy_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tokens'",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)?;
        if !legacy_exists {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let entries: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT token, user_id FROM tokens")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        for (raw, user_id) in &entries {
            tx.execute(
                "INSERT OR REPLACE INTO tokens_v2 (token_hash, user_id) VALUES (?1, ?2)",
                params![hash(raw), user_id],
            )?;
        }
        tx.execute_batch("DROP TABLE tokens;")?;
        tx.commit()?;
        Ok(entries.len())
    }

    // --- users ---

    pub fn upsert_user(&self, user: &User) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO users
             (id, username, display_name, avatar_url, status, online, last_seen,
              password_hash, totp_secret, last_totp, failed_logins, last_failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                user.id,
                user.username,
                user.display_name,
                user.avatar_url,
                user.status.as_str(),
                user.online as i64,
                user.last_seen,
                user.password_hash,
                user.totp_secret,
                user.last_totp,
                user.failed_logins,
                user.last_failed_at,
            ],
        )?;
        Ok(())
    }

    /// Every stored user, tombstones included.
    pub fn list_users(&self) -> Result<Vec<User>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, username, display_name, avatar_url, status, online, last_seen,
                    password_hash, totp_secret, last_totp, failed_logins, last_failed_at
             FROM users",
        )?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect()
    }

    // --- chats ---

    pub fn upsert_chat(&self, chat: &Chat) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO chats (id, name, is_dm, last_seq) VALUES (?1, ?2, ?3, ?4)",
            params![chat.id, chat.name, chat.is_dm as i64, chat.last_seq],
        )?;
        Ok(())
    }

    pub fn list_chats(&self) -> Result<Vec<Chat>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, is_dm, last_seq FROM chats")?;
        let rows = stmt.query_map([], |row| {
            Ok(Chat {
                id: row.get(0)?,
                name: row.get(1)?,
                is_dm: row.get::<_, i64>(2)? != 0,
                last_seq: row.get(3)?,
            })
        })?;
        rows.collect()
    }

    // --- messages ---

    /// Persist a record and advance the parent chat's last_seq in one
    /// transaction. Rejects an unknown chat ID with `QueryReturnedNoRows`.
    pub fn append_message(
        &self,
        chat_id: &str,
        record: &ChatRecord,
    ) -> Result<(), rusqlite::Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE chats SET last_seq = ?1 WHERE id = ?2",
            params![record.seq, chat_id],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        let attachments = if record.attachments.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.attachments).unwrap_or_default())
        };
        tx.execute(
            "INSERT INTO messages (chat_id, seq, timestamp, user_id, content, attachments)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chat_id,
                record.seq,
                record.timestamp,
                record.user_id,
                record.content,
                attachments,
            ],
        )?;
        tx.commit()
    }

    /// Records of a chat with seq in `[from, to)`, ascending.
    pub fn list_messages(
        &self,
        chat_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<ChatRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seq, timestamp, user_id, content, attachments
             FROM messages WHERE chat_id = ?1 AND seq >= ?2 AND seq < ?3
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![chat_id, from, to], row_to_record)?;
        rows.collect()
    }

    // --- session tokens ---

    pub fn upsert_token(&self, token_hash: &str, user_id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tokens_v2 (token_hash, user_id) VALUES (?1, ?2)",
            params![token_hash, user_id],
        )?;
        Ok(())
    }

    pub fn delete_token(&self, token_hash: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM tokens_v2 WHERE token_hash = ?1",
            params![token_hash],
        )?;
        Ok(())
    }

    /// All (token_hash, user_id) pairs.
    pub fn list_tokens(&self) -> Result<Vec<(String, String)>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT token_hash, user_id FROM tokens_v2")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    // --- registration tokens ---

    pub fn upsert_registration_token(
        &self,
        user_id: &str,
        token: &str,
        created_at: i64,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO registration_tokens (user_id, token, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, token, created_at],
        )?;
        Ok(())
    }

    pub fn delete_registration_token(&self, user_id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM registration_tokens WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// All (user_id, token, created_at) triples.
    pub fn list_registration_tokens(&self) -> Result<Vec<(String, String, i64)>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT user_id, token, created_at FROM registration_tokens")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        rows.collect()
    }

    // --- files ---

    /// Idempotent: inserting the same content-addressed ID twice is a no-op.
    pub fn insert_file(&self, meta: &FileMeta) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO files (id, hash, mime, size, created_at, owner, scope)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                meta.id,
                meta.hash,
                meta.mime,
                meta.size,
                meta.created_at,
                meta.owner,
                meta.scope,
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileMeta>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, hash, mime, size, created_at, owner, scope FROM files WHERE id = ?1",
            params![id],
            |row| {
                Ok(FileMeta {
                    id: row.get(0)?,
                    hash: row.get(1)?,
                    mime: row.get(2)?,
                    size: row.get(3)?,
                    created_at: row.get(4)?,
                    owner: row.get(5)?,
                    scope: row.get(6)?,
                })
            },
        )
        .optional()
    }
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    let status: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        status: UserStatus::parse(&status),
        online: row.get::<_, i64>(5)? != 0,
        last_seen: row.get(6)?,
        password_hash: row.get(7)?,
        totp_secret: row.get(8)?,
        last_totp: row.get(9)?,
        failed_logins: row.get(10)?,
        last_failed_at: row.get(11)?,
    })
}

fn row_to_record(row: &rusqlite::Row) -> Result<ChatRecord, rusqlite::Error> {
    let attachments: Option<String> = row.get(4)?;
    Ok(ChatRecord {
        seq: row.get(0)?,
        timestamp: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        attachments: attachments
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    })
}

// --- blob store ---
// Uploaded bytes are content-addressed by their SHA-256 and stored on disk;
// the `files` table holds metadata only.

pub fn store_blob(dir: &Path, hash: &str, data: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(hash);
    if path.exists() {
        return Ok(());
    }
    std::fs::write(path, data)
}

pub fn read_blob(dir: &Path, hash: &str) -> std::io::Result<Vec<u8>> {
    std::fs::read(dir.join(hash))
}
