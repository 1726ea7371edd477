use crate::db::Db;
use crate::models::{User, UserStatus};
use crate::totp;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

type HmacSha512 = Hmac<Sha512>;

/// Registration tokens expire after 24 hours.
pub const REGISTRATION_TOKEN_TTL_SECS: i64 = 24 * 3600;

/// After this many consecutive failures, logins are throttled.
const THROTTLE_AFTER_FAILURES: i64 = 3;

/// Interval between expired-token sweeps (seconds).
const TOKEN_SWEEP_INTERVAL_SECS: u64 = 60;

/// Every login failure surfaces the same message so attempts reveal
/// nothing about which step rejected them.
const LOGIN_FAILED: &str = "Login failed";

#[derive(Debug)]
pub enum AuthError {
    NotFound(&'static str),
    Unauthorized(&'static str),
    /// Seconds until the next attempt is allowed.
    Throttled(u64),
    Validation(&'static str),
    Conflict(&'static str),
    Persistence(rusqlite::Error),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::NotFound(msg) => write!(f, "{msg}"),
            AuthError::Unauthorized(msg) => write!(f, "{msg}"),
            AuthError::Throttled(secs) => write!(
                f,
                "Too many failed login attempts. Next attempt in {secs} seconds"
            ),
            AuthError::Validation(msg) => write!(f, "{msg}"),
            AuthError::Conflict(msg) => write!(f, "{msg}"),
            AuthError::Persistence(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Persistence(e)
    }
}

struct SessionEntry {
    user_id: String,
    /// Epoch seconds; pushed forward on every successful validation.
    expires_at: i64,
}

struct RegEntry {
    user_id: String,
    expires_at: i64,
}

/// The sole authority to admit, authenticate, and invalidate users.
///
/// Raw session tokens exist only on the wire; storage and the in-memory
/// cache hold keyed HMAC-SHA-512 hashes. Each user keeps an index of
/// their token hashes so reset/delete can revoke every session at once.
pub struct AuthService {
    db: Arc<Db>,
    secret: Vec<u8>,
    token_expiry_secs: i64,
    users: RwLock<HashMap<String, User>>,
    /// username → user ID, non-Deleted users only.
    usernames: RwLock<HashMap<String, String>>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    user_tokens: RwLock<HashMap<String, HashSet<String>>>,
    /// raw registration token → owner + expiry. One outstanding per user.
    reg_tokens: RwLock<HashMap<String, RegEntry>>,
}

impl AuthService {
    /// Rebuild all in-memory state from persistence: users (forced
    /// offline), live token hashes (fresh TTL), the username index, and
    /// outstanding registration tokens. Runs the legacy plaintext-token
    /// migration first.
    pub fn new(db: Arc<Db>, secret: Vec<u8>, token_expiry_secs: i64) -> Result<Self, AuthError> {
        let auth = AuthService {
            db,
            secret,
            token_expiry_secs,
            users: RwLock::new(HashMap::new()),
            usernames: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            user_tokens: RwLock::new(HashMap::new()),
            reg_tokens: RwLock::new(HashMap::new()),
        };

        let migrated = auth.db.migrate_legacy_tokens(|raw| auth.hash_token(raw))?;
        if migrated > 0 {
            println!("🔑 Migrated {migrated} legacy session tokens to hashed storage");
        }

        let now = now_secs();
        {
            let mut users = auth.users.write().unwrap();
            let mut usernames = auth.usernames.write().unwrap();
            for mut user in auth.db.list_users()? {
                user.online = false;
                if user.status != UserStatus::Deleted {
                    usernames.insert(user.username.clone(), user.id.clone());
                }
                users.insert(user.id.clone(), user);
            }
        }
        {
            let mut sessions = auth.sessions.write().unwrap();
            let mut user_tokens = auth.user_tokens.write().unwrap();
            for (hash, user_id) in auth.db.list_tokens()? {
                user_tokens
                    .entry(user_id.clone())
                    .or_default()
                    .insert(hash.clone());
                sessions.insert(
                    hash,
                    SessionEntry {
                        user_id,
                        expires_at: now + auth.token_expiry_secs,
                    },
                );
            }
        }
        {
            let mut reg_tokens = auth.reg_tokens.write().unwrap();
            for (user_id, token, created_at) in auth.db.list_registration_tokens()? {
                reg_tokens.insert(
                    token,
                    RegEntry {
                        user_id,
                        expires_at: created_at + REGISTRATION_TOKEN_TTL_SECS,
                    },
                );
            }
        }
        Ok(auth)
    }

    // --- hashing ---

    fn keyed_hash(&self, data: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison of `data` against a stored hex digest.
    fn keyed_hash_matches(&self, data: &[u8], stored_hex: &str) -> bool {
        let Ok(stored) = hex::decode(stored_hex) else {
            return false;
        };
        let mut mac = HmacSha512::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(data);
        mac.verify_slice(&stored).is_ok()
    }

    pub fn hash_password(&self, username: &str, password: &str) -> String {
        self.keyed_hash(format!("{username}{password}").as_bytes())
    }

    pub fn hash_token(&self, raw: &str) -> String {
        self.keyed_hash(raw.as_bytes())
    }

    // --- user lifecycle ---

    /// Provision a user and return them with a registration token. For a
    /// Created user with an unfinished setup this reissues a fresh token
    /// (invalidating the previous one) and keeps the existing TOTP secret.
    pub fn add_user(
        &self,
        username: &str,
        display_name: Option<&str>,
    ) -> Result<(User, String), AuthError> {
        let username = username.trim();
        if username.is_empty()
            || !username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(AuthError::Validation(
                "Username may only contain letters, digits, '.', '_' and '-'",
            ));
        }

        if let Some(existing) = self.find_by_username_any(username) {
            if existing.status == UserStatus::Created && existing.last_totp == -1 {
                let token = self.issue_registration_token(&existing.id)?;
                return Ok((existing, token));
            }
            return Err(AuthError::Conflict("User already exists"));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name: display_name.unwrap_or(username).to_string(),
            avatar_url: None,
            status: UserStatus::Created,
            online: false,
            last_seen: 0,
            password_hash: String::new(),
            totp_secret: totp::generate_secret(),
            last_totp: -1,
            failed_logins: 0,
            last_failed_at: 0,
        };
        self.db.upsert_user(&user)?;
        self.users
            .write()
            .unwrap()
            .insert(user.id.clone(), user.clone());
        self.usernames
            .write()
            .unwrap()
            .insert(user.username.clone(), user.id.clone());
        let token = self.issue_registration_token(&user.id)?;
        Ok((user, token))
    }

    /// What a setup link needs to show: who the invite is for and the TOTP
    /// secret to provision an authenticator with.
    pub fn registration_info(&self, token: &str) -> Result<(String, String, String), AuthError> {
        let user_id = self.resolve_registration_token(token)?;
        let users = self.users.read().unwrap();
        let user = users
            .get(&user_id)
            .ok_or(AuthError::NotFound("Unknown registration token"))?;
        Ok((
            user.username.clone(),
            user.display_name.clone(),
            user.totp_secret.clone(),
        ))
    }

    /// Finish setup: store the password hash, activate the user, burn the
    /// registration token, and mint a first session.
    pub fn complete_registration(
        &self,
        token: &str,
        display_name: Option<&str>,
        password: &str,
        totp_code: &str,
    ) -> Result<(User, String, i64), AuthError> {
        if password.is_empty() {
            return Err(AuthError::Validation("Password must not be empty"));
        }
        let user_id = self.resolve_registration_token(token)?;

        let user = {
            let mut users = self.users.write().unwrap();
            let user = users
                .get_mut(&user_id)
                .ok_or(AuthError::NotFound("Unknown registration token"))?;
            if user.last_totp != -1 {
                return Err(AuthError::Conflict("Registration already completed"));
            }
            let code = parse_code(totp_code).ok_or(AuthError::Unauthorized("Invalid TOTP code"))?;
            if !totp::verify(&user.totp_secret, code, now_secs()) {
                return Err(AuthError::Unauthorized("Invalid TOTP code"));
            }
            user.password_hash = self.hash_password(&user.username, password);
            if let Some(name) = display_name {
                let name = name.trim();
                if !name.is_empty() {
                    user.display_name = name.to_string();
                }
            }
            user.status = UserStatus::Active;
            user.last_totp = 0;
            self.db.upsert_user(user)?;
            user.clone()
        };

        self.remove_registration_token(&user_id);
        self.db.delete_registration_token(&user_id).ok();

        let (raw, expires_at) = self.mint_session(&user_id)?;
        Ok((user, raw, expires_at))
    }

    /// Password + TOTP login. Every failure path returns the same opaque
    /// message; the password HMAC is computed even for unknown usernames
    /// so timing does not reveal which step failed.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        totp_code: &str,
    ) -> Result<(String, i64), AuthError> {
        let now = now_secs();
        let user_id = {
            let users = self.users.read().unwrap();
            let user = self
                .usernames
                .read()
                .unwrap()
                .get(username.trim())
                .and_then(|id| users.get(id))
                .cloned();

            let Some(user) = user else {
                // Burn the same work as the real comparison.
                self.hash_password(username, password);
                return Err(AuthError::Unauthorized(LOGIN_FAILED));
            };
            if user.status != UserStatus::Active {
                self.hash_password(username, password);
                return Err(AuthError::Unauthorized(LOGIN_FAILED));
            }

            if user.failed_logins > THROTTLE_AFTER_FAILURES {
                let wait = 30 * user.failed_logins * user.failed_logins;
                let retry_at = user.last_failed_at + wait;
                if now < retry_at {
                    return Err(AuthError::Throttled((retry_at - now) as u64));
                }
            }

            user.id
        };

        let password_ok = {
            let users = self.users.read().unwrap();
            let Some(user) = users.get(&user_id) else {
                return Err(AuthError::Unauthorized(LOGIN_FAILED));
            };
            self.keyed_hash_matches(
                format!("{}{}", user.username, password).as_bytes(),
                &user.password_hash,
            )
        };
        if !password_ok {
            let mut users = self.users.write().unwrap();
            if let Some(user) = users.get_mut(&user_id) {
                user.failed_logins += 1;
                user.last_failed_at = now;
                self.db.upsert_user(user).ok();
            }
            return Err(AuthError::Unauthorized(LOGIN_FAILED));
        }

        {
            let mut users = self.users.write().unwrap();
            let user = users
                .get_mut(&user_id)
                .ok_or(AuthError::Unauthorized(LOGIN_FAILED))?;
            if user.last_totp == -1 {
                return Err(AuthError::Unauthorized(LOGIN_FAILED));
            }
            let code = parse_code(totp_code).ok_or(AuthError::Unauthorized(LOGIN_FAILED))?;
            // A code equal to the last accepted one is a replay.
            if code as i64 == user.last_totp {
                return Err(AuthError::Unauthorized(LOGIN_FAILED));
            }
            if !totp::verify(&user.totp_secret, code, now) {
                return Err(AuthError::Unauthorized(LOGIN_FAILED));
            }
            user.failed_logins = 0;
            user.last_failed_at = 0;
            user.last_totp = code as i64;
            self.db.upsert_user(user)?;
        }

        self.mint_session(&user_id)
    }

    // --- sessions ---

    fn mint_session(&self, user_id: &str) -> Result<(String, i64), AuthError> {
        let raw = format!("sess_{:032x}", uuid::Uuid::new_v4().as_u128());
        let hash = self.hash_token(&raw);
        let expires_at = now_secs() + self.token_expiry_secs;
        self.db.upsert_token(&hash, user_id)?;
        self.sessions.write().unwrap().insert(
            hash.clone(),
            SessionEntry {
                user_id: user_id.to_string(),
                expires_at,
            },
        );
        self.user_tokens
            .write()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .insert(hash);
        Ok((raw, expires_at))
    }

    /// Resolve a raw token to its user. A hit refreshes the TTL (sliding
    /// expiry) and marks the user online; presence persists best-effort.
    pub fn validate_token(&self, raw: &str) -> Result<String, AuthError> {
        let hash = self.hash_token(raw);
        let now = now_secs();
        let user_id = {
            let mut sessions = self.sessions.write().unwrap();
            match sessions.get_mut(&hash) {
                Some(entry) if entry.expires_at > now => {
                    entry.expires_at = now + self.token_expiry_secs;
                    entry.user_id.clone()
                }
                Some(entry) => {
                    let stale_user = entry.user_id.clone();
                    sessions.remove(&hash);
                    drop(sessions);
                    self.forget_token(&hash, Some(&stale_user));
                    return Err(AuthError::Unauthorized("unauthorized"));
                }
                None => return Err(AuthError::Unauthorized("unauthorized")),
            }
        };

        let mut users = self.users.write().unwrap();
        if let Some(user) = users.get_mut(&user_id) {
            user.online = true;
            user.last_seen = now;
            self.db.upsert_user(user).ok();
        }
        Ok(user_id)
    }

    /// Invalidate one session. Unknown tokens succeed silently.
    pub fn logoff(&self, raw: &str) {
        let hash = self.hash_token(raw);
        let entry = self.sessions.write().unwrap().remove(&hash);
        if let Some(entry) = entry {
            self.set_presence(&entry.user_id, false);
            self.forget_token(&hash, Some(&entry.user_id));
        } else {
            self.forget_token(&hash, None);
        }
    }

    /// Remove a token hash from persistence and the per-user index. The
    /// cache entry is assumed already gone.
    fn forget_token(&self, hash: &str, user_id: Option<&str>) {
        self.db.delete_token(hash).ok();
        let mut index = self.user_tokens.write().unwrap();
        match user_id {
            Some(uid) => {
                if let Some(set) = index.get_mut(uid) {
                    set.remove(hash);
                }
            }
            None => {
                for set in index.values_mut() {
                    set.remove(hash);
                }
            }
        }
    }

    /// Drop every live session of a user: cache, persistence, and index.
    fn revoke_user_tokens(&self, user_id: &str) {
        let hashes = self
            .user_tokens
            .write()
            .unwrap()
            .remove(user_id)
            .unwrap_or_default();
        let mut sessions = self.sessions.write().unwrap();
        for hash in hashes {
            sessions.remove(&hash);
            self.db.delete_token(&hash).ok();
        }
    }

    /// Expire overdue sessions and registration tokens. Runs periodically
    /// from a background task; expiry is also checked on access.
    pub fn sweep_expired(&self) {
        let now = now_secs();
        let expired: Vec<(String, String)> = {
            let mut sessions = self.sessions.write().unwrap();
            let dead: Vec<(String, String)> = sessions
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(h, e)| (h.clone(), e.user_id.clone()))
                .collect();
            for (hash, _) in &dead {
                sessions.remove(hash);
            }
            dead
        };
        for (hash, user_id) in expired {
            self.forget_token(&hash, Some(&user_id));
        }

        let dead_regs: Vec<(String, String)> = {
            let reg_tokens = self.reg_tokens.read().unwrap();
            reg_tokens
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(t, e)| (t.clone(), e.user_id.clone()))
                .collect()
        };
        for (token, user_id) in dead_regs {
            self.reg_tokens.write().unwrap().remove(&token);
            self.db.delete_registration_token(&user_id).ok();
        }
    }

    // --- registration tokens ---

    /// Issue a fresh registration token for a user, invalidating any
    /// outstanding one.
    pub fn issue_registration_token(&self, user_id: &str) -> Result<String, AuthError> {
        self.remove_registration_token(user_id);
        let raw = format!("reg_{:032x}", uuid::Uuid::new_v4().as_u128());
        let now = now_secs();
        self.db.upsert_registration_token(user_id, &raw, now)?;
        self.reg_tokens.write().unwrap().insert(
            raw.clone(),
            RegEntry {
                user_id: user_id.to_string(),
                expires_at: now + REGISTRATION_TOKEN_TTL_SECS,
            },
        );
        Ok(raw)
    }

    fn resolve_registration_token(&self, token: &str) -> Result<String, AuthError> {
        let reg_tokens = self.reg_tokens.read().unwrap();
        let entry = reg_tokens
            .get(token)
            .ok_or(AuthError::NotFound("Unknown registration token"))?;
        if entry.expires_at <= now_secs() {
            return Err(AuthError::NotFound("Registration token expired"));
        }
        Ok(entry.user_id.clone())
    }

    fn remove_registration_token(&self, user_id: &str) {
        let mut reg_tokens = self.reg_tokens.write().unwrap();
        reg_tokens.retain(|_, e| e.user_id != user_id);
    }

    // --- admin lifecycle ---

    /// Revoke every session, zero the password, rotate the TOTP secret,
    /// and return the user to Created with a fresh registration token.
    /// The caller must also force-disconnect them from the hub.
    pub fn reset_password(&self, user_id: &str) -> Result<String, AuthError> {
        {
            let mut users = self.users.write().unwrap();
            let user = users.get_mut(user_id).ok_or(AuthError::NotFound("Unknown user"))?;
            if user.status == UserStatus::Deleted {
                return Err(AuthError::NotFound("Unknown user"));
            }
            user.password_hash = String::new();
            user.totp_secret = totp::generate_secret();
            user.last_totp = -1;
            user.failed_logins = 0;
            user.last_failed_at = 0;
            user.status = UserStatus::Created;
            user.online = false;
            user.last_seen = now_secs();
            self.db.upsert_user(user)?;
        }
        self.revoke_user_tokens(user_id);
        self.issue_registration_token(user_id)
    }

    /// Tombstone a user: secrets zeroed, sessions revoked, record kept so
    /// stored messages continue to attribute by ID. The caller must also
    /// remove them from the hub.
    pub fn delete_user(&self, user_id: &str) -> Result<User, AuthError> {
        let user = {
            let mut users = self.users.write().unwrap();
            let user = users.get_mut(user_id).ok_or(AuthError::NotFound("Unknown user"))?;
            user.status = UserStatus::Deleted;
            user.password_hash = String::new();
            user.totp_secret = String::new();
            user.last_totp = -1;
            user.online = false;
            user.last_seen = now_secs();
            self.db.upsert_user(user)?;
            user.clone()
        };
        self.usernames.write().unwrap().remove(&user.username);
        self.revoke_user_tokens(user_id);
        self.remove_registration_token(user_id);
        self.db.delete_registration_token(user_id).ok();
        Ok(user)
    }

    // --- queries & presence ---

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.read().unwrap().get(user_id).cloned()
    }

    /// Active users only — the client-visible roster.
    pub fn get_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .read()
            .unwrap()
            .values()
            .filter(|u| u.status == UserStatus::Active)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Everyone, tombstones included (admin UI).
    pub fn get_all_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().unwrap().values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Flip presence; returns the recorded last-seen. Persists best-effort.
    pub fn set_presence(&self, user_id: &str, online: bool) -> i64 {
        let now = now_secs();
        let mut users = self.users.write().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            user.online = online;
            user.last_seen = now;
            self.db.upsert_user(user).ok();
        }
        now
    }

    pub fn update_display_name(&self, user_id: &str, name: &str) -> Result<(), AuthError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("Display name must not be empty"));
        }
        let mut users = self.users.write().unwrap();
        let user = users.get_mut(user_id).ok_or(AuthError::NotFound("Unknown user"))?;
        user.display_name = name.to_string();
        self.db.upsert_user(user)?;
        Ok(())
    }

    pub fn update_avatar_url(&self, user_id: &str, url: Option<&str>) -> Result<(), AuthError> {
        let mut users = self.users.write().unwrap();
        let user = users.get_mut(user_id).ok_or(AuthError::NotFound("Unknown user"))?;
        user.avatar_url = url.map(String::from);
        self.db.upsert_user(user)?;
        Ok(())
    }

    fn find_by_username_any(&self, username: &str) -> Option<User> {
        let users = self.users.read().unwrap();
        if let Some(id) = self.usernames.read().unwrap().get(username) {
            return users.get(id).cloned();
        }
        // Deleted users are out of the index but still block their name
        // from re-provisioning.
        users.values().find(|u| u.username == username).cloned()
    }
}

/// Spawn the periodic expired-token sweeper.
pub fn spawn_token_sweeper(auth: Arc<AuthService>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(TOKEN_SWEEP_INTERVAL_SECS)).await;
            auth.sweep_expired();
        }
    });
}

fn parse_code(code: &str) -> Option<u32> {
    let code = code.trim();
    if code.is_empty() || code.len() > 8 {
        return None;
    }
    code.parse::<u32>().ok()
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
