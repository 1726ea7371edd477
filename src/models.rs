use serde::{Deserialize, Serialize};

/// User lifecycle. Admin provisioning creates `Created`; finishing
/// registration moves to `Active`; admin password reset returns to
/// `Created`; admin delete tombstones as `Deleted` (the record is kept so
/// old messages keep attributing by ID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Created,
    Active,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Created => "created",
            UserStatus::Active => "active",
            UserStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> UserStatus {
        match s {
            "active" => UserStatus::Active,
            "deleted" => UserStatus::Deleted,
            _ => UserStatus::Created,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub online: bool,
    /// Epoch seconds of the last observed activity.
    pub last_seen: i64,
    // Credentials never leave the server.
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip)]
    pub totp_secret: String,
    /// Last accepted TOTP code. -1 until registration completes.
    #[serde(skip)]
    pub last_totp: i64,
    #[serde(skip)]
    pub failed_logins: i64,
    #[serde(skip)]
    pub last_failed_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub is_dm: bool,
    pub last_seq: i64,
}

/// A single chat message. Sequences are per-chat, gap-free, assigned at
/// append time. Records are never updated or deleted.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub seq: i64,
    /// Epoch seconds.
    pub timestamp: i64,
    pub user_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub mime: String,
    /// Content-addressed file ID (see /api/upload/image).
    pub id: String,
}

/// Metadata for an uploaded blob; the bytes live on disk keyed by content hash.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub id: String,
    pub hash: String,
    pub mime: String,
    pub size: i64,
    pub created_at: i64,
    pub owner: String,
    pub scope: String,
}

// --- Request bodies ---

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub totp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub token: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub password: String,
    pub totp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageUpload {
    pub name: String,
    pub mime: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

// --- Response bodies ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    /// Absolute expiry, epoch seconds. Sliding: every successful validation
    /// pushes it forward by the configured lifetime.
    pub token_expiry: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    pub username: String,
    pub display_name: String,
    pub totp_secret: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupLink {
    pub user_id: String,
    pub username: String,
    pub registration_url: String,
}
