use crate::auth::now_secs;
use crate::config::Config;
use crate::db::{Db, read_blob, store_blob};
use crate::models::{FileMeta, ImageUpload};
use rocket::http::{ContentType, Status};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::{AuthedUser, SameOrigin};

/// Max image size after base64 decode: 10MB.
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Content-addressed upload: the file ID is the SHA-256 of the bytes, so
/// re-uploading the same image is a no-op.
#[post("/api/upload/image", format = "json", data = "<body>")]
pub fn upload_image(
    db: &State<Arc<Db>>,
    config: &State<Config>,
    user: AuthedUser,
    _origin: SameOrigin,
    body: Json<ImageUpload>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    use base64::Engine;

    let mime = body.mime.trim().to_ascii_lowercase();
    if !ALLOWED_MIME.contains(&mime.as_str()) {
        return Err((
            Status::BadRequest,
            Json(serde_json::json!({"error": "Unsupported image type"})),
        ));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&body.data)
        .map_err(|_| {
            (
                Status::BadRequest,
                Json(serde_json::json!({"error": "Invalid base64 data"})),
            )
        })?;
    if decoded.is_empty() {
        return Err((
            Status::BadRequest,
            Json(serde_json::json!({"error": "Image data must not be empty"})),
        ));
    }
    if decoded.len() > MAX_IMAGE_SIZE {
        return Err((
            Status::BadRequest,
            Json(serde_json::json!({
                "error": format!("Image too large: {} bytes (max {} bytes)", decoded.len(), MAX_IMAGE_SIZE)
            })),
        ));
    }

    let hash = hex::encode(Sha256::digest(&decoded));
    store_blob(&config.uploads_path, &hash, &decoded).map_err(|e| {
        eprintln!("⚠️ blob write failed: {e}");
        (
            Status::InternalServerError,
            Json(serde_json::json!({"error": "Internal error"})),
        )
    })?;
    db.insert_file(&FileMeta {
        id: hash.clone(),
        hash: hash.clone(),
        mime,
        size: decoded.len() as i64,
        created_at: now_secs(),
        owner: user.user_id,
        scope: "chat".to_string(),
    })
    .map_err(|e| {
        eprintln!("⚠️ storage error: {e}");
        (
            Status::InternalServerError,
            Json(serde_json::json!({"error": "Internal error"})),
        )
    })?;

    Ok(Json(serde_json::json!({"id": hash})))
}

#[get("/api/images/<id>")]
pub fn get_image(
    db: &State<Arc<Db>>,
    config: &State<Config>,
    _user: AuthedUser,
    id: &str,
) -> Result<(ContentType, Vec<u8>), (Status, Json<serde_json::Value>)> {
    let not_found = || {
        (
            Status::NotFound,
            Json(serde_json::json!({"error": "Image not found"})),
        )
    };
    let meta = db.get_file(id).ok().flatten().ok_or_else(not_found)?;
    let data = read_blob(&config.uploads_path, &meta.hash).map_err(|_| not_found())?;
    let content_type = ContentType::parse_flexible(&meta.mime).unwrap_or(ContentType::Binary);
    Ok((content_type, data))
}
