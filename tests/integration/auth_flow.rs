use crate::common::{TestEnv, TestServer, auth_header, code_at_window, current_code};
use rocket::http::{ContentType, Status};

// --- Onboarding ---

#[test]
fn test_admin_onboarding() {
    let server = TestServer::new();
    let (_, reg_token) = server.add_user("alice");

    let res = server
        .client()
        .get(format!("/api/register-info?token={reg_token}"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let info: serde_json::Value = res.into_json().unwrap();
    assert_eq!(info["username"], "alice");
    let secret = info["totpSecret"].as_str().unwrap();
    assert!(!secret.is_empty());

    let code = current_code(secret);
    let res = server
        .client()
        .post("/api/register")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"token": "{reg_token}", "displayName": "Alice", "password": "pw1", "totp": "{code}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let session = body["token"].as_str().unwrap();
    assert!(session.starts_with("sess_"));
    assert!(body["tokenExpiry"].as_i64().unwrap() > chrono::Utc::now().timestamp());

    let res = server
        .client()
        .get("/api/me")
        .header(auth_header(session))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let me: serde_json::Value = res.into_json().unwrap();
    assert_eq!(me["name"], "Alice");
}

#[test]
fn test_register_info_unknown_token() {
    let server = TestServer::new();
    let res = server
        .client()
        .get("/api/register-info?token=reg_doesnotexist")
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_register_token_single_use() {
    let server = TestServer::new();
    let (_, reg_token) = server.add_user("alice");

    let res = server
        .client()
        .get(format!("/api/register-info?token={reg_token}"))
        .dispatch();
    let info: serde_json::Value = res.into_json().unwrap();
    let secret = info["totpSecret"].as_str().unwrap().to_string();

    let code = current_code(&secret);
    let res = server
        .client()
        .post("/api/register")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"token": "{reg_token}", "password": "pw1", "totp": "{code}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // The token was burned on completion.
    let code = code_at_window(&secret, 1);
    let res = server
        .client()
        .post("/api/register")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"token": "{reg_token}", "password": "pw2", "totp": "{code}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_reinvite_rotates_token_keeps_secret() {
    let server = TestServer::new();
    let (_, token1) = server.add_user("alice");

    let info1: serde_json::Value = server
        .client()
        .get(format!("/api/register-info?token={token1}"))
        .dispatch()
        .into_json()
        .unwrap();

    // Re-inviting an unfinished user rotates the token…
    let (_, token2) = server.add_user("alice");
    assert_ne!(token1, token2);

    // …so only the most recent one validates…
    let res = server
        .client()
        .get(format!("/api/register-info?token={token1}"))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);

    // …and the TOTP secret is unchanged.
    let info2: serde_json::Value = server
        .client()
        .get(format!("/api/register-info?token={token2}"))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(info1["totpSecret"], info2["totpSecret"]);
}

#[test]
fn test_add_user_conflict_when_active() {
    let server = TestServer::new();
    server.register_user("alice");
    let res = server
        .admin()
        .post("/admin/users")
        .header(ContentType::JSON)
        .header(server.admin_auth())
        .body(r#"{"username": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_add_user_invalid_charset() {
    let server = TestServer::new();
    let res = server
        .admin()
        .post("/admin/users")
        .header(ContentType::JSON)
        .header(server.admin_auth())
        .body(r#"{"username": "bad name!"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

// --- Login ---

#[test]
fn test_login_and_totp_replay_rejected() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    // Fresh window (registration consumed the current code's window is
    // irrelevant — lastTotp is 0 after setup).
    let res = server.login_with_window(&alice, 0);
    assert_eq!(res.status(), Status::Ok);

    // Immediately replaying the same code fails.
    let res = server.login_with_window(&alice, 0);
    assert_eq!(res.status(), Status::Unauthorized);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "Login failed");

    // A different (next-window) code is accepted.
    let res = server.login_with_window(&alice, 1);
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_login_wrong_password_generic_message() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let code = current_code(&alice.totp_secret);
    let res = server
        .client()
        .post("/api/login")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"username": "alice", "password": "wrong", "totp": "{code}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "Login failed");
}

#[test]
fn test_login_unknown_user() {
    let server = TestServer::new();
    let res = server
        .client()
        .post("/api/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "ghost", "password": "pw", "totp": "000000"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "Login failed");
}

#[test]
fn test_login_unfinished_setup_rejected() {
    let server = TestServer::new();
    server.add_user("pending");
    let res = server
        .client()
        .post("/api/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "pending", "password": "pw", "totp": "000000"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_login_throttled_after_failures() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    for _ in 0..4 {
        let res = server
            .client()
            .post("/api/login")
            .header(ContentType::JSON)
            .body(r#"{"username": "alice", "password": "wrong", "totp": "000000"}"#)
            .dispatch();
        assert_eq!(res.status(), Status::Unauthorized);
    }

    // Fifth attempt inside the back-off window is throttled, even with
    // the right credentials.
    let res = server.login_with_window(&alice, 0);
    assert_eq!(res.status(), Status::TooManyRequests);
    let body: serde_json::Value = res.into_json().unwrap();
    let msg = body["error"].as_str().unwrap();
    assert!(
        msg.starts_with("Too many failed login attempts"),
        "unexpected message: {msg}"
    );
}

// --- Sessions ---

#[test]
fn test_logoff_invalidates_token() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server
        .client()
        .get("/api/me")
        .header(auth_header(&alice.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = server
        .client()
        .post("/api/logoff")
        .header(auth_header(&alice.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = server
        .client()
        .get("/api/me")
        .header(auth_header(&alice.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_logoff_unknown_token_is_silent() {
    let server = TestServer::new();
    let res = server
        .client()
        .post("/api/logoff")
        .header(auth_header("sess_00000000000000000000000000000000"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_admin_reset_invalidates_all_sessions() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server.login_with_window(&alice, 0);
    let t1: serde_json::Value = res.into_json().unwrap();
    let t1 = t1["token"].as_str().unwrap().to_string();
    let res = server.login_with_window(&alice, 1);
    let t2: serde_json::Value = res.into_json().unwrap();
    let t2 = t2["token"].as_str().unwrap().to_string();

    let res = server
        .admin()
        .post(format!("/admin/users/{}/reset", alice.user_id))
        .header(server.admin_auth())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let url = body["registrationUrl"].as_str().unwrap();
    let new_reg = url.split("token=").nth(1).unwrap();

    for token in [&alice.session_token, &t1, &t2] {
        let res = server.client().get("/api/me").header(auth_header(token)).dispatch();
        assert_eq!(res.status(), Status::Unauthorized);
    }

    // The setup link completes registration with a new password; the
    // reset also rotated the TOTP secret.
    let info: serde_json::Value = server
        .client()
        .get(format!("/api/register-info?token={new_reg}"))
        .dispatch()
        .into_json()
        .unwrap();
    let new_secret = info["totpSecret"].as_str().unwrap();
    assert_ne!(new_secret, alice.totp_secret);

    let code = current_code(new_secret);
    let res = server
        .client()
        .post("/api/register")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"token": "{new_reg}", "password": "fresh-pw", "totp": "{code}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_delete_user_revokes_everything() {
    let server = TestServer::new();
    let bob = server.register_user("bob");

    let res = server
        .admin()
        .delete(format!("/admin/users/{}", bob.user_id))
        .header(server.admin_auth())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = server
        .client()
        .get("/api/me")
        .header(auth_header(&bob.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = server.login_with_window(&bob, 0);
    assert_eq!(res.status(), Status::Unauthorized);

    // Tombstone retained for the admin view only.
    let all: Vec<serde_json::Value> = server
        .admin()
        .get("/admin/users")
        .header(server.admin_auth())
        .dispatch()
        .into_json()
        .unwrap();
    let tomb = all.iter().find(|u| u["username"] == "bob").unwrap();
    assert_eq!(tomb["status"], "deleted");
}

#[test]
fn test_self_service_reset_password() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server
        .client()
        .post("/api/reset-password")
        .header(auth_header(&alice.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["registrationUrl"].as_str().unwrap().contains("token=reg_"));

    let res = server
        .client()
        .get("/api/me")
        .header(auth_header(&alice.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

// --- Sliding TTL ---

#[test]
fn test_sliding_token_expiry() {
    let env = TestEnv::with_token_expiry(1);
    let alice = env.create_active_user("alice");
    let code = code_at_window_for(&env, &alice.id);

    let (token, _) = env
        .app
        .auth
        .login(&alice.username, "pw-alice", &code)
        .expect("login");

    // Validations inside the TTL keep sliding it forward…
    std::thread::sleep(std::time::Duration::from_millis(600));
    assert!(env.app.auth.validate_token(&token).is_ok());
    std::thread::sleep(std::time::Duration::from_millis(600));
    assert!(env.app.auth.validate_token(&token).is_ok());

    // …but a gap longer than the TTL ends the session.
    std::thread::sleep(std::time::Duration::from_millis(1500));
    assert!(env.app.auth.validate_token(&token).is_err());
}

fn code_at_window_for(env: &TestEnv, user_id: &str) -> String {
    let secret = env.app.auth.get_user(user_id).unwrap().totp_secret;
    // Next window: registration already consumed the current one.
    code_at_window(&secret, 1)
}

// --- Legacy token migration ---

#[test]
fn test_legacy_plaintext_tokens_migrate_on_startup() {
    use rusqlite::{Connection, params};

    let tag = uuid::Uuid::new_v4().to_string();
    let db_path = format!("/tmp/besedka_legacy_{}.db", tag.split('-').next().unwrap());

    // Seed a pre-hashing database: a user and a plaintext token bucket.
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id TEXT PRIMARY KEY, username TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '', avatar_url TEXT,
                status TEXT NOT NULL DEFAULT 'created', online INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER NOT NULL DEFAULT 0, password_hash TEXT NOT NULL DEFAULT '',
                totp_secret TEXT NOT NULL DEFAULT '', last_totp INTEGER NOT NULL DEFAULT -1,
                failed_logins INTEGER NOT NULL DEFAULT 0, last_failed_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE tokens (token TEXT PRIMARY KEY, user_id TEXT NOT NULL);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO users (id, username, status, last_totp) VALUES ('u1', 'alice', 'active', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tokens (token, user_id) VALUES (?1, 'u1')",
            params!["sess_legacyraw"],
        )
        .unwrap();
    }

    let db = std::sync::Arc::new(besedka::db::Db::new(&db_path).unwrap());
    let auth = besedka::auth::AuthService::new(db.clone(), b"besedka-test-secret".to_vec(), 3600)
        .unwrap();

    // The raw token still works — via its hash.
    assert_eq!(auth.validate_token("sess_legacyraw").unwrap(), "u1");

    // Storage holds only the hashed form; the legacy bucket is gone.
    let conn = Connection::open(&db_path).unwrap();
    let legacy: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='tokens'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(legacy, 0);
    let (hash, user_id): (String, String) = conn
        .query_row("SELECT token_hash, user_id FROM tokens_v2", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(user_id, "u1");
    assert_ne!(hash, "sess_legacyraw");

    drop(conn);
    let _ = std::fs::remove_file(&db_path);
    let _ = std::fs::remove_file(format!("{db_path}-wal"));
    let _ = std::fs::remove_file(format!("{db_path}-shm"));
}
