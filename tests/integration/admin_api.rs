use crate::common::{TestServer, basic_auth};
use rocket::http::{ContentType, Status};

// --- Basic auth ---

#[test]
fn test_admin_requires_credentials() {
    let server = TestServer::new();
    let res = server.admin().get("/admin/users").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = server
        .admin()
        .get("/admin/users")
        .header(basic_auth("admin", "wrong-password"))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = server
        .admin()
        .get("/admin/users")
        .header(basic_auth("not-admin", crate::common::ADMIN_PASSWORD))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

// --- User management ---

#[test]
fn test_admin_add_user_returns_setup_link() {
    let server = TestServer::new();
    let res = server
        .admin()
        .post("/admin/users")
        .header(ContentType::JSON)
        .header(server.admin_auth())
        .body(r#"{"username": "dana", "displayName": "Dana"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["username"], "dana");
    let url = body["registrationUrl"].as_str().unwrap();
    assert!(url.starts_with("http://localhost:8008/register?token=reg_"));
}

#[test]
fn test_admin_list_includes_all_lifecycle_states() {
    let server = TestServer::new();
    server.register_user("active-user");
    server.add_user("pending-user");
    let doomed = server.register_user("doomed-user");
    server
        .admin()
        .delete(format!("/admin/users/{}", doomed.user_id))
        .header(server.admin_auth())
        .dispatch();

    let all: Vec<serde_json::Value> = server
        .admin()
        .get("/admin/users")
        .header(server.admin_auth())
        .dispatch()
        .into_json()
        .unwrap();
    let status_of = |name: &str| {
        all.iter()
            .find(|u| u["username"] == name)
            .map(|u| u["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(status_of("active-user"), "active");
    assert_eq!(status_of("pending-user"), "created");
    assert_eq!(status_of("doomed-user"), "deleted");
}

#[test]
fn test_admin_reset_unknown_user() {
    let server = TestServer::new();
    let res = server
        .admin()
        .post("/admin/users/no-such-id/reset")
        .header(server.admin_auth())
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_admin_delete_unknown_user() {
    let server = TestServer::new();
    let res = server
        .admin()
        .delete("/admin/users/no-such-id")
        .header(server.admin_auth())
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_admin_delete_frees_username_for_tombstone_only() {
    // A deleted user's name stays reserved; re-adding it conflicts.
    let server = TestServer::new();
    let bob = server.register_user("bob");
    server
        .admin()
        .delete(format!("/admin/users/{}", bob.user_id))
        .header(server.admin_auth())
        .dispatch();

    let res = server
        .admin()
        .post("/admin/users")
        .header(ContentType::JSON)
        .header(server.admin_auth())
        .body(r#"{"username": "bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}
