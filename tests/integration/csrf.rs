use crate::common::{TestServer, auth_header};
use rocket::http::{Header, Status};

// Same-origin enforcement on POSTs: a browser-sent Origin (or Referer)
// must match the Host header, or the request is refused even with a
// valid session.

#[test]
fn test_post_with_mismatched_origin_rejected() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server
        .client()
        .post("/api/logoff")
        .header(auth_header(&alice.session_token))
        .header(Header::new("Host", "localhost:8008"))
        .header(Header::new("Origin", "http://evil.example"))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    // The session was untouched.
    let res = server
        .client()
        .get("/api/me")
        .header(auth_header(&alice.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_post_with_matching_origin_allowed() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server
        .client()
        .post("/api/logoff")
        .header(auth_header(&alice.session_token))
        .header(Header::new("Host", "localhost:8008"))
        .header(Header::new("Origin", "http://localhost:8008"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_post_with_matching_referer_allowed() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server
        .client()
        .post("/api/logoff")
        .header(auth_header(&alice.session_token))
        .header(Header::new("Host", "localhost:8008"))
        .header(Header::new("Referer", "http://localhost:8008/chat"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_post_with_mismatched_referer_rejected() {
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server
        .client()
        .post("/api/logoff")
        .header(auth_header(&alice.session_token))
        .header(Header::new("Host", "localhost:8008"))
        .header(Header::new("Referer", "http://evil.example/chat"))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_post_without_browser_headers_allowed() {
    // Programmatic clients send neither Origin nor Referer.
    let server = TestServer::new();
    let alice = server.register_user("alice");

    let res = server
        .client()
        .post("/api/logoff")
        .header(auth_header(&alice.session_token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}
