use besedka::App;
use besedka::config::Config;
use besedka::models::User;
use besedka::{admin_rocket, api_rocket, totp};
use rocket::http::{ContentType, Header};
use rocket::local::blocking::Client;
use std::path::PathBuf;

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "test-admin-pw";

/// Library-level fixture: a fully wired App on a unique temp DB.
/// Deletes the DB and uploads dir on drop (WAL sidecars included).
pub struct TestEnv {
    pub app: App,
    db_path: String,
    uploads: PathBuf,
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        let _ = std::fs::remove_dir_all(&self.uploads);
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_token_expiry(24 * 3600)
    }

    pub fn with_token_expiry(token_expiry_secs: i64) -> Self {
        let tag = uuid::Uuid::new_v4()
            .to_string()
            .split('-')
            .next()
            .unwrap()
            .to_string();
        let db_path = format!("/tmp/besedka_test_{tag}.db");
        let uploads = PathBuf::from(format!("/tmp/besedka_test_{tag}_uploads"));
        let config = Config {
            auth_secret: b"besedka-test-secret".to_vec(),
            db_path: db_path.clone(),
            api_addr: "127.0.0.1:8008".parse().unwrap(),
            admin_addr: "127.0.0.1:8009".parse().unwrap(),
            base_url: "http://localhost:8008".to_string(),
            uploads_path: uploads.clone(),
            token_expiry_secs,
            admin_user: ADMIN_USER.to_string(),
            admin_password: ADMIN_PASSWORD.to_string(),
        };
        let app = App::new(config).expect("app startup");
        TestEnv {
            app,
            db_path,
            uploads,
        }
    }

    /// Provision and activate a user directly through the auth service.
    pub fn create_active_user(&self, username: &str) -> User {
        let (user, reg_token) = self
            .app
            .auth
            .add_user(username, None)
            .expect("add user");
        let code = current_code(&user.totp_secret);
        let (user, _, _) = self
            .app
            .auth
            .complete_registration(&reg_token, None, &format!("pw-{username}"), &code)
            .expect("complete registration");
        user
    }
}

/// HTTP fixture: the API and admin rockets over one shared App.
/// Untracked clients — cookie auth is exercised explicitly where a test
/// cares about it; everything else authenticates via headers.
pub struct TestServer {
    pub env: TestEnv,
    client: Option<Client>,
    admin: Option<Client>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.client.take());
        drop(self.admin.take());
    }
}

impl TestServer {
    pub fn new() -> Self {
        let env = TestEnv::new();
        let client =
            Client::untracked(api_rocket(&env.app)).expect("valid api rocket instance");
        let admin =
            Client::untracked(admin_rocket(&env.app)).expect("valid admin rocket instance");
        TestServer {
            env,
            client: Some(client),
            admin: Some(admin),
        }
    }

    pub fn client(&self) -> &Client {
        self.client.as_ref().unwrap()
    }

    pub fn admin(&self) -> &Client {
        self.admin.as_ref().unwrap()
    }

    /// `Authorization: Basic` header for the admin API.
    pub fn admin_auth(&self) -> Header<'static> {
        basic_auth(ADMIN_USER, ADMIN_PASSWORD)
    }

    /// Provision a user via the admin API; returns (user_id, registration token).
    pub fn add_user(&self, username: &str) -> (String, String) {
        let res = self
            .admin()
            .post("/admin/users")
            .header(ContentType::JSON)
            .header(self.admin_auth())
            .body(format!(r#"{{"username": "{username}"}}"#))
            .dispatch();
        assert_eq!(res.status(), rocket::http::Status::Ok);
        let body: serde_json::Value = res.into_json().unwrap();
        let url = body["registrationUrl"].as_str().unwrap();
        let token = url.split("token=").nth(1).unwrap().to_string();
        (body["userId"].as_str().unwrap().to_string(), token)
    }

    /// Full onboarding over HTTP: admin invite → register-info → register.
    /// Returns the registered user's credentials.
    pub fn register_user(&self, username: &str) -> Registered {
        let (user_id, reg_token) = self.add_user(username);

        let res = self
            .client()
            .get(format!("/api/register-info?token={reg_token}"))
            .dispatch();
        assert_eq!(res.status(), rocket::http::Status::Ok);
        let info: serde_json::Value = res.into_json().unwrap();
        let totp_secret = info["totpSecret"].as_str().unwrap().to_string();

        let password = format!("pw-{username}");
        let code = current_code(&totp_secret);
        let res = self
            .client()
            .post("/api/register")
            .header(ContentType::JSON)
            .body(format!(
                r#"{{"token": "{reg_token}", "password": "{password}", "totp": "{code}"}}"#
            ))
            .dispatch();
        assert_eq!(res.status(), rocket::http::Status::Ok);
        let body: serde_json::Value = res.into_json().unwrap();

        Registered {
            user_id,
            username: username.to_string(),
            password,
            totp_secret,
            session_token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// POST /api/login with a TOTP code offset by `window` steps from now.
    pub fn login_with_window(
        &self,
        user: &Registered,
        window: i64,
    ) -> rocket::local::blocking::LocalResponse<'_> {
        let code = code_at_window(&user.totp_secret, window);
        self.client()
            .post("/api/login")
            .header(ContentType::JSON)
            .body(format!(
                r#"{{"username": "{}", "password": "{}", "totp": "{code}"}}"#,
                user.username, user.password
            ))
            .dispatch()
    }
}

pub struct Registered {
    pub user_id: String,
    pub username: String,
    pub password: String,
    pub totp_secret: String,
    pub session_token: String,
}

pub fn basic_auth(user: &str, password: &str) -> Header<'static> {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    Header::new("Authorization", format!("Basic {encoded}"))
}

pub fn auth_header(token: &str) -> Header<'static> {
    Header::new("X-Auth-Token", token.to_string())
}

/// The TOTP code for the current 30s window.
pub fn current_code(secret: &str) -> String {
    code_at_window(secret, 0)
}

/// The TOTP code `window` steps away from now. The verifier accepts ±1,
/// which lets tests mint distinct valid codes for consecutive logins.
pub fn code_at_window(secret: &str, window: i64) -> String {
    let now = chrono::Utc::now().timestamp() + window * totp::STEP_SECS;
    totp::format_code(totp::code_at(secret, now).expect("valid secret"))
}
