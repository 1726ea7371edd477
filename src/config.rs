use base64::Engine;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration. All values come from environment variables.
///
/// Environment variables:
/// - `AUTH_SECRET` — Required. Base64-encoded server secret keying all password
///   and session-token hashes.
/// - `BESEDKA_DB` — SQLite database path (default: `data/besedka.db`)
/// - `API_ADDR` — Public API listen address (default: `0.0.0.0:8008`)
/// - `ADMIN_ADDR` — Admin API listen address (default: `127.0.0.1:8009`)
/// - `BASE_URL` — External base URL used in setup links (default: `http://localhost:8008`)
/// - `UPLOADS_PATH` — Directory for uploaded image blobs (default: `data/uploads`)
/// - `TOKEN_EXPIRY` — Session token lifetime, e.g. `24h`, `30m`, `900s` (default: `24h`)
/// - `ADMIN_USER` — Basic-auth user for the admin API (default: `admin`)
/// - `ADMIN_PASSWORD` — Required. Basic-auth password for the admin API.
#[derive(Debug, Clone)]
pub struct Config {
    pub auth_secret: Vec<u8>,
    pub db_path: String,
    pub api_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub base_url: String,
    pub uploads_path: PathBuf,
    pub token_expiry_secs: i64,
    pub admin_user: String,
    pub admin_password: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let secret_b64 =
            env::var("AUTH_SECRET").map_err(|_| "AUTH_SECRET is required".to_string())?;
        let auth_secret = base64::engine::general_purpose::STANDARD
            .decode(secret_b64.trim())
            .map_err(|_| "AUTH_SECRET must be valid base64".to_string())?;
        if auth_secret.is_empty() {
            return Err("AUTH_SECRET must not be empty".to_string());
        }

        let db_path = env::var("BESEDKA_DB").unwrap_or_else(|_| "data/besedka.db".to_string());

        let api_addr = parse_addr(
            &env::var("API_ADDR").unwrap_or_else(|_| "0.0.0.0:8008".to_string()),
            "API_ADDR",
        )?;
        let admin_addr = parse_addr(
            &env::var("ADMIN_ADDR").unwrap_or_else(|_| "127.0.0.1:8009".to_string()),
            "ADMIN_ADDR",
        )?;

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8008".to_string())
            .trim_end_matches('/')
            .to_string();

        let uploads_path = env::var("UPLOADS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/uploads"));

        let token_expiry_secs = match env::var("TOKEN_EXPIRY") {
            Ok(val) => parse_duration_secs(&val)
                .ok_or_else(|| format!("TOKEN_EXPIRY: cannot parse duration '{val}'"))?,
            Err(_) => 24 * 3600,
        };
        if token_expiry_secs <= 0 {
            return Err("TOKEN_EXPIRY must be positive".to_string());
        }

        let admin_user = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
        let admin_password =
            env::var("ADMIN_PASSWORD").map_err(|_| "ADMIN_PASSWORD is required".to_string())?;
        if admin_password.is_empty() {
            return Err("ADMIN_PASSWORD must not be empty".to_string());
        }

        Ok(Config {
            auth_secret,
            db_path,
            api_addr,
            admin_addr,
            base_url,
            uploads_path,
            token_expiry_secs,
            admin_user,
            admin_password,
        })
    }

    /// Setup link for a registration token, rooted at BASE_URL.
    pub fn registration_url(&self, token: &str) -> String {
        format!("{}/register?token={}", self.base_url, token)
    }
}

fn parse_addr(val: &str, name: &str) -> Result<SocketAddr, String> {
    val.parse::<SocketAddr>()
        .map_err(|_| format!("{name}: cannot parse listen address '{val}'"))
}

/// Parse a duration like `24h`, `30m`, `900s` or a bare number of seconds.
pub fn parse_duration_secs(val: &str) -> Option<i64> {
    let val = val.trim();
    let (num, mult) = match val.as_bytes().last()? {
        b'h' => (&val[..val.len() - 1], 3600),
        b'm' => (&val[..val.len() - 1], 60),
        b's' => (&val[..val.len() - 1], 1),
        _ => (val, 1),
    };
    num.trim().parse::<i64>().ok().map(|n| n * mult)
}
