use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// RFC 6238 time step.
pub const STEP_SECS: i64 = 30;
const DIGITS: u32 = 6;

/// Fresh base32-encoded 160-bit shared secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..4]);
    BASE32_NOPAD.encode(&bytes)
}

/// The 6-digit code for a given counter value. None if the secret is not
/// valid base32.
fn hotp(secret_b32: &str, counter: i64) -> Option<u32> {
    let key = BASE32_NOPAD.decode(secret_b32.as_bytes()).ok()?;
    let mut mac = HmacSha1::new_from_slice(&key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    // Dynamic truncation (RFC 4226 §5.3).
    let offset = (digest[19] & 0x0f) as usize;
    let code = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Some(code % 10u32.pow(DIGITS))
}

/// The code valid at `unix` seconds.
pub fn code_at(secret_b32: &str, unix: i64) -> Option<u32> {
    hotp(secret_b32, unix / STEP_SECS)
}

/// Verify a presented code against the previous, current, and next time
/// windows, tolerating ±30 s of clock skew.
pub fn verify(secret_b32: &str, code: u32, unix: i64) -> bool {
    let window = unix / STEP_SECS;
    (window - 1..=window + 1).any(|w| hotp(secret_b32, w) == Some(code))
}

/// Zero-padded display form, as entered by users.
pub fn format_code(code: u32) -> String {
    format!("{code:06}")
}
