use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_TTL_SECONDS: i64 = 86_400;
pub const MIN_PASSWORD_LEN: usize = 4;

/// Matches the cost of hashes already stored in `users`.
pub const BCRYPT_COST: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  Client,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Role::Admin => "admin",
      Role::Client => "client",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim() {
      "admin" => Some(Role::Admin),
      "client" => Some(Role::Client),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
  pub id: String,
  pub user_id: i64,
  pub role: Role,
  pub expires_at: DateTime<Utc>,
}

impl Session {
  pub fn new(user_id: i64, role: Role, now: DateTime<Utc>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      user_id,
      role,
      expires_at: now + Duration::seconds(SESSION_TTL_SECONDS),
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

fn cookie_attributes(secure: bool, max_age: i64) -> String {
  let secure = if secure { " Secure;" } else { "" };
  format!("Path=/; HttpOnly;{secure} SameSite=Strict; Max-Age={max_age}")
}

pub fn session_cookie(session_id: &str, secure: bool) -> String {
  format!("{SESSION_COOKIE}={session_id}; {}", cookie_attributes(secure, SESSION_TTL_SECONDS))
}

pub fn clear_session_cookie(secure: bool) -> String {
  format!("{SESSION_COOKIE}=; {}", cookie_attributes(secure, 0))
}

/// Value of cookie `name` from a raw `Cookie` header.
pub fn cookie_value(cookie_header: Option<&str>, name: &str) -> Option<String> {
  cookie_header?
    .split(';')
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(k, _)| k.trim() == name)
    .map(|(_, v)| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

const LEGACY_SHA256_SCHEME: &str = "sha256";

fn legacy_sha256_digest(salt_hex: &str, password: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(salt_hex.as_bytes());
  hasher.update(b"$");
  hasher.update(password.as_bytes());
  hex::encode(hasher.finalize())
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
  bcrypt::hash(password, BCRYPT_COST)
}

fn is_bcrypt(stored: &str) -> bool {
  stored.starts_with("$2")
}

/// Anything other than bcrypt should be rewritten after the next successful login.
pub fn needs_rehash(stored: &str) -> bool {
  !is_bcrypt(stored)
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
  if a.len() != b.len() {
    return false;
  }
  a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accepts bcrypt (`$2a$`, `$2b$`, `$2y$`) and legacy `sha256$<salt hex>$<digest hex>`.
/// Unknown hash formats never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
  if is_bcrypt(stored) {
    return bcrypt::verify(password, stored).unwrap_or(false);
  }

  let mut parts = stored.splitn(3, '$');
  let (Some(scheme), Some(salt_hex), Some(expected)) = (parts.next(), parts.next(), parts.next()) else {
    return false;
  };
  if scheme != LEGACY_SHA256_SCHEME || salt_hex.is_empty() {
    return false;
  }
  constant_time_eq(legacy_sha256_digest(salt_hex, password).as_bytes(), expected.as_bytes())
}
