//! # Authentication
//!
//! Implements the four control-protocol authentication methods and the
//! policy for picking one from a `PROTOCOLINFO` reply.

use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

/// How often [`wait_for_cookie_bytes`] retries a failed read.
const COOKIE_POLL_INTERVAL: Duration = Duration::from_millis(250);

type HmacSha256 = Hmac<Sha256>;

/// Keys control-spec §3.5 defines for the SAFECOOKIE HMAC exchange.
const SERVER_HASH_KEY: &[u8] = b"Tor safe cookie authentication server-to-controller hash";
const CLIENT_HASH_KEY: &[u8] = b"Tor safe cookie authentication controller-to-server hash";

const COOKIE_NONCE_LEN: usize = 32;

/// Which authentication method to use, selected from the methods a Tor
/// instance advertises via `PROTOCOLINFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Null,
    Password(String),
    Cookie,
    SafeCookie,
}

/// Supplies authentication material on demand: cookie-file bytes or a
/// password. Kept abstract so the core never touches a filesystem path
/// itself beyond reading the bytes it is handed.
pub trait AuthMaterialProvider: Send + Sync {
    fn cookie_bytes(&self) -> Result<Vec<u8>>;
    fn password(&self) -> Result<String>;
}

/// An [`AuthMaterialProvider`] that reads a cookie file from disk and/or
/// holds a fixed password, the common case for a local Tor instance.
pub struct FileAuthMaterialProvider {
    pub cookie_path: Option<std::path::PathBuf>,
    pub password: Option<String>,
}

impl AuthMaterialProvider for FileAuthMaterialProvider {
    fn cookie_bytes(&self) -> Result<Vec<u8>> {
        let path = self
            .cookie_path
            .as_ref()
            .ok_or_else(|| Error::unsupported("no cookie file path configured"))?;
        Ok(std::fs::read(path)?)
    }

    fn password(&self) -> Result<String> {
        self.password
            .clone()
            .ok_or_else(|| Error::unsupported("no password configured"))
    }
}

/// Reads the cookie file via `provider`, retrying every 250 ms until
/// `deadline` if the read fails, to tolerate a race against Tor's own
/// startup (the control port can be accepting connections slightly before
/// the cookie file exists on disk). Returns the last error once the
/// deadline passes.
pub async fn wait_for_cookie_bytes(
    provider: &dyn AuthMaterialProvider,
    deadline: Instant,
) -> Result<Vec<u8>> {
    loop {
        match provider.cookie_bytes() {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(e);
                }
                debug!("cookie file not ready yet, retrying");
                tokio::time::sleep(COOKIE_POLL_INTERVAL).await;
            }
        }
    }
}

/// Selects an [`AuthMethod`] from the set of method names `PROTOCOLINFO`
/// advertised (e.g. `["COOKIE", "SAFECOOKIE", "PASSWORD"]`), per the policy
/// in the connect sequence: prefer SAFECOOKIE if offered, then COOKIE, then
/// PASSWORD, then NULL.
pub fn select_auth_method(advertised: &[String], password: Option<&str>) -> Result<AuthMethod> {
    let has = |name: &str| advertised.iter().any(|m| m.eq_ignore_ascii_case(name));
    if has("SAFECOOKIE") {
        Ok(AuthMethod::SafeCookie)
    } else if has("COOKIE") {
        Ok(AuthMethod::Cookie)
    } else if has("PASSWORD") {
        match password {
            Some(pw) => Ok(AuthMethod::Password(pw.to_string())),
            None => Err(Error::Unsupported(
                "server requires PASSWORD authentication but none was configured".into(),
            )),
        }
    } else if has("NULL") {
        Ok(AuthMethod::Null)
    } else {
        Err(Error::Unsupported(format!(
            "no supported authentication method among {advertised:?}"
        )))
    }
}

/// Escapes a password per control-spec quoted-string rules: backslash,
/// double-quote, and control characters are backslash-escaped.
pub fn escape_password(password: &str) -> String {
    let mut out = String::with_capacity(password.len() + 2);
    for c in password.chars() {
        match c {
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                out.push_str(&format!("\\{:03o}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// A freshly generated 32-byte client nonce for the SAFECOOKIE handshake.
pub fn generate_client_nonce() -> [u8; COOKIE_NONCE_LEN] {
    let mut nonce = [0u8; COOKIE_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Verifies the server's HMAC from an `AUTHCHALLENGE` reply and computes the
/// client's responding HMAC, per control-spec §3.5:
///
/// ```text
/// ServerHash = HMAC-SHA256(key="...server-to-controller hash", cookie || client_nonce || server_nonce)
/// ClientHash = HMAC-SHA256(key="...controller-to-server hash", cookie || client_nonce || server_nonce)
/// ```
pub fn verify_and_compute_safecookie(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    server_hash: &[u8],
) -> Result<Vec<u8>> {
    let expected_server_hash = hmac_over(SERVER_HASH_KEY, cookie, client_nonce, server_nonce)?;
    if expected_server_hash != server_hash {
        return Err(Error::protocol(
            "SAFECOOKIE server hash did not match expected HMAC",
        ));
    }
    hmac_over(CLIENT_HASH_KEY, cookie, client_nonce, server_nonce)
}

fn hmac_over(
    key: &[u8],
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::protocol(format!("invalid hmac key: {e}")))?;
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);
    Ok(mac.finalize().into_bytes().to_vec())
}
