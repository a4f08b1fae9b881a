//! Signed session cookies.
//!
//! The cookie value is `<token>.<hex hmac-sha256(token)>` keyed by
//! `SECRET_KEY`, so a forged or truncated cookie is rejected before any
//! database lookup.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "sessionid";

#[derive(Clone)]
pub struct SessionSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner").finish_non_exhaustive()
    }
}

impl SessionSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        SessionSigner {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.key).unwrap_or_else(|_| unreachable!())
    }

    pub fn sign(&self, token: &str) -> String {
        let mut mac = self.mac();
        mac.update(token.as_bytes());
        format!("{}.{}", token, hex::encode(mac.finalize().into_bytes()))
    }

    /// Return the bare token when the signature matches.
    pub fn verify<'a>(&self, value: &'a str) -> Option<&'a str> {
        let (token, signature) = value.rsplit_once('.')?;
        if token.is_empty() {
            return None;
        }
        let signature = hex::decode(signature).ok()?;

        let mut mac = self.mac();
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(token)
    }
}

/// Fresh random session token.
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Signed session value from the `sessionid` cookie or a bearer header.
pub fn extract_session_value(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some((name, value)) = cookie.trim().split_once('=') {
                    if name == SESSION_COOKIE && !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

pub fn login_cookie(signed: &str, ttl: Duration, secure: bool) -> HeaderValue {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        signed,
        ttl.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    // Signed values are ASCII: token, dot, hex
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| logout_cookie())
}

pub fn logout_cookie() -> HeaderValue {
    HeaderValue::from_static("sessionid=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// The visitor's address: first `X-Forwarded-For` entry, else the peer.
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = SessionSigner::new("secret");
        let token = new_token();
        let signed = signer.sign(&token);

        assert_eq!(signer.verify(&signed), Some(token.as_str()));
    }

    #[test]
    fn test_tampered_values_are_rejected() {
        let signer = SessionSigner::new("secret");
        let signed = signer.sign("abc123");

        assert_eq!(signer.verify("abc124.deadbeef"), None);
        assert_eq!(signer.verify(&signed.replacen("abc123", "abc124", 1)), None);
        assert_eq!(signer.verify("abc123"), None);
        assert_eq!(signer.verify(".00"), None);
        assert_eq!(signer.verify("abc123.zz"), None);

        let other = SessionSigner::new("another secret");
        assert_eq!(other.verify(&signed), None);
    }

    #[test]
    fn test_new_token_shape() {
        let token = new_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, new_token());
    }

    #[test]
    fn test_extract_session_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("csrftoken=x; sessionid=tok.sig"));
        assert_eq!(extract_session_value(&headers).as_deref(), Some("tok.sig"));

        let mut bearer = HeaderMap::new();
        bearer.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok.sig"));
        assert_eq!(extract_session_value(&bearer).as_deref(), Some("tok.sig"));

        let mut empty = HeaderMap::new();
        empty.insert(header::COOKIE, HeaderValue::from_static("sessionid="));
        assert_eq!(extract_session_value(&empty), None);
    }

    #[test]
    fn test_cookies() {
        let cookie = login_cookie("tok.sig", Duration::from_secs(60), false);
        assert_eq!(
            cookie.to_str().unwrap(),
            "sessionid=tok.sig; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );
        assert!(login_cookie("t.s", Duration::from_secs(1), true).to_str().unwrap().ends_with("; Secure"));
        assert!(logout_cookie().to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn test_client_ip() {
        let remote: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(remote)), "10.0.0.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(remote)), "203.0.113.7");
    }
}
