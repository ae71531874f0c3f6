// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hawk Authentication
//!
//! HMAC-SHA256 Hawk request signing shared with ICMS-HMRC. Both directions
//! use the same credentials:
//!
//! - inbound CHIEF callbacks are verified with [`HawkAuthenticator`] and
//!   answered with a `Server-Authorization` header;
//! - outbound licence data is signed with [`sign_request`] and the reply is
//!   checked with [`verify_response`].
//!
//! Every request must carry a payload hash. Timestamps outside the allowed
//! skew and nonces already seen within that window are rejected.

use std::fmt::Write as _;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TIMESTAMP_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HawkError {
    #[error("Missing Hawk authorization header")]
    MissingHeader,

    #[error("Malformed Hawk header: {0}")]
    MalformedHeader(String),

    #[error("Unknown Hawk id")]
    UnknownId,

    #[error("Hawk MAC mismatch")]
    InvalidMac,

    #[error("Request payload is not hashed")]
    MissingPayloadHash,

    #[error("Payload hash mismatch")]
    PayloadHashMismatch,

    #[error("Timestamp {ts} is outside the allowed skew (server time {now})")]
    StaleTimestamp { ts: i64, now: i64 },

    #[error("Nonce has already been used")]
    ReplayedNonce,

    #[error("Invalid Hawk key: {0}")]
    InvalidKey(String),
}

impl HawkError {
    /// Short label used for the rejection counter.
    pub fn reason(&self) -> &'static str {
        match self {
            HawkError::MissingHeader => "missing_header",
            HawkError::MalformedHeader(_) => "malformed_header",
            HawkError::UnknownId => "unknown_id",
            HawkError::InvalidMac => "invalid_mac",
            HawkError::MissingPayloadHash => "missing_hash",
            HawkError::PayloadHashMismatch => "hash_mismatch",
            HawkError::StaleTimestamp { .. } => "stale_timestamp",
            HawkError::ReplayedNonce => "replayed_nonce",
            HawkError::InvalidKey(_) => "invalid_key",
        }
    }
}

#[derive(Clone)]
pub struct HawkCredentials {
    pub id: String,
    pub key: String,
}

impl std::fmt::Debug for HawkCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HawkCredentials")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The parts of an HTTP request covered by the MAC.
#[derive(Debug, Clone)]
pub struct HawkRequest<'a> {
    pub method: &'a str,
    /// Path and query string
    pub resource: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub content_type: &'a str,
    pub body: &'a [u8],
}

/// Values that went into a request MAC; the response MAC reuses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub ts: i64,
    pub nonce: String,
    pub method: String,
    pub resource: String,
    pub host: String,
    pub port: u16,
    pub hash: Option<String>,
    pub ext: Option<String>,
}

impl Artifacts {
    fn for_request(request: &HawkRequest<'_>, ts: i64, nonce: String, hash: Option<String>) -> Self {
        Self {
            ts,
            nonce,
            method: request.method.to_uppercase(),
            resource: request.resource.to_string(),
            host: request.host.to_lowercase(),
            port: request.port,
            hash,
            ext: None,
        }
    }

    fn normalized(&self, kind: &str) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "hawk.1.{kind}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            self.ts,
            self.nonce,
            self.method,
            self.resource,
            self.host,
            self.port,
            self.hash.as_deref().unwrap_or_default(),
        );
        let ext = self.ext.as_deref().unwrap_or_default().replace('\\', "\\\\").replace('\n', "\\n");
        out.push_str(&ext);
        out.push('\n');
        out
    }

    /// Base64 HMAC-SHA256 of the normalized string for `kind` (`header` or `response`).
    pub fn mac(&self, key: &str, kind: &str) -> Result<String, HawkError> {
        let mut mac =
            HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| HawkError::InvalidKey(e.to_string()))?;
        mac.update(self.normalized(kind).as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

/// Base64 SHA-256 of the `hawk.1.payload` string.
pub fn payload_hash(content_type: &str, body: &[u8]) -> String {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(b"hawk.1.payload\n");
    hasher.update(content_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hasher.update(b"\n");
    BASE64.encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ============================================================================
// Header parsing
// ============================================================================

/// Attributes of a `Hawk ...` authorization header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HawkHeader {
    pub id: Option<String>,
    pub ts: Option<String>,
    pub nonce: Option<String>,
    pub hash: Option<String>,
    pub ext: Option<String>,
    pub mac: Option<String>,
}

impl HawkHeader {
    pub fn parse(value: &str) -> Result<Self, HawkError> {
        let value = value.trim();
        let rest = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("hawk") => rest,
            _ => return Err(HawkError::MalformedHeader("expected the Hawk scheme".to_string())),
        };

        let mut header = HawkHeader::default();
        let mut chars = rest.trim_start();
        loop {
            chars = chars.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
            if chars.is_empty() {
                break;
            }

            let (key, after_key) = chars
                .split_once('=')
                .ok_or_else(|| HawkError::MalformedHeader(format!("attribute without value near '{chars}'")))?;
            let after_quote = after_key
                .strip_prefix('"')
                .ok_or_else(|| HawkError::MalformedHeader(format!("unquoted value for '{key}'")))?;
            let (attr, remainder) = after_quote
                .split_once('"')
                .ok_or_else(|| HawkError::MalformedHeader(format!("unterminated value for '{key}'")))?;

            let slot = match key.trim() {
                "id" => &mut header.id,
                "ts" => &mut header.ts,
                "nonce" => &mut header.nonce,
                "hash" => &mut header.hash,
                "ext" => &mut header.ext,
                "mac" => &mut header.mac,
                // Application and delegation ids are not used by ICMS-HMRC.
                "app" | "dlg" => {
                    chars = remainder;
                    continue;
                }
                other => return Err(HawkError::MalformedHeader(format!("unknown attribute '{other}'"))),
            };
            if slot.replace(attr.to_string()).is_some() {
                return Err(HawkError::MalformedHeader(format!("duplicate attribute '{}'", key.trim())));
            }
            chars = remainder;
        }

        Ok(header)
    }

    fn required(value: &Option<String>, name: &str) -> Result<String, HawkError> {
        value
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| HawkError::MalformedHeader(format!("missing '{name}'")))
    }
}

fn format_header(attributes: &[(&str, Option<&str>)]) -> String {
    let parts: Vec<String> = attributes
        .iter()
        .filter_map(|(name, value)| value.map(|v| format!("{name}=\"{v}\"")))
        .collect();
    format!("Hawk {}", parts.join(", "))
}

// ============================================================================
// Server side
// ============================================================================

/// Verifies inbound Hawk requests and signs the responses.
#[derive(Clone)]
pub struct HawkAuthenticator {
    credentials: HawkCredentials,
    skew_seconds: i64,
    seen_nonces: Arc<DashMap<String, i64>>,
}

impl HawkAuthenticator {
    pub fn new(credentials: HawkCredentials, skew_seconds: i64) -> Self {
        Self {
            credentials,
            skew_seconds,
            seen_nonces: Arc::new(DashMap::new()),
        }
    }

    /// Verify `authorization` against `request`, returning the artifacts
    /// needed to sign the response.
    pub fn authenticate(&self, authorization: Option<&str>, request: &HawkRequest<'_>) -> Result<Artifacts, HawkError> {
        let result = self.check(authorization, request);
        if let Err(e) = &result {
            metrics::counter!("icms_hawk_rejections_total", "reason" => e.reason()).increment(1);
            warn!(reason = e.reason(), error = %e, resource = request.resource, "Hawk authentication failed");
        }
        result
    }

    fn check(&self, authorization: Option<&str>, request: &HawkRequest<'_>) -> Result<Artifacts, HawkError> {
        let header = HawkHeader::parse(authorization.ok_or(HawkError::MissingHeader)?)?;

        let id = HawkHeader::required(&header.id, "id")?;
        if !constant_time_eq(&id, &self.credentials.id) {
            return Err(HawkError::UnknownId);
        }

        let ts: i64 = HawkHeader::required(&header.ts, "ts")?
            .parse()
            .map_err(|_| HawkError::MalformedHeader("ts is not an integer".to_string()))?;
        let nonce = HawkHeader::required(&header.nonce, "nonce")?;
        let mac = HawkHeader::required(&header.mac, "mac")?;
        let hash = header.hash.clone().ok_or(HawkError::MissingPayloadHash)?;

        let mut artifacts = Artifacts::for_request(request, ts, nonce, Some(hash.clone()));
        artifacts.ext = header.ext.clone();

        let expected = artifacts.mac(&self.credentials.key, "header")?;
        if !constant_time_eq(&expected, &mac) {
            return Err(HawkError::InvalidMac);
        }

        if !constant_time_eq(&payload_hash(request.content_type, request.body), &hash) {
            return Err(HawkError::PayloadHashMismatch);
        }

        let now = Utc::now().timestamp();
        if (now - ts).abs() > self.skew_seconds {
            return Err(HawkError::StaleTimestamp { ts, now });
        }

        self.remember_nonce(&id, &artifacts, now)?;
        debug!(resource = request.resource, "Hawk request authenticated");
        Ok(artifacts)
    }

    fn remember_nonce(&self, id: &str, artifacts: &Artifacts, now: i64) -> Result<(), HawkError> {
        let horizon = now - self.skew_seconds * 2;
        self.seen_nonces.retain(|_, ts| *ts >= horizon);

        let key = format!("{id}:{}:{}", artifacts.nonce, artifacts.ts);
        match self.seen_nonces.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HawkError::ReplayedNonce),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(artifacts.ts);
                Ok(())
            }
        }
    }

    /// `Server-Authorization` value for a response to the request behind `artifacts`.
    pub fn respond(&self, artifacts: &Artifacts, content_type: &str, body: &[u8]) -> Result<String, HawkError> {
        response_header(&self.credentials, artifacts, content_type, body)
    }
}

fn response_header(
    credentials: &HawkCredentials,
    request: &Artifacts,
    content_type: &str,
    body: &[u8],
) -> Result<String, HawkError> {
    let mut artifacts = request.clone();
    artifacts.hash = Some(payload_hash(content_type, body));
    artifacts.ext = None;
    let mac = artifacts.mac(&credentials.key, "response")?;
    let ts = artifacts.ts.to_string();

    Ok(format_header(&[
        ("mac", Some(mac.as_str())),
        ("hash", artifacts.hash.as_deref()),
        ("ts", Some(ts.as_str())),
        ("nonce", Some(artifacts.nonce.as_str())),
    ]))
}

// ============================================================================
// Client side
// ============================================================================

/// Sign an outbound request. Returns the `Authorization` value and the
/// artifacts needed to verify the reply.
pub fn sign_request(credentials: &HawkCredentials, request: &HawkRequest<'_>) -> Result<(String, Artifacts), HawkError> {
    let ts = Utc::now().timestamp();
    let nonce = Uuid::new_v4().simple().to_string();
    let hash = payload_hash(request.content_type, request.body);
    let artifacts = Artifacts::for_request(request, ts, nonce, Some(hash));
    let mac = artifacts.mac(&credentials.key, "header")?;
    let ts = ts.to_string();

    let header = format_header(&[
        ("id", Some(credentials.id.as_str())),
        ("ts", Some(ts.as_str())),
        ("nonce", Some(artifacts.nonce.as_str())),
        ("hash", artifacts.hash.as_deref()),
        ("mac", Some(mac.as_str())),
    ]);
    Ok((header, artifacts))
}

/// Check the `Server-Authorization` header of a reply to a signed request.
pub fn verify_response(
    credentials: &HawkCredentials,
    request: &Artifacts,
    server_authorization: Option<&str>,
    content_type: &str,
    body: &[u8],
) -> Result<(), HawkError> {
    let header = HawkHeader::parse(server_authorization.ok_or(HawkError::MissingHeader)?)?;
    let mac = HawkHeader::required(&header.mac, "mac")?;
    let hash = header.hash.clone().ok_or(HawkError::MissingPayloadHash)?;

    let mut artifacts = request.clone();
    if let Some(ts) = &header.ts {
        artifacts.ts = ts
            .parse()
            .map_err(|_| HawkError::MalformedHeader("ts is not an integer".to_string()))?;
    }
    if let Some(nonce) = &header.nonce {
        artifacts.nonce = nonce.clone();
    }
    artifacts.hash = Some(hash.clone());
    artifacts.ext = header.ext.clone();

    let expected = artifacts.mac(&credentials.key, "response")?;
    if !constant_time_eq(&expected, &mac) {
        return Err(HawkError::InvalidMac);
    }
    if !constant_time_eq(&payload_hash(content_type, body), &hash) {
        return Err(HawkError::PayloadHashMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> HawkCredentials {
        HawkCredentials {
            id: "icms-hmrc".to_string(),
            key: "a-long-shared-secret-for-tests".to_string(),
        }
    }

    fn request(body: &[u8]) -> HawkRequest<'_> {
        HawkRequest {
            method: "POST",
            resource: "/chief/license-data-callback",
            host: "icms.example.com",
            port: 443,
            content_type: "application/json",
            body,
        }
    }

    #[test]
    fn test_header_mac_matches_reference_vector() {
        let artifacts = Artifacts {
            ts: 1353832234,
            nonce: "j4h3g2".to_string(),
            method: "GET".to_string(),
            resource: "/resource/1?b=1&a=2".to_string(),
            host: "example.com".to_string(),
            port: 8000,
            hash: None,
            ext: Some("some-app-ext-data".to_string()),
        };
        let mac = artifacts
            .mac("werxhqb98rpaxn39848xrunpaw3489ruxnpa98w4rxn", "header")
            .unwrap();
        assert_eq!(mac, "6R4rV5iE+NPoym+WwjeHzjAGXUtLNIxmo1vpMofpLAE=");
    }

    #[test]
    fn test_payload_hash_matches_reference_vector() {
        assert_eq!(
            payload_hash("text/plain", b"Thank you for flying Hawk"),
            "Yi9LfIIFRtBEPt74PVmbTF/xVAwPn7ub15ePICfgnuY="
        );
        assert_eq!(
            payload_hash("Text/Plain; charset=utf-8", b"Thank you for flying Hawk"),
            payload_hash("text/plain", b"Thank you for flying Hawk")
        );
    }

    #[test]
    fn test_parse_header() {
        let header = HawkHeader::parse(r#"Hawk id="abc", ts="1", nonce="n", hash="h=", mac="m/+=""#).unwrap();
        assert_eq!(header.id.as_deref(), Some("abc"));
        assert_eq!(header.hash.as_deref(), Some("h="));
        assert_eq!(header.mac.as_deref(), Some("m/+="));

        assert!(HawkHeader::parse("Bearer abc").is_err());
        assert!(HawkHeader::parse(r#"Hawk id="a", id="b""#).is_err());
        assert!(HawkHeader::parse(r#"Hawk colour="red""#).is_err());
        assert!(HawkHeader::parse(r#"Hawk id=abc"#).is_err());
    }

    #[test]
    fn test_signed_request_round_trip() {
        let body = br#"{"accepted":[],"rejected":[]}"#;
        let (header, sent) = sign_request(&credentials(), &request(body)).unwrap();

        let server = HawkAuthenticator::new(credentials(), DEFAULT_TIMESTAMP_SKEW_SECONDS);
        let artifacts = server.authenticate(Some(&header), &request(body)).unwrap();
        assert_eq!(artifacts.nonce, sent.nonce);

        let reply = b"{}";
        let server_auth = server.respond(&artifacts, "application/json", reply).unwrap();
        verify_response(&credentials(), &sent, Some(&server_auth), "application/json", reply).unwrap();
        assert_eq!(
            verify_response(&credentials(), &sent, Some(&server_auth), "application/json", b"{\"x\":1}"),
            Err(HawkError::PayloadHashMismatch)
        );
    }

    #[test]
    fn test_rejects_replayed_nonce() {
        let body = b"{}";
        let (header, _) = sign_request(&credentials(), &request(body)).unwrap();
        let server = HawkAuthenticator::new(credentials(), DEFAULT_TIMESTAMP_SKEW_SECONDS);

        server.authenticate(Some(&header), &request(body)).unwrap();
        assert_eq!(
            server.authenticate(Some(&header), &request(body)),
            Err(HawkError::ReplayedNonce)
        );
    }

    #[test]
    fn test_rejects_tampered_body_and_wrong_key() {
        let (header, _) = sign_request(&credentials(), &request(b"{}")).unwrap();
        let server = HawkAuthenticator::new(credentials(), DEFAULT_TIMESTAMP_SKEW_SECONDS);
        assert_eq!(
            server.authenticate(Some(&header), &request(b"{\"a\":1}")),
            Err(HawkError::PayloadHashMismatch)
        );

        let impostor = HawkCredentials {
            id: "icms-hmrc".to_string(),
            key: "not-the-shared-secret".to_string(),
        };
        let (header, _) = sign_request(&impostor, &request(b"{}")).unwrap();
        assert_eq!(server.authenticate(Some(&header), &request(b"{}")), Err(HawkError::InvalidMac));
    }

    #[test]
    fn test_rejects_unknown_id_and_missing_header() {
        let server = HawkAuthenticator::new(credentials(), DEFAULT_TIMESTAMP_SKEW_SECONDS);
        assert_eq!(server.authenticate(None, &request(b"{}")), Err(HawkError::MissingHeader));

        let stranger = HawkCredentials {
            id: "someone-else".to_string(),
            key: credentials().key,
        };
        let (header, _) = sign_request(&stranger, &request(b"{}")).unwrap();
        assert_eq!(server.authenticate(Some(&header), &request(b"{}")), Err(HawkError::UnknownId));
    }

    #[test]
    fn test_rejects_stale_timestamp() {
        let creds = credentials();
        let body = b"{}";
        let ts = Utc::now().timestamp() - 600;
        let artifacts = Artifacts::for_request(
            &request(body),
            ts,
            "old-nonce".to_string(),
            Some(payload_hash("application/json", body)),
        );
        let mac = artifacts.mac(&creds.key, "header").unwrap();
        let header = format!(
            r#"Hawk id="{}", ts="{ts}", nonce="old-nonce", hash="{}", mac="{mac}""#,
            creds.id,
            artifacts.hash.as_deref().unwrap()
        );

        let server = HawkAuthenticator::new(creds, DEFAULT_TIMESTAMP_SKEW_SECONDS);
        assert!(matches!(
            server.authenticate(Some(&header), &request(body)),
            Err(HawkError::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn test_unhashed_request_is_rejected() {
        let creds = credentials();
        let ts = Utc::now().timestamp();
        let artifacts = Artifacts::for_request(&request(b""), ts, "n1".to_string(), None);
        let mac = artifacts.mac(&creds.key, "header").unwrap();
        let header = format!(r#"Hawk id="{}", ts="{ts}", nonce="n1", mac="{mac}""#, creds.id);

        let server = HawkAuthenticator::new(creds, DEFAULT_TIMESTAMP_SKEW_SECONDS);
        assert_eq!(
            server.authenticate(Some(&header), &request(b"")),
            Err(HawkError::MissingPayloadHash)
        );
    }
}
