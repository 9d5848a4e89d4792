//! Stateless, expiring, tamper-evident tokens.
//!
//! A token is three URL-safe base64 fields joined by dots:
//!
//! ```text
//! b64(json payload) . b64(unix timestamp, big-endian) . b64(HMAC-SHA256 tag)
//! ```
//!
//! The tag covers the first two fields exactly as they appear in the token, so
//! changing any byte of the payload or the timestamp invalidates it. Nothing
//! is stored on the server; the client holds the token and hands it back.
//!
//! # Key rotation
//!
//! The HMAC key is derived from the configured secret. Changing the secret
//! invalidates **every** token issued before the change: clients lose the
//! ability to edit or delete their earlier comments until they post again.

use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::digest::generic_array::GenericArray;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Why a token was refused.
///
/// Callers must not reveal which variant occurred to the client.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SignError {
    /// Malformed, tampered with, signed with another key, or carrying a
    /// payload of the wrong shape.
    #[error("invalid signature")]
    InvalidSignature,
    /// Authentic, but older than the allowed maximum age.
    #[error("signature expired")]
    Expired,
}

/// Issues and verifies tokens with one process-wide secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    const CONTEXT: &'static [u8] = b"glosa.signer.v1";

    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::new()
            .chain_update(Self::CONTEXT)
            .chain_update(secret.as_ref())
            .finalize();

        // HMAC zero-pads keys to the block size; do it up front so the
        // fixed-size constructor applies.
        let mut key = [0u8; 64];
        key[..digest.len()].copy_from_slice(&digest);
        Self { mac: <HmacSha256 as Mac>::new(GenericArray::from_slice(&key)) }
    }

    /// Signs `payload` with the current time.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String, serde_json::Error> {
        self.sign_at(payload, unix_now())
    }

    /// Signs `payload` as if issued at `timestamp` (Unix seconds).
    pub fn sign_at<T: Serialize>(
        &self,
        payload: &T,
        timestamp: u64,
    ) -> Result<String, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        let bytes = timestamp.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);

        let mut signed = URL_SAFE_NO_PAD.encode(body);
        signed.push('.');
        signed.push_str(&URL_SAFE_NO_PAD.encode(&bytes[first..]));

        let tag = self.tag(signed.as_bytes());
        signed.push('.');
        signed.push_str(&URL_SAFE_NO_PAD.encode(tag));
        Ok(signed)
    }

    /// Verifies `token` against the current time.
    pub fn unsign<T: DeserializeOwned>(&self, token: &str, max_age: Duration) -> Result<T, SignError> {
        self.unsign_at(token, max_age, unix_now())
    }

    /// Verifies `token` as if the current time were `now` (Unix seconds).
    ///
    /// The tag is checked first, in constant time; the age only after the
    /// token is known to be authentic.
    pub fn unsign_at<T: DeserializeOwned>(
        &self,
        token: &str,
        max_age: Duration,
        now: u64,
    ) -> Result<T, SignError> {
        let (signed, tag) = token.rsplit_once('.').ok_or(SignError::InvalidSignature)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| SignError::InvalidSignature)?;

        let mut mac = self.mac.clone();
        mac.update(signed.as_bytes());
        mac.verify_slice(&tag).map_err(|_| SignError::InvalidSignature)?;

        let (body, timestamp) = signed.split_once('.').ok_or(SignError::InvalidSignature)?;
        let timestamp = decode_timestamp(timestamp).ok_or(SignError::InvalidSignature)?;
        if now.saturating_sub(timestamp) > max_age.as_secs() {
            return Err(SignError::Expired);
        }

        let body = URL_SAFE_NO_PAD.decode(body).map_err(|_| SignError::InvalidSignature)?;
        serde_json::from_slice(&body).map_err(|_| SignError::InvalidSignature)
    }

    /// Constant-time equality of two secrets (e.g. an admin password).
    ///
    /// Both sides are run through the keyed MAC first, so the comparison time
    /// depends on neither their contents nor their lengths.
    pub fn secret_matches(&self, given: &str, expected: &str) -> bool {
        let expected = self.tag(expected.as_bytes());
        let mut mac = self.mac.clone();
        mac.update(given.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn tag(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Signer { .. }")
    }
}

fn decode_timestamp(field: &str) -> Option<u64> {
    let bytes = URL_SAFE_NO_PAD.decode(field).ok()?;
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(&bytes);
    Some(u64::from_be_bytes(buf))
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}
