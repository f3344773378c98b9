//! HMAC-SHA256 signing and the ordered inbound-request verification pipeline.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{DispatchError, DispatchErrorKind};
use crate::nonce::NonceCache;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew for inbound signatures, in either direction.
pub const VALIDITY_WINDOW_SECS: u64 = 5 * 60;

/// Compute the lowercase-hex HMAC-SHA256 of `message` under `secret`.
pub fn sign(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two lowercase-hex signature strings.
///
/// A length mismatch is itself compared in non-constant time (string length
/// is not secret) but the byte comparison that follows a length match is
/// constant-time, matching this codebase's own `constant_time_compare` used
/// in its request-authentication middleware.
pub fn constant_time_eq(a: &str, b: &str) -> VerifyOutcome {
    if a.len() != b.len() {
        return VerifyOutcome::LengthMismatch;
    }
    if a.as_bytes().ct_eq(b.as_bytes()).into() {
        VerifyOutcome::Match
    } else {
        VerifyOutcome::Mismatch
    }
}

/// The internal-only outcome of a signature comparison. Every variant other
/// than [`Self::Match`] is reported to the caller as the single external
/// reason `invalid_signature` — the distinction exists purely for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signatures matched.
    Match,
    /// Signatures differed in length; compared in non-constant time.
    LengthMismatch,
    /// Signatures were equal length but differed in content.
    Mismatch,
}

/// The three required authentication headers on an admission or admin
/// request, already extracted from transport by the caller. Absent headers
/// are `None`, not empty strings, so "missing" and "empty" are distinguishable.
pub struct SignedRequest<'a> {
    /// `x-dispatch-timestamp` (or `x-callback-timestamp` on the outbound side).
    pub timestamp: Option<&'a str>,
    /// `x-dispatch-nonce`. `None` on callback verification, which has no nonce.
    pub nonce: Option<&'a str>,
    /// `x-dispatch-signature` (or `x-callback-signature`).
    pub signature: Option<&'a str>,
    /// The exact bytes the caller signed, unmodified by any re-serialisation.
    pub raw_body: &'a [u8],
}

/// Verify an inbound signed request per the strictly ordered pipeline:
/// headers present, timestamp parses, timestamp within the validity window,
/// nonce not replayed, signature matches. Each step short-circuits the rest.
///
/// `nonce_cache` is `None` for contexts with no replay protection (outbound
/// callback verification has no nonce at all); passing `None` skips step 4.
pub fn verify_signed_request(
    req: &SignedRequest<'_>,
    shared_secret: &[u8],
    now: u64,
    nonce_cache: Option<&NonceCache>,
) -> Result<(), DispatchError> {
    let timestamp_str = req
        .timestamp
        .ok_or_else(|| DispatchError::bare(DispatchErrorKind::MissingAuth))?;
    let signature = req
        .signature
        .ok_or_else(|| DispatchError::bare(DispatchErrorKind::MissingAuth))?;
    if nonce_cache.is_some() && req.nonce.is_none() {
        return Err(DispatchError::bare(DispatchErrorKind::MissingAuth));
    }

    let timestamp: i64 = timestamp_str.parse().map_err(|_| {
        DispatchError::new(
            DispatchErrorKind::InvalidTimestampFormat,
            format!("timestamp header {timestamp_str:?} is not an integer"),
        )
    })?;

    let skew = (now as i64 - timestamp).abs();
    if skew > VALIDITY_WINDOW_SECS as i64 {
        return Err(DispatchError::new(
            DispatchErrorKind::StaleOrFutureTimestamp,
            format!("timestamp skew of {skew}s exceeds the validity window"),
        ));
    }

    if let (Some(cache), Some(nonce)) = (nonce_cache, req.nonce) {
        cache.check_and_insert(nonce, now)?;
    }

    let message = match req.nonce {
        Some(nonce) => format!(
            "{timestamp_str}.{nonce}.{}",
            String::from_utf8_lossy(req.raw_body)
        ),
        None => format!("{timestamp_str}.{}", String::from_utf8_lossy(req.raw_body)),
    };
    let expected = sign(shared_secret, message.as_bytes());

    match constant_time_eq(&expected, signature) {
        VerifyOutcome::Match => Ok(()),
        VerifyOutcome::LengthMismatch => Err(DispatchError::new(
            DispatchErrorKind::InvalidSignature,
            "signature length mismatch",
        )),
        VerifyOutcome::Mismatch => Err(DispatchError::bare(DispatchErrorKind::InvalidSignature)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn signed(now: u64, nonce: &str, body: &[u8]) -> (String, String) {
        let timestamp = now.to_string();
        let message = format!("{timestamp}.{nonce}.{}", String::from_utf8_lossy(body));
        let signature = sign(SECRET, message.as_bytes());
        (timestamp, signature)
    }

    #[test]
    fn missing_any_header_is_rejected() {
        let cache = NonceCache::new(VALIDITY_WINDOW_SECS);
        let req = SignedRequest {
            timestamp: None,
            nonce: Some("n"),
            signature: Some("s"),
            raw_body: b"{}",
        };
        let err = verify_signed_request(&req, SECRET, 1_000, Some(&cache)).unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::MissingAuth);
    }

    #[test]
    fn non_integer_timestamp_is_rejected() {
        let cache = NonceCache::new(VALIDITY_WINDOW_SECS);
        let req = SignedRequest {
            timestamp: Some("not-a-number"),
            nonce: Some("n"),
            signature: Some("s"),
            raw_body: b"{}",
        };
        let err = verify_signed_request(&req, SECRET, 1_000, Some(&cache)).unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::InvalidTimestampFormat);
    }

    #[test]
    fn timestamp_at_the_edge_of_the_window_is_accepted() {
        let cache = NonceCache::new(VALIDITY_WINDOW_SECS);
        let now = 1_000_000u64;
        let ts = now - VALIDITY_WINDOW_SECS;
        let (timestamp, signature) = signed(ts, "n1", b"{}");
        let req = SignedRequest {
            timestamp: Some(&timestamp),
            nonce: Some("n1"),
            signature: Some(&signature),
            raw_body: b"{}",
        };
        assert!(verify_signed_request(&req, SECRET, now, Some(&cache)).is_ok());
    }

    #[test]
    fn timestamp_one_second_beyond_the_window_is_rejected() {
        let cache = NonceCache::new(VALIDITY_WINDOW_SECS);
        let now = 1_000_000u64;
        let ts = now - VALIDITY_WINDOW_SECS - 1;
        let (timestamp, signature) = signed(ts, "n1", b"{}");
        let req = SignedRequest {
            timestamp: Some(&timestamp),
            nonce: Some("n1"),
            signature: Some(&signature),
            raw_body: b"{}",
        };
        let err = verify_signed_request(&req, SECRET, now, Some(&cache)).unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::StaleOrFutureTimestamp);
    }

    #[test]
    fn replayed_nonce_is_rejected_on_the_second_attempt() {
        let cache = NonceCache::new(VALIDITY_WINDOW_SECS);
        let now = 1_000_000u64;
        let (timestamp, signature) = signed(now, "dup", b"{}");
        let req = SignedRequest {
            timestamp: Some(&timestamp),
            nonce: Some("dup"),
            signature: Some(&signature),
            raw_body: b"{}",
        };
        assert!(verify_signed_request(&req, SECRET, now, Some(&cache)).is_ok());
        let err = verify_signed_request(&req, SECRET, now, Some(&cache)).unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::ReplayedNonce);
    }

    #[test]
    fn tampered_body_fails_signature_check() {
        let cache = NonceCache::new(VALIDITY_WINDOW_SECS);
        let now = 1_000_000u64;
        let (timestamp, signature) = signed(now, "n2", b"{\"a\":1}");
        let req = SignedRequest {
            timestamp: Some(&timestamp),
            nonce: Some("n2"),
            signature: Some(&signature),
            raw_body: b"{\"a\":2}",
        };
        let err = verify_signed_request(&req, SECRET, now, Some(&cache)).unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::InvalidSignature);
    }

    #[test]
    fn callback_verification_has_no_nonce_requirement() {
        let now = 1_000_000u64;
        let timestamp = now.to_string();
        let message = format!("{timestamp}.{{}}");
        let signature = sign(SECRET, message.as_bytes());
        let req = SignedRequest {
            timestamp: Some(&timestamp),
            nonce: None,
            signature: Some(&signature),
            raw_body: b"{}",
        };
        assert!(verify_signed_request(&req, SECRET, now, None).is_ok());
    }

    #[test]
    fn constant_time_eq_detects_length_mismatch_distinctly() {
        assert_eq!(constant_time_eq("abcd", "abcde"), VerifyOutcome::LengthMismatch);
        assert_eq!(constant_time_eq("abcd", "abce"), VerifyOutcome::Mismatch);
        assert_eq!(constant_time_eq("abcd", "abcd"), VerifyOutcome::Match);
    }
}
