//! Shared-credential authentication
//!
//! Every ingest and query request must present the configured credential in
//! the `x-api-key` header. The check runs before any body read or decode,
//! so a rejected request has zero side effects.

use crate::audit;
use hyper::header::HeaderMap;

/// Header carrying the shared credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Validate the shared credential. Returns the rejection reason on failure.
pub fn authenticate(
    headers: &HeaderMap,
    expected: &str,
    path: &str,
) -> Result<(), &'static str> {
    match headers.get(API_KEY_HEADER) {
        None => {
            audit::auth_failure(path, "missing api key");
            Err("missing api key")
        }
        Some(value) => {
            let presented = value.to_str().unwrap_or("");
            if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                audit::auth_success(path);
                Ok(())
            } else {
                audit::auth_failure(path, "invalid api key");
                Err("invalid api key")
            }
        }
    }
}

/// Compare credentials without short-circuiting on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers_with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[test]
    fn test_valid_key() {
        let headers = headers_with_key("secret123");
        assert!(authenticate(&headers, "secret123", "/v1/ingest").is_ok());
    }

    #[test]
    fn test_invalid_key() {
        let headers = headers_with_key("wrong");
        assert!(authenticate(&headers, "secret123", "/v1/ingest").is_err());
    }

    #[test]
    fn test_missing_key() {
        let headers = HeaderMap::new();
        assert_eq!(
            authenticate(&headers, "secret123", "/v1/ingest"),
            Err("missing api key")
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
