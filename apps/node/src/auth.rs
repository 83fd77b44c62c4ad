//! Verification of incoming C2-signed requests.
//!
//! Checks, in order: the `Digest` header (when the request carries a body),
//! the `Authorization` header shape, the mandatory signed-header set, the
//! freshness of the signed `timestamp`, the signature itself and finally
//! replay of a previously accepted signature inside the freshness window.
//! The node is a single process, so the replay cache is in-memory.

use std::collections::HashMap;

use actix_web::HttpRequest;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use secchiware_protocol::digest::{self, DigestError};
use secchiware_protocol::signing::{self, Authorization, SignatureError};

use crate::error::AppError;

pub struct RequestAuthenticator {
    c2_key_id: String,
    c2_secret: Vec<u8>,
    skew: Duration,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RequestAuthenticator {
    pub fn new(c2_key_id: String, c2_secret: &str, skew_secs: i64) -> Self {
        Self {
            c2_key_id,
            c2_secret: c2_secret.as_bytes().to_vec(),
            skew: Duration::seconds(skew_secs),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Verifies a request allegedly signed by the C2. `body` must be the
    /// raw request body bytes when the request has one.
    pub fn verify(&self, req: &HttpRequest, body: Option<&[u8]>) -> Result<(), AppError> {
        let mut mandatory = vec!["host", "timestamp"];
        if let Some(body) = body {
            let header = header_value(req, "digest");
            match digest::verify(header.as_deref(), body) {
                Ok(()) => {}
                Err(e @ (DigestError::Missing | DigestError::UnsupportedAlgorithm)) => {
                    return Err(AppError::Validation(e.to_string()));
                }
                Err(e @ DigestError::Mismatch) => {
                    return Err(AppError::Unauthorized(e.to_string()));
                }
            }
            mandatory.push("digest");
        }

        let raw = header_value(req, "authorization").ok_or_else(|| {
            AppError::Unauthorized("No 'Authorization' header found in request.".to_string())
        })?;
        let auth = Authorization::parse(&raw).map_err(map_signature_error)?;

        let timestamp = header_value(req, "timestamp")
            .ok_or_else(|| AppError::Unauthorized("'timestamp' header missing".to_string()))?;
        self.check_freshness(&timestamp)?;

        signing::verify(
            &auth,
            |key_id| (key_id == self.c2_key_id).then(|| self.c2_secret.clone()),
            |name| header_value(req, name),
            req.method().as_str(),
            req.path(),
            req.query_string(),
            &mandatory,
        )
        .map_err(map_signature_error)?;

        self.check_replay(&auth.signature)?;
        Ok(())
    }

    fn check_freshness(&self, timestamp: &str) -> Result<(), AppError> {
        let parsed = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| AppError::Unauthorized("invalid 'timestamp' header".to_string()))?
            .with_timezone(&Utc);
        let age = Utc::now().signed_duration_since(parsed);
        if age > self.skew || age < -self.skew {
            return Err(AppError::Unauthorized(
                "request timestamp outside the accepted window".to_string(),
            ));
        }
        Ok(())
    }

    /// A signature may only be accepted once per freshness window.
    fn check_replay(&self, signature: &str) -> Result<(), AppError> {
        let now = Utc::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, expires| *expires > now);
        if seen.contains_key(signature) {
            return Err(AppError::Unauthorized("replayed request".to_string()));
        }
        seen.insert(signature.to_string(), now + self.skew);
        Ok(())
    }
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn map_signature_error(e: SignatureError) -> AppError {
    match e {
        SignatureError::Malformed(_) => AppError::Validation(e.to_string()),
        _ => AppError::Unauthorized(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use secchiware_protocol::report::timestamp_now;

    const SECRET: &str = "shared-c2-secret";

    fn authenticator() -> RequestAuthenticator {
        RequestAuthenticator::new("C2".to_string(), SECRET, 300)
    }

    fn signed_request(
        method: &str,
        path: &str,
        timestamp: &str,
    ) -> actix_web::HttpRequest {
        let headers = vec![
            ("host".to_string(), "node:4900".to_string()),
            ("timestamp".to_string(), timestamp.to_string()),
        ];
        let signature = signing::sign(SECRET.as_bytes(), method, path, "", &headers);
        let authorization =
            signing::authorization_header("C2", &signature, &["host", "timestamp"]);
        TestRequest::with_uri(path)
            .method(method.parse().unwrap())
            .insert_header(("Host", "node:4900"))
            .insert_header(("Timestamp", timestamp))
            .insert_header(("Authorization", authorization))
            .to_http_request()
    }

    #[test]
    fn accepts_a_valid_signature() {
        let auth = authenticator();
        let req = signed_request("DELETE", "/test_sets/p1", &timestamp_now());
        assert!(auth.verify(&req, None).is_ok());
    }

    #[test]
    fn rejects_a_replay_of_the_same_signature() {
        let auth = authenticator();
        let ts = timestamp_now();
        let req = signed_request("DELETE", "/test_sets/p1", &ts);
        assert!(auth.verify(&req, None).is_ok());
        let replayed = signed_request("DELETE", "/test_sets/p1", &ts);
        assert!(matches!(
            auth.verify(&replayed, None),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let auth = authenticator();
        let req = signed_request("DELETE", "/test_sets/p1", "2024-01-01T00:00:00Z");
        assert!(matches!(
            auth.verify(&req, None),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_authorization_header_is_401() {
        let auth = authenticator();
        let req = TestRequest::with_uri("/").to_http_request();
        assert!(matches!(
            auth.verify(&req, None),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn malformed_authorization_header_is_400() {
        let auth = authenticator();
        let req = TestRequest::with_uri("/")
            .insert_header(("Timestamp", timestamp_now()))
            .insert_header(("Authorization", "Bearer nope"))
            .to_http_request();
        assert!(matches!(
            auth.verify(&req, None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn body_requests_need_a_matching_digest() {
        let auth = authenticator();
        let body = b"bundle-bytes";
        let ts = timestamp_now();
        let digest_value = digest::header_value(body);
        let headers = vec![
            ("host".to_string(), "node:4900".to_string()),
            ("timestamp".to_string(), ts.clone()),
            ("digest".to_string(), digest_value.clone()),
        ];
        let signature = signing::sign(SECRET.as_bytes(), "PATCH", "/test_sets", "", &headers);
        let authorization = signing::authorization_header(
            "C2",
            &signature,
            &["host", "timestamp", "digest"],
        );
        let req = TestRequest::with_uri("/test_sets")
            .method("PATCH".parse().unwrap())
            .insert_header(("Host", "node:4900"))
            .insert_header(("Timestamp", ts))
            .insert_header(("Digest", digest_value))
            .insert_header(("Authorization", authorization))
            .to_http_request();

        assert!(auth.verify(&req, Some(body)).is_ok());
        assert!(matches!(
            auth.verify(&req, Some(b"tampered".as_slice())),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_digest_header_on_body_request_is_400() {
        let auth = authenticator();
        let req = TestRequest::with_uri("/test_sets").to_http_request();
        assert!(matches!(
            auth.verify(&req, Some(b"body".as_slice())),
            Err(AppError::Validation(_))
        ));
    }
}
