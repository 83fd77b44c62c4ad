//! The SECCHIWARE-HMAC-256 request-signing scheme.
//!
//! Header format:
//!
//! ```text
//! Authorization: SECCHIWARE-HMAC-256 keyId=<id>,[headers=<h1;h2;...>,]signature=<b64>
//! ```
//!
//! The canonical string is built from the lowercased method, the request
//! path, the query string (when present) and the listed headers, in that
//! order. Both ends must produce the exact same bytes, so the construction
//! rules here are normative for every implementation.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Scheme token carried by the `Authorization` header.
pub const SCHEME: &str = "SECCHIWARE-HMAC-256";

/// Signature verification and parsing failures.
///
/// `Malformed` maps to 400 at the HTTP layer; every other variant maps to
/// 401 with a `WWW-Authenticate` challenge.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid Authorization header: {0}")]
    Malformed(String),

    #[error("no key matches the given keyId")]
    UnknownKeyId,

    #[error("mandatory header not specified: {0}")]
    MandatoryHeaderMissing(String),

    #[error("'{0}' header specified but not present")]
    HeaderNotPresent(String),

    #[error("invalid signature")]
    Mismatch,
}

/// Builds the canonical string for a request.
///
/// 1. The method, lowercased, then `\n`.
/// 2. The path (no query string), then `\n`.
/// 3. The query string URL-encoded with space as `%20`, then `\n`: the
///    whole line is omitted when the query is empty.
/// 4. One `lowercase(name): value` line per signed header, `\n`-separated,
///    with no trailing newline after the last line.
pub fn canonical_string(
    method: &str,
    path: &str,
    query: &str,
    signed_headers: &[(String, String)],
) -> String {
    let mut out = format!("{}\n{}\n", method.to_lowercase(), path);
    if !query.is_empty() {
        out.push_str(&encode_query(query));
        out.push('\n');
    }
    for (name, value) in signed_headers {
        out.push_str(&name.to_lowercase());
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.truncate(out.trim_end_matches('\n').len());
    out
}

/// Percent-encodes a query string for canonicalization.
///
/// Bytes that are already legal in a query component (including `=`, `&`,
/// `,`, `;` and `%` from pre-encoded sequences) pass through untouched so
/// that the canonical form of an already-encoded query is the query itself;
/// spaces become `%20` and every other byte is percent-encoded.
pub fn encode_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for byte in query.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(byte as char),
            b'-' | b'.' | b'_' | b'~' | b'%' | b'=' | b'&' | b',' | b';' | b'/' | b':' | b'@'
            | b'!' | b'$' | b'\'' | b'(' | b')' | b'*' | b'+' | b'?' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Computes the base64-encoded HMAC-SHA256 signature of a request.
pub fn sign(
    key: &[u8],
    method: &str,
    path: &str,
    query: &str,
    signed_headers: &[(String, String)],
) -> String {
    let canonical = canonical_string(method, path, query, signed_headers);
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Renders the `Authorization` header value for a signed request.
pub fn authorization_header(key_id: &str, signature: &str, signed_headers: &[&str]) -> String {
    let mut out = format!("{SCHEME} keyId={key_id},");
    if !signed_headers.is_empty() {
        let names: Vec<String> = signed_headers.iter().map(|h| h.to_lowercase()).collect();
        out.push_str(&format!("headers={},", names.join(";")));
    }
    out.push_str(&format!("signature={signature}"));
    out
}

/// A parsed `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub key_id: String,
    pub signed_headers: Vec<String>,
    pub signature: String,
}

impl Authorization {
    /// Parses an `Authorization` header value.
    ///
    /// The parameter order is fixed: `keyId`, optional `headers`,
    /// `signature`. Anything else is malformed.
    pub fn parse(value: &str) -> Result<Self, SignatureError> {
        let rest = value
            .strip_prefix(SCHEME)
            .ok_or_else(|| SignatureError::Malformed("unknown signature scheme".into()))?;
        let rest = rest
            .strip_prefix(' ')
            .ok_or_else(|| SignatureError::Malformed("missing scheme parameters".into()))?;

        let mut params = rest.split(',');

        let key_id = params
            .next()
            .and_then(|p| p.strip_prefix("keyId="))
            .ok_or_else(|| SignatureError::Malformed("missing 'keyId' parameter".into()))?
            .to_string();
        if key_id.is_empty() {
            return Err(SignatureError::Malformed("empty 'keyId' parameter".into()));
        }

        let second = params
            .next()
            .ok_or_else(|| SignatureError::Malformed("missing 'signature' parameter".into()))?;

        let (signed_headers, signature_param) = match second.strip_prefix("headers=") {
            Some(list) => {
                let names: Vec<String> =
                    list.split(';').map(|h| h.to_lowercase()).collect();
                if names.iter().any(String::is_empty) {
                    return Err(SignatureError::Malformed(
                        "empty name in 'headers' parameter".into(),
                    ));
                }
                let third = params.next().ok_or_else(|| {
                    SignatureError::Malformed("missing 'signature' parameter".into())
                })?;
                (names, third)
            }
            None => (Vec::new(), second),
        };

        let signature = signature_param
            .strip_prefix("signature=")
            .ok_or_else(|| SignatureError::Malformed("missing 'signature' parameter".into()))?
            .to_string();
        if signature.is_empty() {
            return Err(SignatureError::Malformed(
                "empty 'signature' parameter".into(),
            ));
        }
        if params.next().is_some() {
            return Err(SignatureError::Malformed(
                "unexpected trailing parameters".into(),
            ));
        }

        Ok(Authorization {
            key_id,
            signed_headers,
            signature,
        })
    }
}

/// Verifies a parsed `Authorization` header against the incoming request.
///
/// `key_recoverer` resolves a keyId to its shared secret. `header_recoverer`
/// returns the value of a request header by lowercased name. Every name in
/// `mandatory_headers` must appear in the signed set. The signature compare
/// is constant-time.
pub fn verify(
    auth: &Authorization,
    key_recoverer: impl Fn(&str) -> Option<Vec<u8>>,
    header_recoverer: impl Fn(&str) -> Option<String>,
    method: &str,
    path: &str,
    query: &str,
    mandatory_headers: &[&str],
) -> Result<(), SignatureError> {
    let key = key_recoverer(&auth.key_id).ok_or(SignatureError::UnknownKeyId)?;

    for mandatory in mandatory_headers {
        let wanted = mandatory.to_lowercase();
        if !auth.signed_headers.iter().any(|h| *h == wanted) {
            return Err(SignatureError::MandatoryHeaderMissing(wanted));
        }
    }

    let mut signed_headers = Vec::with_capacity(auth.signed_headers.len());
    for name in &auth.signed_headers {
        let value = header_recoverer(name)
            .ok_or_else(|| SignatureError::HeaderNotPresent(name.clone()))?;
        signed_headers.push((name.clone(), value));
    }

    let expected = sign(&key, method, path, query, &signed_headers);
    if expected.as_bytes().ct_eq(auth.signature.as_bytes()).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"sekret";

    fn reference_headers() -> Vec<(String, String)> {
        vec![
            ("host".to_string(), "node:4900".to_string()),
            ("timestamp".to_string(), "2024-01-01T00:00:00Z".to_string()),
        ]
    }

    #[test]
    fn canonical_string_reference_vector() {
        let canonical = canonical_string(
            "GET",
            "/reports",
            "packages=pkg_a,pkg_b",
            &reference_headers(),
        );
        assert_eq!(
            canonical,
            "get\n/reports\npackages=pkg_a,pkg_b\nhost: node:4900\ntimestamp: 2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn canonical_string_skips_empty_query_line() {
        let canonical = canonical_string("DELETE", "/", "", &[]);
        assert_eq!(canonical, "delete\n/");
    }

    #[test]
    fn query_encoding_uses_percent20_for_spaces() {
        assert_eq!(encode_query("q=a b"), "q=a%20b");
        assert_eq!(encode_query("packages=pkg_a,pkg_b"), "packages=pkg_a,pkg_b");
        // Pre-encoded sequences survive untouched.
        assert_eq!(encode_query("q=a%20b&x=1"), "q=a%20b&x=1");
    }

    #[test]
    fn header_round_trip() {
        let signature = sign(
            SECRET,
            "GET",
            "/reports",
            "packages=pkg_a,pkg_b",
            &reference_headers(),
        );
        let header = authorization_header("Node", &signature, &["Host", "Timestamp"]);
        let parsed = Authorization::parse(&header).unwrap();
        assert_eq!(parsed.key_id, "Node");
        assert_eq!(parsed.signed_headers, vec!["host", "timestamp"]);
        assert_eq!(parsed.signature, signature);
    }

    #[test]
    fn header_without_signed_headers() {
        let parsed =
            Authorization::parse("SECCHIWARE-HMAC-256 keyId=C2,signature=abc123=").unwrap();
        assert_eq!(parsed.key_id, "C2");
        assert!(parsed.signed_headers.is_empty());
        assert_eq!(parsed.signature, "abc123=");
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for value in [
            "Bearer xyz",
            "SECCHIWARE-HMAC-256",
            "SECCHIWARE-HMAC-256 signature=x",
            "SECCHIWARE-HMAC-256 keyId=C2",
            "SECCHIWARE-HMAC-256 keyId=C2,headers=digest",
            "SECCHIWARE-HMAC-256 keyId=,signature=x",
            "SECCHIWARE-HMAC-256 keyId=C2,signature=x,extra=1",
        ] {
            assert!(
                matches!(
                    Authorization::parse(value),
                    Err(SignatureError::Malformed(_))
                ),
                "accepted malformed header: {value}"
            );
        }
    }

    fn verify_reference(auth: &Authorization, query: &str) -> Result<(), SignatureError> {
        verify(
            auth,
            |key_id| (key_id == "Node").then(|| SECRET.to_vec()),
            |name| match name {
                "host" => Some("node:4900".to_string()),
                "timestamp" => Some("2024-01-01T00:00:00Z".to_string()),
                _ => None,
            },
            "GET",
            "/reports",
            query,
            &["host", "timestamp"],
        )
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let signature = sign(
            SECRET,
            "GET",
            "/reports",
            "packages=pkg_a,pkg_b",
            &reference_headers(),
        );
        let header = authorization_header("Node", &signature, &["host", "timestamp"]);
        let auth = Authorization::parse(&header).unwrap();
        assert_eq!(verify_reference(&auth, "packages=pkg_a,pkg_b"), Ok(()));
    }

    #[test]
    fn any_mutation_breaks_verification() {
        let signature = sign(
            SECRET,
            "GET",
            "/reports",
            "packages=pkg_a,pkg_b",
            &reference_headers(),
        );
        let header = authorization_header("Node", &signature, &["host", "timestamp"]);
        let auth = Authorization::parse(&header).unwrap();

        // Mutated query.
        assert_eq!(
            verify_reference(&auth, "packages=pkg_a"),
            Err(SignatureError::Mismatch)
        );

        // Mutated signed header value.
        let result = verify(
            &auth,
            |_| Some(SECRET.to_vec()),
            |name| match name {
                "host" => Some("node:4901".to_string()),
                "timestamp" => Some("2024-01-01T00:00:00Z".to_string()),
                _ => None,
            },
            "GET",
            "/reports",
            "packages=pkg_a,pkg_b",
            &[],
        );
        assert_eq!(result, Err(SignatureError::Mismatch));

        // Mutated method.
        let result = verify(
            &auth,
            |_| Some(SECRET.to_vec()),
            |name| match name {
                "host" => Some("node:4900".to_string()),
                "timestamp" => Some("2024-01-01T00:00:00Z".to_string()),
                _ => None,
            },
            "POST",
            "/reports",
            "packages=pkg_a,pkg_b",
            &[],
        );
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn unknown_key_id_is_rejected() {
        let auth = Authorization::parse("SECCHIWARE-HMAC-256 keyId=Ghost,signature=x").unwrap();
        assert_eq!(
            verify(&auth, |_| None, |_| None, "GET", "/", "", &[]),
            Err(SignatureError::UnknownKeyId)
        );
    }

    #[test]
    fn mandatory_headers_are_enforced() {
        // Signed without any headers while the verifier demands a digest.
        let signature = sign(SECRET, "PATCH", "/test_sets", "", &[]);
        let header = authorization_header("C2", &signature, &[]);
        let auth = Authorization::parse(&header).unwrap();
        let result = verify(
            &auth,
            |_| Some(SECRET.to_vec()),
            |_| None,
            "PATCH",
            "/test_sets",
            "",
            &["digest"],
        );
        assert_eq!(
            result,
            Err(SignatureError::MandatoryHeaderMissing("digest".into()))
        );
    }

    #[test]
    fn signed_header_missing_from_request() {
        let signature = sign(
            SECRET,
            "GET",
            "/test_sets",
            "",
            &[("host".to_string(), "node:4900".to_string())],
        );
        let header = authorization_header("C2", &signature, &["host"]);
        let auth = Authorization::parse(&header).unwrap();
        let result = verify(
            &auth,
            |_| Some(SECRET.to_vec()),
            |_| None,
            "GET",
            "/test_sets",
            "",
            &[],
        );
        assert_eq!(result, Err(SignatureError::HeaderNotPresent("host".into())));
    }
}
