//! Verification of incoming Client- and Node-signed requests.
//!
//! Same checks as the node side: digest, header shape, mandatory signed
//! set, freshness, signature, replay: except that replay detection runs
//! through the broker so it holds across worker processes: the first
//! `incr` of a signature's nonce key returns 1, a replay returns more.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::HttpRequest;
use chrono::{DateTime, Utc};
use secchiware_protocol::digest::{self, DigestError};
use secchiware_protocol::signing::{self, Authorization, SignatureError};
use secrecy::{ExposeSecret, SecretString};

use crate::broker::Broker;
use crate::config::AuthSettings;
use crate::error::AppError;

/// Which identity class must have signed a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Principal {
    Client,
    Node,
}

pub struct Verifier {
    client_secret: SecretString,
    node_secret: SecretString,
    node_keys: HashMap<String, SecretString>,
    skew_secs: i64,
    broker: Arc<dyn Broker>,
}

impl Verifier {
    pub fn new(settings: &AuthSettings, broker: Arc<dyn Broker>) -> Self {
        Self {
            client_secret: SecretString::from(settings.client_secret.clone()),
            node_secret: SecretString::from(settings.node_secret.clone()),
            node_keys: settings
                .node_keys
                .iter()
                .map(|(id, secret)| (id.clone(), SecretString::from(secret.clone())))
                .collect(),
            skew_secs: settings.skew_secs,
            broker,
        }
    }

    /// Verifies a request that must carry a Client signature.
    pub fn verify_client(&self, req: &HttpRequest, body: Option<&[u8]>) -> Result<(), AppError> {
        self.verify(req, body, Principal::Client)
    }

    /// Verifies a request that must carry a Node signature.
    pub fn verify_node(&self, req: &HttpRequest, body: Option<&[u8]>) -> Result<(), AppError> {
        self.verify(req, body, Principal::Node)
    }

    fn recover_key(&self, principal: Principal, key_id: &str) -> Option<Vec<u8>> {
        match principal {
            Principal::Client => (key_id == "Client")
                .then(|| self.client_secret.expose_secret().as_bytes().to_vec()),
            Principal::Node => {
                if key_id == "Node" {
                    return Some(self.node_secret.expose_secret().as_bytes().to_vec());
                }
                self.node_keys
                    .get(key_id)
                    .map(|secret| secret.expose_secret().as_bytes().to_vec())
            }
        }
    }

    fn verify(
        &self,
        req: &HttpRequest,
        body: Option<&[u8]>,
        principal: Principal,
    ) -> Result<(), AppError> {
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
            |key_id| self.recover_key(principal, key_id),
            |name| header_value(req, name),
            req.method().as_str(),
            req.path(),
            req.query_string(),
            &mandatory,
        )
        .map_err(map_signature_error)?;

        // Only valid signatures reach the nonce counter; anything else
        // would let garbage requests poison the window.
        let window = Duration::from_secs(self.skew_secs.unsigned_abs());
        if self.broker.incr(&format!("nonce:{}", auth.signature), window) > 1 {
            return Err(AppError::Unauthorized("replayed request".to_string()));
        }
        Ok(())
    }

    fn check_freshness(&self, timestamp: &str) -> Result<(), AppError> {
        let parsed = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| AppError::Unauthorized("invalid 'timestamp' header".to_string()))?
            .with_timezone(&Utc);
        let age = Utc::now().signed_duration_since(parsed).num_seconds();
        if age.abs() > self.skew_secs {
            return Err(AppError::Unauthorized(
                "request timestamp outside the accepted window".to_string(),
            ));
        }
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
