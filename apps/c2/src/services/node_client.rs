//! C2-signed requests against nodes.
//!
//! Forwarded requests are never retried; a connect failure or timeout maps
//! to 504 at the API layer and an unexpected node status to 502. The
//! multipart body of a bundle replication is assembled by hand so the
//! `Digest` header covers the exact bytes that leave the wire.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use secchiware_protocol::{digest, signing};

use crate::error::AppError;

pub struct NodeClient {
    client: Client,
    key_id: String,
    node_secret: Vec<u8>,
}

impl NodeClient {
    pub fn new(node_secret: &str, timeout_ms: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            key_id: "C2".to_string(),
            node_secret: node_secret.as_bytes().to_vec(),
        })
    }

    /// GET /test_sets: the node's installed tree. Unsigned.
    pub async fn list_installed(&self, ip: &str, port: u16) -> Result<Response, AppError> {
        self.client
            .get(format!("http://{ip}:{port}/test_sets"))
            .send()
            .await
            .map_err(unreachable_error)
    }

    /// GET /reports: trigger execution, forwarding the raw selector query
    /// string. Unsigned; executions can take as long as the tests do, so
    /// the timeout is not applied here.
    pub async fn run_tests(
        &self,
        ip: &str,
        port: u16,
        query: &str,
    ) -> Result<Response, AppError> {
        let mut url = format!("http://{ip}:{port}/reports");
        if !query.is_empty() {
            url = format!("{url}?{query}");
        }
        self.client
            .get(url)
            .timeout(Duration::from_secs(24 * 3600))
            .send()
            .await
            .map_err(unreachable_error)
    }

    /// PATCH /test_sets: replicate a bundle onto the node.
    pub async fn install(
        &self,
        ip: &str,
        port: u16,
        bundle_bytes: Vec<u8>,
    ) -> Result<Response, AppError> {
        let (content_type, body) = multipart_body(&bundle_bytes);
        let digest_value = digest::header_value(&body);
        let (authorization, timestamp) =
            self.sign(ip, port, "PATCH", "/test_sets", Some(&digest_value));

        self.client
            .patch(format!("http://{ip}:{port}/test_sets"))
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, content_type)
            .header("Digest", digest_value)
            .header("Timestamp", timestamp)
            .body(body)
            .send()
            .await
            .map_err(unreachable_error)
    }

    /// DELETE /test_sets/{package}.
    pub async fn remove_package(
        &self,
        ip: &str,
        port: u16,
        package: &str,
    ) -> Result<Response, AppError> {
        let path = format!("/test_sets/{package}");
        let (authorization, timestamp) = self.sign(ip, port, "DELETE", &path, None);
        self.client
            .delete(format!("http://{ip}:{port}{path}"))
            .header(AUTHORIZATION, authorization)
            .header("Timestamp", timestamp)
            .send()
            .await
            .map_err(unreachable_error)
    }

    /// DELETE /: order the node to shut down.
    pub async fn shutdown(&self, ip: &str, port: u16) -> Result<Response, AppError> {
        let (authorization, timestamp) = self.sign(ip, port, "DELETE", "/", None);
        self.client
            .delete(format!("http://{ip}:{port}/"))
            .header(AUTHORIZATION, authorization)
            .header("Timestamp", timestamp)
            .send()
            .await
            .map_err(unreachable_error)
    }

    /// A cheap reachability probe used by the liveness sweeper.
    pub async fn probe(&self, ip: &str, port: u16) -> bool {
        match self.list_installed(ip, port).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn sign(
        &self,
        ip: &str,
        port: u16,
        method: &str,
        path: &str,
        digest_value: Option<&str>,
    ) -> (String, String) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut headers = vec![
            ("host".to_string(), format!("{ip}:{port}")),
            ("timestamp".to_string(), timestamp.clone()),
        ];
        if let Some(d) = digest_value {
            headers.push(("digest".to_string(), d.to_string()));
        }
        let signature = signing::sign(&self.node_secret, method, path, "", &headers);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        (
            signing::authorization_header(&self.key_id, &signature, &names),
            timestamp,
        )
    }
}

fn unreachable_error(e: reqwest::Error) -> AppError {
    tracing::warn!("node request failed: {e}");
    AppError::NodeUnreachable
}

/// Builds a `multipart/form-data` body with a single part named
/// `packages`. Returns the content type (with boundary) and the bytes.
fn multipart_body(bundle_bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    let boundary = format!("SecchiwareBoundary{boundary}");

    let mut body = Vec::with_capacity(bundle_bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"packages\"; filename=\"packages.tar.gz\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/gzip\r\n\r\n");
    body.extend_from_slice(bundle_bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (
        format!("multipart/form-data; boundary={boundary}"),
        body,
    )
}
