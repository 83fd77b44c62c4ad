//! Node-signed requests against the C2.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use secchiware_protocol::{digest, signing, PlatformInfo};
use serde_json::json;

use crate::config::NodeConfig;

#[derive(Debug, thiserror::Error)]
pub enum C2Error {
    #[error("Command and Control server could not be reached: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("Command and Control server rejected the request ({status}): {detail}")]
    Rejected { status: StatusCode, detail: String },
}

pub struct C2Client {
    base: String,
    host_header: String,
    key_id: String,
    secret: Vec<u8>,
    client: Client,
}

impl C2Client {
    pub fn new(config: &NodeConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            base: config.c2_base_url(),
            host_header: format!("{}:{}", config.c2_host, config.c2_port),
            key_id: config.key_id.clone(),
            secret: config.secret.as_bytes().to_vec(),
            client,
        })
    }

    /// POST /environments: registers this node with the C2.
    pub async fn register(
        &self,
        ip: &str,
        port: u16,
        platform: &PlatformInfo,
    ) -> Result<(), C2Error> {
        let body = serde_json::to_vec(&json!({
            "ip": ip,
            "port": port,
            "platform_info": platform,
        }))
        .expect("platform info always serializes");

        let digest_value = digest::header_value(&body);
        let (authorization, timestamp) =
            self.sign("POST", "/environments", Some(&digest_value));

        let response = self
            .client
            .post(format!("{}/environments", self.base))
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, "application/json")
            .header("Digest", digest_value)
            .header("Timestamp", timestamp)
            .body(body)
            .send()
            .await?;

        expect_no_content(response).await
    }

    /// DELETE /environments/{ip}/{port}: closes this node's session.
    pub async fn deregister(&self, ip: &str, port: u16) -> Result<(), C2Error> {
        let path = format!("/environments/{ip}/{port}");
        let (authorization, timestamp) = self.sign("DELETE", &path, None);

        let response = self
            .client
            .delete(format!("{}{}", self.base, path))
            .header(AUTHORIZATION, authorization)
            .header("Timestamp", timestamp)
            .send()
            .await?;

        expect_no_content(response).await
    }

    /// Signs a request and returns the `Authorization` and `Timestamp`
    /// header values. The signed set is always `host` and `timestamp`,
    /// plus `digest` when a body travels with the request.
    fn sign(&self, method: &str, path: &str, digest_value: Option<&str>) -> (String, String) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut headers = vec![
            ("host".to_string(), self.host_header.clone()),
            ("timestamp".to_string(), timestamp.clone()),
        ];
        if let Some(d) = digest_value {
            headers.push(("digest".to_string(), d.to_string()));
        }
        let signature = signing::sign(&self.secret, method, path, "", &headers);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        (
            signing::authorization_header(&self.key_id, &signature, &names),
            timestamp,
        )
    }
}

async fn expect_no_content(response: reqwest::Response) -> Result<(), C2Error> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(());
    }
    let detail = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| "no error description".to_string());
    Err(C2Error::Rejected { status, detail })
}
