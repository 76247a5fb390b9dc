//! Cloudflare v4 DNS records

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DnsChange, DnsPublisher};
use crate::error::{DnsOp, Error, Result};

pub const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare credentials
#[derive(Clone)]
pub enum CloudflareAuth {
    /// Account email plus global API key
    GlobalKey { email: String, key: String },
    /// Scoped API token
    Token(String),
}

impl std::fmt::Debug for CloudflareAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudflareAuth::GlobalKey { email, .. } => f
                .debug_struct("GlobalKey")
                .field("email", email)
                .field("key", &"<redacted>")
                .finish(),
            CloudflareAuth::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    content: &'a str,
    /// 1 means automatic
    ttl: u32,
    proxied: bool,
}

/// A-record publisher for one Cloudflare zone
#[derive(Clone)]
pub struct Cloudflare {
    agent: ureq::Agent,
    auth: CloudflareAuth,
    zone_id: String,
    base_url: String,
}

impl Cloudflare {
    pub fn new(zone_id: &str, auth: CloudflareAuth, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            auth,
            zone_id: zone_id.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, self.zone_id)
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match &self.auth {
            CloudflareAuth::GlobalKey { email, key } => request
                .header("X-Auth-Email", email.as_str())
                .header("X-Auth-Key", key.as_str()),
            CloudflareAuth::Token(token) => {
                request.header("Authorization", format!("Bearer {}", token).as_str())
            }
        }
    }

    fn find_record(&self, name: &str) -> Result<Option<DnsRecord>> {
        let op = DnsOp::Lookup;
        let url = self.records_url();
        let response = self
            .authorize(self.agent.get(url.as_str()))
            .query("type", "A")
            .query("name", name)
            .call();
        let records: Vec<DnsRecord> = decode(op, name, response)?;
        Ok(records.into_iter().find(|r| r.name.eq_ignore_ascii_case(name)))
    }

    fn upsert_blocking(&self, name: &str, address: &str) -> Result<DnsChange> {
        let body = serde_json::to_string(&RecordBody {
            kind: "A",
            name,
            content: address,
            ttl: 1,
            proxied: false,
        })?;

        match self.find_record(name)? {
            None => {
                let url = self.records_url();
                let response = self
                    .authorize(self.agent.post(url.as_str()))
                    .header("Content-Type", "application/json")
                    .send(body.as_str());
                decode::<DnsRecord>(DnsOp::Create, name, response)?;
                Ok(DnsChange::Created)
            }
            Some(record) => {
                debug!(name, record = %record.id, "updating existing record");
                let url = format!("{}/{}", self.records_url(), record.id);
                let response = self
                    .authorize(self.agent.put(url.as_str()))
                    .header("Content-Type", "application/json")
                    .send(body.as_str());
                decode::<DnsRecord>(DnsOp::Update, name, response)?;
                Ok(DnsChange::Updated)
            }
        }
    }
}

/// Unwrap a Cloudflare envelope, tagging failures with `op`
fn decode<T: DeserializeOwned>(
    op: DnsOp,
    name: &str,
    response: std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>,
) -> Result<T> {
    let fail = |message: String| Error::DnsPublish {
        op,
        name: name.to_string(),
        message,
    };

    let mut response = response.map_err(|e| fail(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|e| fail(e.to_string()))?;

    let envelope: Envelope<T> = serde_json::from_str(&text)
        .map_err(|e| fail(format!("HTTP {}: undecodable response: {}", status, e)))?;

    if !envelope.success || !(200..300).contains(&status) {
        let message = match envelope.errors.first() {
            Some(err) => format!("{} (code {})", err.message, err.code),
            None => format!("HTTP {}", status),
        };
        return Err(fail(message));
    }

    envelope
        .result
        .ok_or_else(|| fail("response carried no result".to_string()))
}

#[async_trait]
impl DnsPublisher for Cloudflare {
    async fn upsert(&self, name: &str, address: &str) -> Result<DnsChange> {
        let client = self.clone();
        let name = name.to_string();
        let address = address.to_string();
        tokio::task::spawn_blocking(move || client.upsert_blocking(&name, &address)).await?
    }
}
