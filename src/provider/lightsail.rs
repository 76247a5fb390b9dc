//! AWS Lightsail provider
//!
//! Talks to the Lightsail JSON API with SigV4-signed `ureq` calls. The
//! blocking HTTP work runs on tokio's blocking pool so instance tasks
//! never stall the scheduler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::sigv4::{self, Credentials};
use super::{CloudProvider, InstanceApi, InstanceRecord, RunState};
use crate::error::{Error, Result};

const SERVICE: &str = "lightsail";
const TARGET_PREFIX: &str = "Lightsail_20161128";

/// Lightsail account-wide provider
pub struct Lightsail {
    agent: ureq::Agent,
    credentials: Arc<Credentials>,
    /// Region used for account-wide calls such as `GetRegions`
    home_region: String,
    /// Fixed endpoint for every region (tests, local stacks)
    endpoint: Option<String>,
}

impl Lightsail {
    pub fn new(credentials: Credentials, home_region: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            credentials: Arc::new(credentials),
            home_region: home_region.to_string(),
            endpoint: None,
        }
    }

    /// Send every request to `endpoint` instead of the regional AWS host
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    fn client(&self, region: &str) -> LightsailRegion {
        let endpoint = self
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://lightsail.{}.amazonaws.com", region));
        LightsailRegion {
            agent: self.agent.clone(),
            credentials: Arc::clone(&self.credentials),
            region: region.to_string(),
            endpoint,
        }
    }
}

#[async_trait]
impl CloudProvider for Lightsail {
    async fn list_regions(&self) -> Result<Vec<String>> {
        let resp: GetRegionsResponse = self
            .client(&self.home_region)
            .call("GetRegions", json!({ "includeAvailabilityZones": false }))
            .await?;
        Ok(resp.regions.into_iter().map(|r| r.name).collect())
    }

    fn region(&self, region: &str) -> Arc<dyn InstanceApi> {
        Arc::new(self.client(region))
    }
}

/// Lightsail client bound to one region
#[derive(Clone)]
pub struct LightsailRegion {
    agent: ureq::Agent,
    credentials: Arc<Credentials>,
    region: String,
    endpoint: String,
}

impl LightsailRegion {
    async fn call<T: DeserializeOwned + Send + 'static>(&self, action: &str, body: Value) -> Result<T> {
        let client = self.clone();
        let action = action.to_string();
        tokio::task::spawn_blocking(move || client.call_blocking(&action, &body)).await?
    }

    fn call_blocking<T: DeserializeOwned>(&self, action: &str, body: &Value) -> Result<T> {
        let payload = serde_json::to_vec(body)?;
        let host = host_of(&self.endpoint);
        let target = format!("{}.{}", TARGET_PREFIX, action);
        let signed = sigv4::sign_json_request(
            &self.credentials,
            &self.region,
            SERVICE,
            host,
            &target,
            &payload,
            chrono::Utc::now(),
        )?;

        debug!(region = %self.region, action, "lightsail request");

        let url = format!("{}/", self.endpoint);
        let mut request = self.agent.post(url.as_str());
        for (name, value) in signed.headers {
            request = request.header(name, value);
        }

        let mut response = request.send(payload.as_slice()).map_err(|e| Error::Provider {
            action: action.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string().map_err(|e| Error::Provider {
            action: action.to_string(),
            message: e.to_string(),
        })?;

        if !(200..300).contains(&status) {
            return Err(Error::Provider {
                action: action.to_string(),
                message: api_error_message(status, &text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl InstanceApi for LightsailRegion {
    fn region(&self) -> &str {
        &self.region
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let body = match &page_token {
                Some(token) => json!({ "pageToken": token }),
                None => json!({}),
            };
            let resp: GetInstancesResponse = self.call("GetInstances", body).await?;
            instances.extend(resp.instances.into_iter().map(InstanceDto::into_record));

            match resp.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(instances)
    }

    async fn get_instance(&self, id: &str) -> Result<InstanceRecord> {
        let resp: GetInstanceResponse = self
            .call("GetInstance", json!({ "instanceName": id }))
            .await?;
        Ok(resp.instance.into_record())
    }

    async fn instance_state(&self, id: &str) -> Result<RunState> {
        let resp: GetInstanceStateResponse = self
            .call("GetInstanceState", json!({ "instanceName": id }))
            .await?;
        Ok(RunState::from_code(resp.state.code))
    }

    async fn stop_instance(&self, id: &str, force: bool) -> Result<()> {
        let _: Value = self
            .call("StopInstance", json!({ "instanceName": id, "force": force }))
            .await?;
        Ok(())
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        let _: Value = self
            .call("StartInstance", json!({ "instanceName": id }))
            .await?;
        Ok(())
    }
}

fn host_of(endpoint: &str) -> &str {
    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    rest.split('/').next().unwrap_or(rest)
}

/// Pull the AWS error type and message out of a failed response
fn api_error_message(status: u16, body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        #[serde(rename = "__type")]
        kind: Option<String>,
        #[serde(alias = "Message")]
        message: Option<String>,
    }

    match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError { kind, message }) => {
            let kind = kind
                .as_deref()
                .and_then(|k| k.rsplit('#').next())
                .unwrap_or("UnknownError")
                .to_string();
            format!("HTTP {} {}: {}", status, kind, message.unwrap_or_default())
        }
        Err(_) => format!("HTTP {}: {}", status, body.trim()),
    }
}

#[derive(Debug, Deserialize)]
struct GetRegionsResponse {
    #[serde(default)]
    regions: Vec<RegionDto>,
}

#[derive(Debug, Deserialize)]
struct RegionDto {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetInstancesResponse {
    #[serde(default)]
    instances: Vec<InstanceDto>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetInstanceResponse {
    instance: InstanceDto,
}

#[derive(Debug, Deserialize)]
struct GetInstanceStateResponse {
    state: StateDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceDto {
    name: String,
    public_ip_address: Option<String>,
    state: Option<StateDto>,
    #[serde(default)]
    tags: Vec<TagDto>,
}

#[derive(Debug, Deserialize)]
struct StateDto {
    code: u16,
}

#[derive(Debug, Deserialize)]
struct TagDto {
    key: String,
    value: Option<String>,
}

impl InstanceDto {
    fn into_record(self) -> InstanceRecord {
        InstanceRecord {
            id: self.name,
            public_address: self.public_ip_address.filter(|a| !a.is_empty()),
            state: self
                .state
                .map(|s| RunState::from_code(s.code))
                .unwrap_or(RunState::Unknown(u16::MAX)),
            tags: self
                .tags
                .into_iter()
                .map(|t| (t.key, t.value.unwrap_or_default()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> Lightsail {
        Lightsail::new(
            Credentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
            "us-west-2",
            Duration::from_secs(5),
        )
        .with_endpoint(&server.uri())
    }

    #[test]
    fn test_instance_dto_into_record() {
        let dto: InstanceDto = serde_json::from_value(json!({
            "name": "web1",
            "arn": "arn:aws:lightsail:us-east-1:123:Instance/abc",
            "publicIpAddress": "1.2.3.4",
            "state": { "code": 16, "name": "running" },
            "tags": [
                { "key": "cf_domain", "value": "web1.example.com" },
                { "key": "server_port", "value": "443" },
                { "key": "flag" }
            ]
        }))
        .unwrap();

        let record = dto.into_record();
        assert_eq!(record.id, "web1");
        assert_eq!(record.public_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(record.state, RunState::Running);
        assert_eq!(record.tags.get("server_port").map(String::as_str), Some("443"));
        assert_eq!(record.tags.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_stopped_instance_has_no_address() {
        let dto: InstanceDto = serde_json::from_value(json!({
            "name": "web1",
            "publicIpAddress": "",
            "state": { "code": 80, "name": "stopped" }
        }))
        .unwrap();
        let record = dto.into_record();
        assert_eq!(record.public_address, None);
        assert_eq!(record.state, RunState::Stopped);
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"__type":"com.amazonaws#NotFoundException","message":"no such instance"}"#;
        assert_eq!(
            api_error_message(400, body),
            "HTTP 400 NotFoundException: no such instance"
        );
        assert_eq!(api_error_message(502, "bad gateway"), "HTTP 502: bad gateway");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://lightsail.us-east-1.amazonaws.com"), "lightsail.us-east-1.amazonaws.com");
        assert_eq!(host_of("http://127.0.0.1:4566/"), "127.0.0.1:4566");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_regions_signs_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "Lightsail_20161128.GetRegions"))
            .and(header_exists("Authorization"))
            .and(header_exists("X-Amz-Date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "regions": [{ "name": "us-east-1" }, { "name": "eu-west-1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let regions = provider(&server).list_regions().await.unwrap();
        assert_eq!(regions, vec!["us-east-1".to_string(), "eu-west-1".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_instances_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "Lightsail_20161128.GetInstances"))
            .and(body_partial_json(json!({ "pageToken": "p2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [{ "name": "b", "state": { "code": 80 } }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "Lightsail_20161128.GetInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [{ "name": "a", "state": { "code": 16 } }],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let api = provider(&server).region("us-east-1");
        let instances = api.list_instances().await.unwrap();
        let names: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_instance_is_forced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "Lightsail_20161128.StopInstance"))
            .and(body_partial_json(json!({ "instanceName": "web1", "force": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "operations": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let api = provider(&server).region("us-east-1");
        api.stop_instance("web1", true).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "AccessDeniedException",
                "message": "not allowed"
            })))
            .mount(&server)
            .await;

        let api = provider(&server).region("us-east-1");
        let err = api.instance_state("web1").await.unwrap_err();
        match err {
            Error::Provider { action, message } => {
                assert_eq!(action, "GetInstanceState");
                assert!(message.contains("AccessDeniedException"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
