//! Operator notifications
//!
//! Delivery is best-effort: a failed push is logged and dropped, it never
//! turns into an error for the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info};

/// Message priority as understood by Gotify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Alert,
}

impl Priority {
    pub fn level(self) -> u8 {
        match self {
            Priority::Normal => 5,
            Priority::Alert => 10,
        }
    }
}

/// Sink for operator messages
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`. With `log` set, normal-priority messages are
    /// echoed to the local log as well.
    async fn send(&self, message: &str, title: &str, priority: Priority, log: bool);
}

fn echo(message: &str, title: &str, priority: Priority, log: bool) {
    if log && priority == Priority::Normal {
        info!(title, "{}", message);
    }
}

/// Notifier used when no sink is configured
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, message: &str, title: &str, priority: Priority, log: bool) {
        echo(message, title, priority, log);
    }
}

#[derive(Serialize)]
struct GotifyMessage<'a> {
    message: &'a str,
    title: &'a str,
    priority: u8,
}

/// Gotify push notifications
#[derive(Clone)]
pub struct Gotify {
    agent: ureq::Agent,
    url: String,
}

impl Gotify {
    pub fn new(server_url: &str, token: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            url: format!("{}/message?token={}", server_url.trim_end_matches('/'), token),
        }
    }

    fn post(&self, payload: String) -> Result<u16, String> {
        let response = self
            .agent
            .post(self.url.as_str())
            .header("Content-Type", "application/json")
            .send(payload.as_str())
            .map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

impl std::fmt::Debug for Gotify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // URL carries the app token
        f.debug_struct("Gotify").finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for Gotify {
    async fn send(&self, message: &str, title: &str, priority: Priority, log: bool) {
        echo(message, title, priority, log);

        let payload = match serde_json::to_string(&GotifyMessage {
            message,
            title,
            priority: priority.level(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Gotify send error");
                return;
            }
        };

        let client = self.clone();
        match tokio::task::spawn_blocking(move || client.post(payload)).await {
            Ok(Ok(status)) if (200..300).contains(&status) => debug!(status, "notification delivered"),
            Ok(Ok(status)) => error!(status, "Gotify send error: unexpected status"),
            Ok(Err(e)) => error!(error = %e, "Gotify send error"),
            Err(e) => error!(error = %e, "Gotify send task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_priority_levels() {
        assert_eq!(Priority::Normal.level(), 5);
        assert_eq!(Priority::Alert.level(), 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gotify_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(query_param("token", "secret"))
            .and(body_json(serde_json::json!({
                "message": "web1 down",
                "title": "Lightsail Server Update",
                "priority": 10
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gotify = Gotify::new(&server.uri(), "secret", Duration::from_secs(5));
        gotify
            .send("web1 down", "Lightsail Server Update", Priority::Alert, true)
            .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gotify_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let gotify = Gotify::new(&format!("{}/", server.uri()), "secret", Duration::from_secs(5));
        gotify.send("hello", "title", Priority::Normal, false).await;
    }

    #[tokio::test]
    async fn test_unreachable_sink_does_not_panic() {
        let gotify = Gotify::new("http://127.0.0.1:1", "secret", Duration::from_secs(1));
        gotify.send("hello", "title", Priority::Normal, true).await;
        NoopNotifier.send("hello", "title", Priority::Alert, true).await;
    }
}
