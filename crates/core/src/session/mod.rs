//! Session protocol for the external lighting endpoint.
//!
//! A single registration call yields a session-scoped base URI; every later
//! call (heartbeat, grid push, teardown) goes against that URI. Failures are
//! never escalated: an expired session, a dead endpoint and a flaky network all
//! look the same to the caller.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{lighting::GridFrame, BoxFuture, Result};

/// Application description sent with the registration call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppMetadata {
    pub title: String,
    pub description: String,
    pub author: AppAuthor,
    pub device_supported: Vec<String>,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppAuthor {
    pub name: String,
    pub contact: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            title: "KeySmash".to_string(),
            description: "Baby keyboard light show".to_string(),
            author: AppAuthor {
                name: "KeySmash".to_string(),
                contact: "https://github.com".to_string(),
            },
            device_supported: vec!["keyboard".to_string()],
            category: "application".to_string(),
        }
    }
}

/// A live session with the lighting endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightingSession {
    uri: String,
    last_heartbeat_at: Option<Instant>,
}

impl LightingSession {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            last_heartbeat_at: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn last_heartbeat_at(&self) -> Option<Instant> {
        self.last_heartbeat_at
    }

    pub fn record_heartbeat(&mut self, at: Instant) {
        self.last_heartbeat_at = Some(at);
    }
}

/// The four logical calls of the lighting endpoint. Implementations must not
/// retry internally; the engine decides what a failure means.
pub trait LightingEndpoint: Send + Sync {
    /// Identifies the application and returns the session base URI.
    fn register<'a>(&'a self, app: &'a AppMetadata) -> BoxFuture<'a, Result<String>>;
    fn heartbeat<'a>(&'a self, session_uri: &'a str) -> BoxFuture<'a, Result<()>>;
    fn push_grid<'a>(&'a self, session_uri: &'a str, grid: &'a GridFrame)
        -> BoxFuture<'a, Result<()>>;
    fn teardown<'a>(&'a self, session_uri: &'a str) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    uri: String,
}

#[derive(Debug, Serialize)]
struct CustomEffect<'a> {
    effect: &'static str,
    param: &'a GridFrame,
}

/// REST client for a Chroma-style lighting service.
#[derive(Debug, Clone)]
pub struct ChromaRestEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl ChromaRestEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn registration_url(&self) -> String {
        format!("{}/razer/rest/chromasdk", self.base_url)
    }
}

impl LightingEndpoint for ChromaRestEndpoint {
    fn register<'a>(&'a self, app: &'a AppMetadata) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.registration_url())
                .json(app)
                .send()
                .await?
                .error_for_status()?;
            let body: RegisterResponse = response.json().await?;
            Ok(body.uri)
        })
    }

    fn heartbeat<'a>(&'a self, session_uri: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.client
                .put(format!("{session_uri}/heartbeat"))
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }

    fn push_grid<'a>(
        &'a self,
        session_uri: &'a str,
        grid: &'a GridFrame,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = CustomEffect {
                effect: "CHROMA_CUSTOM",
                param: grid,
            };
            self.client
                .put(format!("{session_uri}/keyboard"))
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }

    fn teardown<'a>(&'a self, session_uri: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.client
                .delete(session_uri)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lighting::{COLS, ROWS};

    #[test]
    fn registration_payload_matches_endpoint_schema() {
        let value = serde_json::to_value(AppMetadata::default()).unwrap();

        assert_eq!(value["title"], "KeySmash");
        assert_eq!(value["author"]["name"], "KeySmash");
        assert_eq!(value["device_supported"], serde_json::json!(["keyboard"]));
        assert_eq!(value["category"], "application");
    }

    #[test]
    fn custom_effect_wraps_the_grid() {
        let frame = GridFrame([[7; COLS]; ROWS]);
        let value = serde_json::to_value(CustomEffect {
            effect: "CHROMA_CUSTOM",
            param: &frame,
        })
        .unwrap();

        assert_eq!(value["effect"], "CHROMA_CUSTOM");
        assert_eq!(value["param"].as_array().unwrap().len(), ROWS);
        assert_eq!(value["param"][0].as_array().unwrap().len(), COLS);
    }

    #[test]
    fn registration_url_ignores_trailing_slash() {
        let endpoint =
            ChromaRestEndpoint::new("http://localhost:54235/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            endpoint.registration_url(),
            "http://localhost:54235/razer/rest/chromasdk"
        );
    }

    #[test]
    fn heartbeat_is_recorded_on_the_session() {
        let mut session = LightingSession::new("http://localhost:54236/chromasdk");
        assert!(session.last_heartbeat_at().is_none());

        let now = Instant::now();
        session.record_heartbeat(now);
        assert_eq!(session.last_heartbeat_at(), Some(now));
    }
}
