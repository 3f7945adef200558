//! HTTP webhook implementations of the notice and message collaborators.
//!
//! Delivery is fire-and-forget: each call spawns a POST on the current tokio
//! runtime and returns immediately, so a slow receiver never holds up the
//! request that committed the change. Failures are logged.

use std::time::Duration;

use anyhow::Context as _;
use overseer_core::effect::{Notifier, Publisher, SinkError};
use reqwest::Client;
use serde_json::{Value, json};

/// Posts JSON bodies to a fixed URL.
#[derive(Clone)]
pub struct WebhookSink {
  client: Client,
  url:    String,
}

impl WebhookSink {
  pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, url: url.into() })
  }

  fn post(&self, body: Value) -> Result<(), SinkError> {
    let handle = tokio::runtime::Handle::try_current()
      .map_err(|e| SinkError(format!("no async runtime: {e}")))?;

    let request = self.client.post(&self.url).json(&body);
    let url = self.url.clone();
    handle.spawn(async move {
      match request.send().await {
        Ok(resp) if resp.status().is_success() => {
          tracing::debug!(%url, "webhook delivered");
        }
        Ok(resp) => tracing::warn!(%url, status = %resp.status(), "webhook rejected"),
        Err(e) => tracing::warn!(%url, error = %e, "webhook failed"),
      }
    });
    Ok(())
  }
}

pub fn notice_body(username: &str, title: &str, body: &str) -> Value {
  json!({ "username": username, "title": title, "body": body })
}

pub fn message_body(topic: &str, method: &str, payload: &Value) -> Value {
  json!({ "topic": topic, "method": method, "payload": payload })
}

impl Notifier for WebhookSink {
  fn push_message(
    &self,
    username: &str,
    title: &str,
    body: &str,
  ) -> Result<(), SinkError> {
    self.post(notice_body(username, title, body))
  }
}

impl Publisher for WebhookSink {
  fn publish(
    &self,
    topic: &str,
    method: &str,
    payload: &Value,
  ) -> Result<(), SinkError> {
    self.post(message_body(topic, method, payload))
  }
}
