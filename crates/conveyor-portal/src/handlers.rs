use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_queue::{Handler, HandlerError, HandlerFn, Item, Queue};

/// POSTs the item payload to the URL the payload names.
///
/// Sanitize rejects anything that is not an http(s) URL at push time, so a
/// file of bad URLs bounces at upload rather than burning attempts. Server
/// errors are transient; client errors are permanent.
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for WebhookHandler {
    fn sanitize(&self, item: &mut Item) -> Result<(), HandlerError> {
        let url = item.payload.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(HandlerError::fail(format!("not an http(s) URL: '{url}'")));
        }
        item.payload = url.to_string();
        Ok(())
    }

    async fn execute(&self, item: Item) -> Result<Vec<u8>, HandlerError> {
        let resp = self
            .client
            .post(&item.payload)
            .send()
            .await
            .map_err(|e| HandlerError::retry(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| HandlerError::retry(e.to_string()))?;

        if status.is_success() {
            Ok(body.to_vec())
        } else if status.is_server_error() {
            Err(HandlerError::retry(format!("webhook returned {status}")))
        } else {
            Err(HandlerError::fail(format!("webhook returned {status}")))
        }
    }
}

/// The handlers the binary ships with.
pub fn register_builtin(queue: &Queue) {
    queue.register(
        "echo",
        Arc::new(HandlerFn(|item: Item| async move {
            Ok(item.payload.into_bytes())
        })),
    );
    queue.register("webhook", Arc::new(WebhookHandler::new()));
}
