//! Failure notifications for batch runs.
//!
//! [`WebhookNotifier`] posts a Slack-style `{"text": ...}` payload to an
//! incoming-webhook URL. The URL embeds its own secret, so it never appears
//! in logs or errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::contract::{FailureNotice, FailureNotifier};
use crate::error::ClientError;
use crate::retry::{self, RetryConfig};

const WEBHOOK_ENDPOINT: &str = "notify-webhook";

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    notice: &'a FailureNotice,
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier").finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, retry: RetryConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::from_transport(WEBHOOK_ENDPOINT, e))?;
        Ok(Self {
            http,
            url: url.into(),
            retry,
        })
    }
}

/// One-line human summary of a failed account run.
pub fn notice_text(notice: &FailureNotice) -> String {
    let item = notice
        .item
        .as_deref()
        .map(|id| format!(" at media {id}"))
        .unwrap_or_default();
    format!(
        ":warning: media-relay: account {} failed{} after publishing {} item(s): {}",
        notice.account_id, item, notice.published, notice.message
    )
}

#[async_trait]
impl FailureNotifier for WebhookNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), ClientError> {
        let payload = WebhookPayload {
            text: notice_text(notice),
            notice,
        };
        retry::retry_with_backoff(&self.retry, retry::classify_client_error, || async {
            let response = self
                .http
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| ClientError::from_transport(WEBHOOK_ENDPOINT, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::from_status(WEBHOOK_ENDPOINT, status.as_u16(), body));
            }
            Ok(())
        })
        .await?;
        tracing::info!(account_id = %notice.account_id, "[NOTIFY] Sent failure notice");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> FailureNotice {
        FailureNotice {
            account_id: "acme".into(),
            published: 2,
            item: Some("M3".into()),
            message: "download of media M3 failed".into(),
        }
    }

    #[test]
    fn test_notice_text_names_account_and_item() {
        let text = notice_text(&notice());
        assert!(text.contains("account acme failed at media M3"), "{text}");
        assert!(text.contains("after publishing 2 item(s)"));
    }

    #[tokio::test]
    async fn test_webhook_posts_json_payload() {
        let (base_url, server) =
            crate::test_http::serve_once(200, "text/plain", b"ok".to_vec()).await;
        let notifier =
            WebhookNotifier::new(format!("{base_url}/hooks/T000/B000"), RetryConfig::none())
                .unwrap();

        notifier.notify(&notice()).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.head.starts_with("post /hooks/t000/b000"), "{}", request.head);
        let json: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(json["account_id"], "acme");
        assert_eq!(json["published"], 2);
        assert!(json["text"].as_str().unwrap().contains("acme"));
    }

    #[tokio::test]
    async fn test_webhook_rejection_hides_url() {
        let (base_url, _server) =
            crate::test_http::serve_once(403, "text/plain", b"invalid_token".to_vec()).await;
        let notifier =
            WebhookNotifier::new(format!("{base_url}/hooks/SECRET"), RetryConfig::none()).unwrap();

        let err = notifier.notify(&notice()).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 403, .. }));
        assert!(!err.to_string().contains("SECRET"));
        assert!(!format!("{notifier:?}").contains("SECRET"));
    }
}
