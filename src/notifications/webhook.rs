use std::time::Duration;

use async_trait::async_trait;

use super::{Arrival, Notifier, NotifyError};

/// POSTs each arrival as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, arrival: &Arrival) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(arrival)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        tracing::debug!(url = %self.url, visitor_id = %arrival.visitor_id, "Webhook notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn posts_arrival_json() {
        let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), 5);
        notifier
            .notify(&Arrival::incoming("kefu1", "v1", "Alice", "a.png"))
            .await
            .unwrap();

        let body = rx.recv().await.unwrap();
        assert_eq!(body["agent"], "kefu1");
        assert_eq!(body["message"], "Alice incoming!");
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let app = Router::new().route("/hook", post(|| async { axum::http::StatusCode::BAD_GATEWAY }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), 5);
        let err = notifier
            .notify(&Arrival::incoming("kefu1", "v1", "Alice", "a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status(s) if s.as_u16() == 502));
    }
}
