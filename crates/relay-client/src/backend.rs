//! HTTP client for the relay server's JSON API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use relay_core::api::{
    ConversationListResponse, ConversationSummary, MessageListResponse, MessageSummary,
    PollResponse, SendMessageRequest, SendMessageResponse,
};
use relay_core::events::NotificationEvent;
use relay_core::security::ApiKey;
use relay_core::time::format_timestamp;
use relay_settings::ClientSettings;

use crate::error::ClientError;

const API_KEY_HEADER: &str = "x-api-key";

/// Source of notification events newer than a cursor.
#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn fetch_since(
        &self,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<NotificationEvent>, ClientError>;
}

/// Source of conversation-list snapshots.
#[async_trait]
pub trait ConversationFeed: Send + Sync {
    async fn fetch_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, ClientError>;
}

pub struct BackendClient {
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl BackendClient {
    pub fn new(
        base_url: &str,
        api_key: Option<ApiKey>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("backend url {base_url:?}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ClientError> {
        Self::new(
            &settings.backend_url,
            settings.api_key.clone().map(ApiKey::new),
            Duration::from_millis(settings.request_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key.expose()),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(format!("{}{path}", self.base_url)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(format!("{}{path}", self.base_url)))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response.json::<T>().await.map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// `GET /api/notifications/poll`, omitting `since` when no cursor is held.
    pub async fn poll_notifications(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NotificationEvent>, ClientError> {
        let mut request = self.get("/api/notifications/poll");
        if let Some(since) = since {
            request = request.query(&[("since", format_timestamp(&since))]);
        }
        let response: PollResponse = self.send_json(request).await?;
        debug!(count = response.events.len(), "polled notifications");
        Ok(response.events)
    }

    pub async fn list_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        let request = self.get("/api/conversations").query(&[("limit", limit)]);
        let response: ConversationListResponse = self.send_json(request).await?;
        Ok(response.conversations)
    }

    /// Thread of a conversation, oldest first.
    pub async fn list_messages(
        &self,
        conversation_sid: &str,
    ) -> Result<Vec<MessageSummary>, ClientError> {
        let request = self.get("/api/messages").query(&[("conversationSid", conversation_sid)]);
        let response: MessageListResponse = self.send_json(request).await?;
        Ok(response.messages)
    }

    pub async fn send_message(
        &self,
        conversation_sid: &str,
        body: &str,
        author: Option<&str>,
    ) -> Result<MessageSummary, ClientError> {
        let request = self.post("/api/send-message").json(&SendMessageRequest {
            conversation_sid: Some(conversation_sid.to_string()),
            message: Some(body.to_string()),
            author: author.map(str::to_string),
        });
        let response: SendMessageResponse = self.send_json(request).await?;
        Ok(response.message)
    }

    /// Browser-loadable URL for message media. The key travels as a query
    /// parameter because image tags cannot set headers.
    pub fn media_url(&self, message_sid: &str, media_sid: &str) -> Result<String, ClientError> {
        let base = format!("{}/api/media/{message_sid}/{media_sid}", self.base_url);
        let url = match &self.api_key {
            Some(key) => Url::parse_with_params(&base, &[("apiKey", key.expose())]),
            None => Url::parse(&base),
        };
        url.map(String::from).map_err(|e| ClientError::Config(e.to_string()))
    }
}

#[async_trait]
impl EventFeed for BackendClient {
    async fn fetch_since(
        &self,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<NotificationEvent>, ClientError> {
        self.poll_notifications(cursor).await
    }
}

#[async_trait]
impl ConversationFeed for BackendClient {
    async fn fetch_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        self.list_conversations(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, key: Option<&str>) -> BackendClient {
        BackendClient::new(&server.uri(), key.map(ApiKey::new), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn poll_sends_cursor_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/notifications/poll"))
            .and(query_param("since", "2024-03-01T12:00:00.000Z"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{
                    "id": "evt_1",
                    "type": "incoming_message",
                    "timestamp": "2024-03-01T12:00:05.000Z",
                    "payload": {"from": "+1555", "to": "+1666", "conversationSid": "CH1"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let since = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let events = client(&server, Some("secret")).poll_notifications(Some(since)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["conversationSid"], "CH1");
    }

    #[tokio::test]
    async fn unauthorized_surfaces_server_message() {
        let server = MockServer::start().await;
        Mock::given(path("/api/notifications/poll"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "Unauthorized"})),
            )
            .mount(&server)
            .await;

        let err = client(&server, None).poll_notifications(None).await.unwrap_err();
        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(path("/api/notifications/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server, None).poll_notifications(None).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn conversations_pass_limit() {
        let server = MockServer::start().await;
        Mock::given(path("/api/conversations"))
            .and(query_param("limit", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [{
                    "sid": "CH1",
                    "dateUpdated": "2024-03-01T00:00:00Z",
                    "participants": []
                }],
                "count": 1
            })))
            .mount(&server)
            .await;

        let conversations = client(&server, None).list_conversations(25).await.unwrap();
        assert_eq!(conversations[0].sid, "CH1");
    }

    #[tokio::test]
    async fn send_message_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/send-message"))
            .and(body_json(json!({"conversationSid": "CH1", "message": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": {"sid": "IM1", "author": "system", "body": "hi"}
            })))
            .mount(&server)
            .await;

        let message = client(&server, None).send_message("CH1", "hi", None).await.unwrap();
        assert_eq!(message.sid, "IM1");
    }

    #[test]
    fn media_url_carries_query_key() {
        let client = BackendClient::new(
            "http://relay.local/",
            Some(ApiKey::new("a b")),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.media_url("MM1", "ME1").unwrap(),
            "http://relay.local/api/media/MM1/ME1?apiKey=a+b"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = BackendClient::new("not a url", None, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
