use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use relay_core::security::ApiKey;
use relay_core::time::format_timestamp;
use relay_settings::ProviderSettings;
use relay_telemetry::metrics::{
    PROVIDER_ERRORS_TOTAL, PROVIDER_REQUESTS_TOTAL, PROVIDER_REQUEST_DURATION_SECONDS,
};

use crate::error::ProviderError;
use crate::provider::ConversationProvider;
use crate::types::{
    Conversation, ConversationMessage, ConversationPage, MediaContent, MediaSource, MessagePage,
    MessageQuery, NewConversationMessage, Participant, ParticipantPage, SmsFilter, SmsMessage,
    SmsPage,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest page the provider accepts.
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<ApiKey>,
    pub conversations_base_url: String,
    pub api_base_url: String,
    /// Conversation media host, e.g. `https://mcs.us1.twilio.com/v1`.
    pub media_base_url: String,
    pub timeout: Duration,
}

impl TwilioConfig {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let media_base_url = settings
            .media_base_url
            .clone()
            .unwrap_or_else(|| format!("https://mcs.{}.twilio.com/v1", settings.region));
        Self {
            account_sid: settings.account_sid.clone(),
            auth_token: settings.auth_token.clone().map(ApiKey::new),
            conversations_base_url: trim_slash(&settings.conversations_base_url),
            api_base_url: trim_slash(&settings.api_base_url),
            media_base_url: trim_slash(&media_base_url),
            timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.account_sid.as_deref().is_some_and(|s| !s.is_empty()) && self.auth_token.is_some()
    }
}

fn trim_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// REST client for the provider's Conversations, Messaging and media APIs.
///
/// Missing credentials do not prevent construction; every call fails with
/// [`ProviderError::MissingCredentials`] instead.
pub struct TwilioProvider {
    client: Client,
    config: TwilioConfig,
}

impl TwilioProvider {
    pub fn new(config: TwilioConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn credentials(&self) -> Result<(&str, &ApiKey), ProviderError> {
        match (self.config.account_sid.as_deref(), self.config.auth_token.as_ref()) {
            (Some(sid), Some(token)) if !sid.is_empty() => Ok((sid, token)),
            _ => Err(ProviderError::MissingCredentials),
        }
    }

    fn get(&self, url: &str) -> Result<RequestBuilder, ProviderError> {
        let (sid, token) = self.credentials()?;
        Ok(self.client.get(url).basic_auth(sid, Some(token.expose())))
    }

    fn post(&self, url: &str) -> Result<RequestBuilder, ProviderError> {
        let (sid, token) = self.credentials()?;
        Ok(self.client.post(url).basic_auth(sid, Some(token.expose())))
    }

    fn conversations_url(&self, path: &str) -> String {
        format!("{}/Conversations{}", self.config.conversations_base_url, path)
    }

    fn account_url(&self, path: &str) -> Result<String, ProviderError> {
        let (sid, _) = self.credentials()?;
        Ok(format!("{}/Accounts/{}{}", self.config.api_base_url, sid, path))
    }

    async fn send(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, ProviderError> {
        counter!(PROVIDER_REQUESTS_TOTAL, "operation" => operation).increment(1);
        let started = Instant::now();
        let result = request.send().await;
        histogram!(PROVIDER_REQUEST_DURATION_SECONDS, "operation" => operation)
            .record(started.elapsed().as_secs_f64());

        let error = match result {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                ProviderError::from_status(status, body)
            }
            Err(e) => ProviderError::from_reqwest(e, self.config.timeout),
        };
        counter!(PROVIDER_ERRORS_TOTAL, "operation" => operation, "kind" => error.error_kind())
            .increment(1);
        warn!(operation, error = %error, "provider request failed");
        Err(error)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, ProviderError> {
        let response = self.send(request, operation).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(format!("{operation}: {e}")))
    }
}

#[async_trait]
impl ConversationProvider for TwilioProvider {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, ProviderError> {
        let page_size = limit.clamp(1, MAX_PAGE_SIZE).to_string();
        let request = self.get(&self.conversations_url(""))?.query(&[("PageSize", page_size)]);
        let page: ConversationPage = self.send_json(request, "list_conversations").await?;
        debug!(count = page.conversations.len(), "listed conversations");
        Ok(page.conversations)
    }

    async fn list_participants(
        &self,
        conversation_sid: &str,
    ) -> Result<Vec<Participant>, ProviderError> {
        let url = self.conversations_url(&format!("/{conversation_sid}/Participants"));
        let request = self.get(&url)?.query(&[("PageSize", "100")]);
        let page: ParticipantPage = self.send_json(request, "list_participants").await?;
        Ok(page.participants)
    }

    async fn list_messages(
        &self,
        conversation_sid: &str,
        query: MessageQuery,
    ) -> Result<Vec<ConversationMessage>, ProviderError> {
        let url = self.conversations_url(&format!("/{conversation_sid}/Messages"));
        let request = self.get(&url)?.query(&[
            ("Order", query.order.as_str().to_string()),
            ("PageSize", query.limit.clamp(1, MAX_PAGE_SIZE).to_string()),
        ]);
        let page: MessagePage = self.send_json(request, "list_messages").await?;
        Ok(page.messages)
    }

    async fn create_conversation(
        &self,
        friendly_name: &str,
    ) -> Result<Conversation, ProviderError> {
        let request = self
            .post(&self.conversations_url(""))?
            .form(&[("FriendlyName", friendly_name)]);
        self.send_json(request, "create_conversation").await
    }

    async fn add_sms_participant(
        &self,
        conversation_sid: &str,
        address: &str,
        proxy_address: &str,
    ) -> Result<Participant, ProviderError> {
        let url = self.conversations_url(&format!("/{conversation_sid}/Participants"));
        let request = self.post(&url)?.form(&[
            ("MessagingBinding.Address", address),
            ("MessagingBinding.ProxyAddress", proxy_address),
        ]);
        self.send_json(request, "add_participant").await
    }

    async fn create_message(
        &self,
        conversation_sid: &str,
        message: NewConversationMessage,
    ) -> Result<ConversationMessage, ProviderError> {
        let url = self.conversations_url(&format!("/{conversation_sid}/Messages"));
        let mut form = vec![("Author", message.author), ("Body", message.body)];
        if let Some(date) = message.date_created {
            form.push(("DateCreated", format_timestamp(&date)));
        }
        if let Some(attributes) = message.attributes {
            form.push(("Attributes", attributes));
        }
        let request = self.post(&url)?.form(&form);
        self.send_json(request, "create_message").await
    }

    async fn update_message_attributes(
        &self,
        conversation_sid: &str,
        message_sid: &str,
        attributes: &str,
    ) -> Result<(), ProviderError> {
        let url = self.conversations_url(&format!("/{conversation_sid}/Messages/{message_sid}"));
        let request = self.post(&url)?.form(&[("Attributes", attributes)]);
        self.send(request, "update_message").await?;
        Ok(())
    }

    async fn list_sms(&self, filter: SmsFilter) -> Result<Vec<SmsMessage>, ProviderError> {
        let mut query = vec![("PageSize", filter.limit.clamp(1, MAX_PAGE_SIZE).to_string())];
        if let Some(from) = filter.from {
            query.push(("From", from));
        }
        if let Some(to) = filter.to {
            query.push(("To", to));
        }
        let request = self.get(&self.account_url("/Messages.json")?)?.query(&query);
        let page: SmsPage = self.send_json(request, "list_sms").await?;
        Ok(page.messages)
    }

    async fn send_sms(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<SmsMessage, ProviderError> {
        let request = self
            .post(&self.account_url("/Messages.json")?)?
            .form(&[("From", from), ("To", to), ("Body", body)]);
        self.send_json(request, "send_sms").await
    }

    async fn fetch_media(&self, source: &MediaSource) -> Result<MediaContent, ProviderError> {
        let url = match source {
            MediaSource::Message { message_sid, media_sid } => {
                self.account_url(&format!("/Messages/{message_sid}/Media/{media_sid}"))?
            }
            MediaSource::Conversation { service_sid, media_sid } => format!(
                "{}/Services/{service_sid}/Media/{media_sid}/Content",
                self.config.media_base_url
            ),
        };
        let response = self.send(self.get(&url)?, "fetch_media").await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.config.timeout))?;
        Ok(MediaContent { content_type, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Order;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> TwilioConfig {
        TwilioConfig {
            account_sid: Some("AC123".into()),
            auth_token: Some(ApiKey::new("token")),
            conversations_base_url: format!("{}/v1", server.uri()),
            api_base_url: format!("{}/2010-04-01", server.uri()),
            media_base_url: format!("{}/mcs/v1", server.uri()),
            timeout: Duration::from_secs(5),
        }
    }

    fn provider(server: &MockServer) -> TwilioProvider {
        TwilioProvider::new(config(server)).unwrap()
    }

    #[test]
    fn media_host_derives_from_region() {
        let settings = ProviderSettings {
            region: "ie1".into(),
            ..Default::default()
        };
        let config = TwilioConfig::from_settings(&settings);
        assert_eq!(config.media_base_url, "https://mcs.ie1.twilio.com/v1");
        assert!(!config.has_credentials());
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_request() {
        let server = MockServer::start().await;
        let mut config = config(&server);
        config.account_sid = None;
        let provider = TwilioProvider::new(config).unwrap();
        let err = provider.list_conversations(10).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_conversations_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/Conversations"))
            .and(query_param("PageSize", "50"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [
                    {
                        "sid": "CH1",
                        "friendly_name": "SMS with +1555",
                        "date_updated": "2024-03-01T00:00:00Z"
                    }
                ],
                "meta": {"page": 0}
            })))
            .mount(&server)
            .await;

        let conversations = provider(&server).list_conversations(50).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].sid, "CH1");
        assert!(conversations[0].date_updated.is_some());
    }

    #[tokio::test]
    async fn list_messages_passes_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/Conversations/CH1/Messages"))
            .and(query_param("Order", "desc"))
            .and(query_param("PageSize", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"sid": "IM2", "author": "+1555", "body": "latest", "index": 1}]
            })))
            .mount(&server)
            .await;

        let messages = provider(&server)
            .list_messages("CH1", MessageQuery { limit: 20, order: Order::Desc })
            .await
            .unwrap();
        assert_eq!(messages[0].body.as_deref(), Some("latest"));
    }

    #[tokio::test]
    async fn add_participant_sends_binding_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/Conversations/CH1/Participants"))
            .and(body_string_contains("MessagingBinding.Address=%2B1555"))
            .and(body_string_contains("MessagingBinding.ProxyAddress=%2B1666"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sid": "MB1",
                "messaging_binding": {"type": "sms", "address": "+1555", "proxy_address": "+1666"}
            })))
            .mount(&server)
            .await;

        let participant = provider(&server)
            .add_sms_participant("CH1", "+1555", "+1666")
            .await
            .unwrap();
        assert_eq!(participant.address(), Some("+1555"));
    }

    #[tokio::test]
    async fn create_message_includes_optional_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/Conversations/CH1/Messages"))
            .and(body_string_contains("Author=system"))
            .and(body_string_contains("DateCreated=2024-03-01T10%3A00%3A00.000Z"))
            .and(body_string_contains("Attributes="))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"sid": "IM9", "author": "system"})),
            )
            .mount(&server)
            .await;

        let message = NewConversationMessage {
            author: "system".into(),
            body: "hello".into(),
            date_created: relay_core::time::parse_timestamp("2024-03-01T10:00:00Z"),
            attributes: Some(r#"{"backfilled":true}"#.into()),
        };
        let created = provider(&server).create_message("CH1", message).await.unwrap();
        assert_eq!(created.sid, "IM9");
    }

    #[tokio::test]
    async fn list_sms_uses_account_path_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(query_param("From", "+1555"))
            .and(query_param("To", "+1666"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"sid": "SM1", "from": "+1555", "to": "+1666", "body": "hi",
                              "date_created": "Fri, 01 Mar 2024 10:00:00 +0000"}]
            })))
            .mount(&server)
            .await;

        let filter = SmsFilter {
            from: Some("+1555".into()),
            to: Some("+1666".into()),
            limit: 100,
        };
        let messages = provider(&server).list_sms(filter).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].date_created.is_some());
    }

    #[tokio::test]
    async fn error_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/Conversations/CHX/Participants"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = provider(&server).list_participants("CHX").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn fetches_message_media_with_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2010-04-01/Accounts/AC123/Messages/MM1/Media/ME1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
            )
            .mount(&server)
            .await;

        let source = MediaSource::Message {
            message_sid: "MM1".into(),
            media_sid: "ME1".into(),
        };
        let media = provider(&server).fetch_media(&source).await.unwrap();
        assert_eq!(media.content_type.as_deref(), Some("image/png"));
        assert_eq!(media.bytes.len(), 4);
    }

    #[tokio::test]
    async fn fetches_conversation_media_from_media_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcs/v1/Services/IS1/Media/ME2/Content"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let source = MediaSource::Conversation {
            service_sid: "IS1".into(),
            media_sid: "ME2".into(),
        };
        let media = provider(&server).fetch_media(&source).await.unwrap();
        assert_eq!(&media.bytes[..], b"data");
    }

    #[tokio::test]
    async fn media_upstream_status_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2010-04-01/Accounts/AC123/Messages/MM1/Media/MEX"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = MediaSource::Message {
            message_sid: "MM1".into(),
            media_sid: "MEX".into(),
        };
        let err = provider(&server).fetch_media(&source).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
