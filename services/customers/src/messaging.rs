//! WhatsApp Cloud API client.
//!
//! Each [`OutboundMessage`] is one `POST /{version}/{phone_number_id}/messages`
//! call authenticated with a bearer token. Calls are never retried here.

use crate::config::MessagingConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

/// Failure of a single messaging call
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to messaging API failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Messaging API rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One message as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub messaging_product: &'static str,
    /// Destination in international format, digits only
    pub to: String,
    #[serde(flatten)]
    pub content: MessageContent,
}

/// Message payload; serializes as `"type": ...` plus the matching object
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text { text: TextBody },
    Image { image: ImageLink },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageLink {
    pub link: String,
}

impl OutboundMessage {
    pub fn text(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            messaging_product: "whatsapp",
            to: to.into(),
            content: MessageContent::Text {
                text: TextBody { body: body.into() },
            },
        }
    }

    pub fn image(to: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            messaging_product: "whatsapp",
            to: to.into(),
            content: MessageContent::Image {
                image: ImageLink { link: link.into() },
            },
        }
    }

    /// `"text"` or `"image"`, for logging
    pub fn kind(&self) -> &'static str {
        match self.content {
            MessageContent::Text { .. } => "text",
            MessageContent::Image { .. } => "image",
        }
    }
}

/// Sends one message to the external chat endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MessagingError>;
}

/// reqwest-based WhatsApp Cloud API client
#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    http: Client,
    endpoint: String,
    access_token: String,
}

impl WhatsAppClient {
    pub fn new(config: &MessagingConfig) -> Result<Self, MessagingError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(MessagingError::Client)?;

        Ok(Self {
            http,
            endpoint: messages_endpoint(config),
            access_token: config.access_token.clone(),
        })
    }

    /// Messages endpoint this client posts to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MessagingClient for WhatsAppClient {
    #[instrument(skip(self, message), fields(kind = message.kind()))]
    async fn send(&self, message: &OutboundMessage) -> Result<(), MessagingError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(message)
            .send()
            .await
            .map_err(MessagingError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MessagingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), "Message accepted");
        Ok(())
    }
}

fn messages_endpoint(config: &MessagingConfig) -> String {
    format!(
        "{}/{}/{}/messages",
        config.api_base_url.trim_end_matches('/'),
        config.api_version.trim_matches('/'),
        config.phone_number_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> MessagingConfig {
        MessagingConfig {
            api_base_url: base_url.to_string(),
            api_version: "v18.0".to_string(),
            phone_number_id: "10987654321".to_string(),
            access_token: "secret-token".to_string(),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_text_message_wire_format() {
        let message = OutboundMessage::text("919876543210", "Customer: Asha");

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "messaging_product": "whatsapp",
                "to": "919876543210",
                "type": "text",
                "text": { "body": "Customer: Asha" }
            })
        );
    }

    #[test]
    fn test_image_message_wire_format() {
        let message = OutboundMessage::image("919876543210", "https://cdn/x.jpg");

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "messaging_product": "whatsapp",
                "to": "919876543210",
                "type": "image",
                "image": { "link": "https://cdn/x.jpg" }
            })
        );
    }

    #[test]
    fn test_endpoint_from_config() {
        let client = WhatsAppClient::new(&config("https://graph.facebook.com/")).unwrap();

        assert_eq!(
            client.endpoint(),
            "https://graph.facebook.com/v18.0/10987654321/messages"
        );
    }

    #[tokio::test]
    async fn test_send_posts_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/10987654321/messages"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(json!({
                "messaging_product": "whatsapp",
                "to": "919876543210",
                "type": "text",
                "text": { "body": "hello" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&config(&server.uri())).unwrap();
        client
            .send(&OutboundMessage::text("919876543210", "hello"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_to_unreachable_endpoint_is_transport_error() {
        // Reserve a port, then close it so the connection is refused
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = WhatsAppClient::new(&config(&format!("http://{addr}"))).unwrap();
        let result = client
            .send(&OutboundMessage::text("919876543210", "hello"))
            .await;

        assert!(matches!(result, Err(MessagingError::Transport(_))));
    }

    #[tokio::test]
    async fn test_send_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error":{"code":190}}"#),
            )
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&config(&server.uri())).unwrap();
        let result = client
            .send(&OutboundMessage::image("919876543210", "https://cdn/x.jpg"))
            .await;

        match result {
            Err(MessagingError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("190"));
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }
}
