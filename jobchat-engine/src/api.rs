//! REST collaborators used for snapshots and bulk actions.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::models::{
    Conversation, ConversationId, CreateConversationRequest, MarkAllReadRequest, Message,
    NotificationEvent, UserId,
};
use tracing::debug;
use url::Url;

use crate::error::FetchError;

#[async_trait]
pub trait SnapshotApi: Send + Sync {
    async fn fetch_conversations(&self, user_id: UserId) -> Result<Vec<Conversation>, FetchError>;

    /// History of one conversation, ascending by `createdAt`.
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, FetchError>;

    async fn fetch_notifications(
        &self,
        user_id: UserId,
    ) -> Result<Vec<NotificationEvent>, FetchError>;

    async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<(), FetchError>;

    async fn create_conversation(
        &self,
        participants: Vec<UserId>,
    ) -> Result<Conversation, FetchError>;
}

/// Lightweight API client for the JobChat REST endpoints.
#[derive(Clone, Debug)]
pub struct HttpSnapshotApi {
    base_url: Url,
    client: Client,
    token: Option<String>,
}

impl HttpSnapshotApi {
    /// `base_url` is the server origin; endpoints live under `api/`.
    #[must_use]
    pub fn new(client: Client, base_url: Url) -> Self {
        Self {
            base_url,
            client,
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn api_url(&self, path: &str) -> Result<Url, FetchError> {
        Ok(self
            .base_url
            .join("api/")?
            .join(path.trim_start_matches('/'))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, FetchError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FetchError::status(status.as_u16(), &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self.api_url(path)?;
        debug!(%url, "fetching snapshot");
        let response = self.send(self.client.get(url)).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SnapshotApi for HttpSnapshotApi {
    async fn fetch_conversations(&self, user_id: UserId) -> Result<Vec<Conversation>, FetchError> {
        self.get_json(&format!("conversations/user/{user_id}")).await
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, FetchError> {
        self.get_json(&format!("conversations/{conversation_id}/messages"))
            .await
    }

    async fn fetch_notifications(
        &self,
        user_id: UserId,
    ) -> Result<Vec<NotificationEvent>, FetchError> {
        self.get_json(&format!("notifications/user/{user_id}")).await
    }

    async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<(), FetchError> {
        let url = self.api_url("notifications/read-all")?;
        self.send(self.client.post(url).json(&MarkAllReadRequest { user_id }))
            .await?;
        Ok(())
    }

    async fn create_conversation(
        &self,
        participants: Vec<UserId>,
    ) -> Result<Conversation, FetchError> {
        let url = self.api_url("conversations")?;
        let response = self
            .send(
                self.client
                    .post(url)
                    .json(&CreateConversationRequest { participants }),
            )
            .await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_urls_live_under_api_prefix() {
        let api = HttpSnapshotApi::new(
            Client::new(),
            Url::parse("https://jobs.example.com/").unwrap(),
        );
        let id = uuid::Uuid::nil();

        let url = api
            .api_url(&format!("conversations/{id}/messages"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://jobs.example.com/api/conversations/{id}/messages")
        );
        assert_eq!(
            api.api_url("/notifications/read-all").unwrap().as_str(),
            "https://jobs.example.com/api/notifications/read-all"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let api = HttpSnapshotApi::new(Client::new(), Url::parse("http://127.0.0.1:9/").unwrap());
        let error = api.fetch_conversations(uuid::Uuid::nil()).await.unwrap_err();
        assert!(matches!(error, FetchError::Http(_)));
        assert!(error.is_transient());
    }
}
