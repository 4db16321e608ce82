//! REST client.

use crate::credentials::CredentialStore;
use crate::error::ApiError;
use parley_core::{
    AuthResponse, Conversation, ConversationId, LoginCredentials, MessageRecord, NewConversation,
    RegisterData, User,
};
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// The durable message path the coordinator falls back to.
pub trait MessageStore: Send + Sync {
    /// Persisted messages of a conversation, oldest first.
    fn messages(
        &self,
        conversation: &ConversationId,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, ApiError>> + Send;

    /// Persist a message; the returned record carries the authoritative id and time.
    fn post_message(
        &self,
        conversation: &ConversationId,
        content: &str,
    ) -> impl Future<Output = Result<MessageRecord, ApiError>> + Send;
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Client for the chat backend's REST API.
#[derive(Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base: Url,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpApi {
    /// `base` must end in `/` (see [`crate::ClientConfig::api_url`]).
    pub fn new(base: Url, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path).map_err(|e| ApiError::Url(e.to_string()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = match self.credentials.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.detail)
            .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
        tracing::debug!(%status, %detail, "request rejected");
        Err(ApiError::Status { status, detail })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        Ok(self.execute(request).await?.json().await?)
    }

    /// Exchange username and password for an access token.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        let url = self.url("auth/token/")?;
        self.fetch(self.http.post(url).json(credentials)).await
    }

    pub async fn register(&self, data: &RegisterData) -> Result<User, ApiError> {
        let url = self.url("auth/register/")?;
        self.fetch(self.http.post(url).json(data)).await
    }

    pub async fn refresh_token(&self, refresh: &str) -> Result<AuthResponse, ApiError> {
        let url = self.url("auth/token/refresh/")?;
        let body = serde_json::json!({ "refresh": refresh });
        self.fetch(self.http.post(url).json(&body)).await
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        let url = self.url("auth/me/")?;
        self.fetch(self.http.get(url)).await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = self.url("auth/logout/")?;
        self.execute(self.http.post(url)).await?;
        Ok(())
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<User>, ApiError> {
        let url = self.url("users/search/")?;
        self.fetch(self.http.get(url).query(&[("q", query)])).await
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let url = self.url("conversations/")?;
        self.fetch(self.http.get(url)).await
    }

    pub async fn create_conversation(
        &self,
        data: &NewConversation,
    ) -> Result<Conversation, ApiError> {
        let url = self.url("conversations/")?;
        self.fetch(self.http.post(url).json(data)).await
    }

    fn messages_url(&self, conversation: &ConversationId) -> Result<Url, ApiError> {
        self.url(&format!("conversations/{conversation}/messages/"))
    }
}

impl MessageStore for HttpApi {
    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<MessageRecord>, ApiError> {
        let url = self.messages_url(conversation)?;
        self.fetch(self.http.get(url)).await
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        content: &str,
    ) -> Result<MessageRecord, ApiError> {
        let url = self.messages_url(conversation)?;
        let body = serde_json::json!({ "content": content });
        self.fetch(self.http.post(url).json(&body)).await
    }
}
