use std::sync::Arc;

use parley_shared::{
    AuthResponse, ChatRequest, ErrorBody, Exchange, ExchangeId, LoginRequest, RegisterRequest, User,
};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::SessionStore;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A protected call was rejected for its credential. The session has
    /// already been ended by the time the caller sees this.
    #[error("session is no longer valid")]
    Unauthorized,

    #[error("request failed with status {status}")]
    Rejected { status: StatusCode, body: ErrorBody },

    #[error("could not reach the chat service: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected response from the chat service: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ClientError {
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            ClientError::Rejected { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The service's own `error` message, when it sent one.
    pub fn service_message(&self) -> Option<&str> {
        self.body().and_then(ErrorBody::message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Public,
    Protected,
}

/// A request plus the credential it was built with.
struct Outbound {
    builder: RequestBuilder,
    token: Option<String>,
}

impl Outbound {
    fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        Self {
            builder: self.builder.json(body),
            token: self.token,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: Arc<SessionStore>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ClientError> {
        let request = self.request(Method::POST, "/register/").json(&RegisterRequest {
            username,
            email,
            password,
        });
        self.fetch(request, Access::Public).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let request = self
            .request(Method::POST, "/login/")
            .json(&LoginRequest { username, password });
        self.fetch(request, Access::Public).await
    }

    pub async fn profile(&self) -> Result<User, ClientError> {
        let request = self.request(Method::GET, "/profile/");
        self.fetch(request, Access::Protected).await
    }

    /// Sends `query` exactly as typed; the service does its own trimming.
    pub async fn send_chat(&self, query: &str) -> Result<Exchange, ClientError> {
        let request = self.request(Method::POST, "/chat/").json(&ChatRequest { query });
        self.fetch(request, Access::Protected).await
    }

    pub async fn history(&self) -> Result<Vec<Exchange>, ClientError> {
        let request = self.request(Method::GET, "/history/");
        self.fetch(request, Access::Protected).await
    }

    pub async fn delete_chat(&self, id: ExchangeId) -> Result<(), ClientError> {
        let request = self.request(Method::DELETE, &format!("/history/{id}/"));
        self.dispatch(request, Access::Protected).await?;
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> Outbound {
        let url = format!("{}{}", self.base_url, path);
        let token = self.session.token();

        debug!(%method, %url, authenticated = token.is_some(), "Dispatching request");

        let mut builder = self.client.request(method, &url);
        if let Some(token) = &token {
            builder = builder.header(AUTHORIZATION, format!("Token {token}"));
        }

        Outbound { builder, token }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: Outbound,
        access: Access,
    ) -> Result<T, ClientError> {
        let bytes = self.dispatch(request, access).await?;
        serde_json::from_slice(&bytes).map_err(ClientError::Decode)
    }

    async fn dispatch(&self, request: Outbound, access: Access) -> Result<Vec<u8>, ClientError> {
        let Outbound { builder, token } = request;

        let response = builder.send().await.map_err(ClientError::Transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ClientError::Transport)?;

        if status.is_success() {
            debug!(%status, "Request succeeded");
            return Ok(bytes.to_vec());
        }

        // Check for an expired or missing credential on a protected endpoint
        if access == Access::Protected
            && (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN)
        {
            if !self.session.invalidate(token.as_deref()) {
                debug!(%status, "Rejection belongs to a session that already ended");
            }
            return Err(ClientError::Unauthorized);
        }

        let body = ErrorBody::from_bytes(&bytes);
        warn!(%status, body = %body.raw(), "Request rejected");
        Err(ClientError::Rejected { status, body })
    }
}
