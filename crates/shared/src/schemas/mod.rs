// crates/shared/src/schemas/mod.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ExchangeId = u64;

/// Identity record returned by the service. Only `username` is guaranteed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Returned atomically by both `/login/` and `/register/`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

/// One query/response pair. The service always returns both halves.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    pub id: ExchangeId,
    pub query: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

// Request bodies

#[derive(Serialize, Debug)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize, Debug)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub query: &'a str,
}
