// Form state for the login and registration screens.

use parley_shared::User;
use thiserror::Error;
use tracing::warn;

use crate::client::{ApiClient, ClientError};

const LOGIN_FAILED: &str = "Login failed. Please check your credentials.";
const REGISTER_FAILED: &str = "Registration failed. Please try again.";

/// Message to show next to the form that was submitted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FormError {
    pub message: String,
}

impl FormError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub fn login_error_message(error: &ClientError) -> String {
    error
        .body()
        .and_then(|body| body.first_of(&["error"]))
        .unwrap_or(LOGIN_FAILED)
        .to_string()
}

/// First field-specific message wins, then the general `error`.
pub fn register_error_message(error: &ClientError) -> String {
    error
        .body()
        .and_then(|body| body.first_of(&["username", "email", "password", "error"]))
        .unwrap_or(REGISTER_FAILED)
        .to_string()
}

#[derive(Debug, Default, Clone)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub error: Option<String>,
    pub submitting: bool,
}

impl LoginForm {
    pub fn set_username(&mut self, value: impl Into<String>) {
        self.username = value.into();
    }

    pub fn set_password(&mut self, value: impl Into<String>) {
        self.password = value.into();
    }

    /// On success the session is started before this returns.
    pub async fn submit(&mut self, client: &ApiClient) -> Result<User, FormError> {
        self.error = None;
        self.submitting = true;
        let outcome = client.login(&self.username, &self.password).await;
        self.submitting = false;

        match outcome {
            Ok(auth) => {
                client.session().login(auth.user.clone(), auth.token);
                self.password.clear();
                Ok(auth.user)
            }
            Err(e) => {
                warn!(error = %e, "Login rejected");
                let message = login_error_message(&e);
                self.error = Some(message.clone());
                Err(FormError::new(message))
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub error: Option<String>,
    pub submitting: bool,
}

impl RegisterForm {
    pub fn set_username(&mut self, value: impl Into<String>) {
        self.username = value.into();
    }

    pub fn set_email(&mut self, value: impl Into<String>) {
        self.email = value.into();
    }

    pub fn set_password(&mut self, value: impl Into<String>) {
        self.password = value.into();
    }

    pub async fn submit(&mut self, client: &ApiClient) -> Result<User, FormError> {
        self.error = None;
        self.submitting = true;
        let outcome = client
            .register(&self.username, &self.email, &self.password)
            .await;
        self.submitting = false;

        match outcome {
            Ok(auth) => {
                client.session().login(auth.user.clone(), auth.token);
                self.password.clear();
                Ok(auth.user)
            }
            Err(e) => {
                warn!(error = %e, "Registration rejected");
                let message = register_error_message(&e);
                self.error = Some(message.clone());
                Err(FormError::new(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::ErrorBody;
    use reqwest::StatusCode;
    use serde_json::json;

    fn rejected(body: serde_json::Value) -> ClientError {
        ClientError::Rejected {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::from(body),
        }
    }

    #[test]
    fn register_prefers_username_then_email_then_password() {
        let error = rejected(json!({
            "password": ["Too short."],
            "email": ["Enter a valid email address."],
        }));
        assert_eq!(register_error_message(&error), "Enter a valid email address.");

        let error = rejected(json!({
            "password": ["Too short."],
            "username": ["A user with that username already exists."],
        }));
        assert_eq!(
            register_error_message(&error),
            "A user with that username already exists."
        );
    }

    #[test]
    fn register_falls_back_to_error_then_generic() {
        assert_eq!(
            register_error_message(&rejected(json!({ "error": "Closed for signups" }))),
            "Closed for signups"
        );
        assert_eq!(register_error_message(&rejected(json!({}))), REGISTER_FAILED);
        assert_eq!(
            register_error_message(&ClientError::Unauthorized),
            REGISTER_FAILED
        );
    }

    #[test]
    fn login_uses_service_error_when_present() {
        assert_eq!(
            login_error_message(&rejected(json!({ "error": "Invalid credentials" }))),
            "Invalid credentials"
        );
        assert_eq!(login_error_message(&rejected(json!(null))), LOGIN_FAILED);
    }
}
