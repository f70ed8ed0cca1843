use serde_json::Value;

/// Body of a non-success response.
///
/// The service answers failures either with `{"error": "..."}` or, for
/// registration, with per-field lists such as `{"username": ["taken"]}`.
/// Anything that is not JSON is kept as a plain string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBody(Value);

impl ErrorBody {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self(Value::Null);
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => Self(value),
            Err(_) => Self(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// The service's general `error` message, if it sent a non-blank one.
    pub fn message(&self) -> Option<&str> {
        self.field("error")
    }

    /// First message for `name`. Accepts both `"msg"` and `["msg", ...]`.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = self.0.get(name)?;
        let text = match value {
            Value::String(s) => s.as_str(),
            Value::Array(items) => items.first()?.as_str()?,
            _ => return None,
        };
        (!text.trim().is_empty()).then_some(text)
    }

    /// First field in `names` (in order) that carries a message.
    pub fn first_of(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.field(name))
    }
}

impl From<Value> for ErrorBody {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_lists_yield_their_first_message() {
        let body = ErrorBody::from(json!({
            "email": ["Enter a valid email address.", "Second"],
            "password": ["This password is too short."]
        }));

        assert_eq!(body.field("email"), Some("Enter a valid email address."));
        assert_eq!(
            body.first_of(&["username", "email", "password"]),
            Some("Enter a valid email address.")
        );
        assert_eq!(body.message(), None);
    }

    #[test]
    fn blank_and_non_string_entries_are_skipped() {
        let body = ErrorBody::from(json!({ "username": [""], "email": [42], "error": "Invalid credentials" }));
        assert_eq!(body.first_of(&["username", "email", "error"]), Some("Invalid credentials"));
    }

    #[test]
    fn non_json_bodies_are_kept_verbatim() {
        let body = ErrorBody::from_bytes(b"<html>502 Bad Gateway</html>");
        assert_eq!(body.raw(), &json!("<html>502 Bad Gateway</html>"));
        assert_eq!(body.message(), None);

        assert_eq!(ErrorBody::from_bytes(b"").raw(), &Value::Null);
    }
}
