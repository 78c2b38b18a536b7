//! HTTP response handling and the storefront API envelope.

use crate::FetchError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code.
    pub status: u16,
    /// The response headers.
    pub headers: HashMap<String, String>,
    /// The response body.
    pub body: Vec<u8>,
}

impl Response {
    /// Create a new response.
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Check if the response was successful (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String, FetchError> {
        String::from_utf8(self.body.clone())
            .map_err(|e| FetchError::ParseError(format!("Invalid UTF-8: {}", e)))
    }

    /// Parse the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::ParseError(e.to_string()))
    }

    /// Get a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        let key_lower = key.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == key_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Decode the storefront envelope and extract its payload.
    ///
    /// Non-2xx responses that still carry an envelope surface the API's own
    /// message; anything else becomes an `HttpError`.
    pub fn envelope<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        match self.json::<ApiEnvelope<T>>() {
            Ok(envelope) if self.is_success() => envelope.into_data(),
            Ok(envelope) => Err(FetchError::HttpError {
                status: self.status,
                message: envelope
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            }),
            Err(e) if self.is_success() => Err(e),
            Err(_) => Err(FetchError::HttpError {
                status: self.status,
                message: self.text().unwrap_or_else(|_| "Unknown error".to_string()),
            }),
        }
    }
}

/// Standard body of every storefront API response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl<T> ApiEnvelope<T> {
    /// Successful envelope carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            errors: None,
        }
    }

    /// Extract the payload.
    ///
    /// `success: false` or a missing `data` field is a failure even when the
    /// transport reported 200.
    pub fn into_data(self) -> Result<T, FetchError> {
        if !self.success {
            let errors = self.error_messages();
            return Err(FetchError::Rejected {
                message: self
                    .message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
                errors,
            });
        }
        self.data.ok_or(FetchError::MissingData)
    }

    /// Flatten the `errors` field into display strings.
    ///
    /// Accepts a list of strings or a `{field: [messages]}` map.
    pub fn error_messages(&self) -> Vec<String> {
        fn collect(value: &serde_json::Value, prefix: Option<&str>, out: &mut Vec<String>) {
            match value {
                serde_json::Value::String(s) => match prefix {
                    Some(field) => out.push(format!("{field}: {s}")),
                    None => out.push(s.clone()),
                },
                serde_json::Value::Array(items) => {
                    for item in items {
                        collect(item, prefix, out);
                    }
                }
                serde_json::Value::Object(map) => {
                    for (field, item) in map {
                        collect(item, Some(field), out);
                    }
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        if let Some(errors) = &self.errors {
            collect(errors, None, &mut out);
        }
        out
    }
}
