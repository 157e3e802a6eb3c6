//! Push-notification delivery.
//!
//! A [`Notifier`] delivers one message to one [`Destination`].  It never
//! retries; the update checker decides what a failed delivery means.

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;

/// A single endpoint that receives notifications.
#[derive(Clone, Eq, PartialEq)]
pub struct Destination {
    /// Full URL the message is POSTed to (an ntfy topic URL).
    pub endpoint: String,
    /// Bearer token, if the endpoint requires authentication.
    pub token: Option<String>,
}

impl Destination {
    /// An empty `token` means no authentication.
    pub fn new(endpoint: impl Into<String>, token: &str) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: (!token.is_empty()).then(|| token.to_string()),
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Connection, TLS, timeout or any other transport failure.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The endpoint answered with something other than 200 OK.
    #[error("unexpected status {0}")]
    Status(u16),
}

/// Delivers a message to one destination.
pub trait Notifier {
    fn send(&self, message: &str, destination: &Destination) -> Result<(), NotifyError>;
}

/// Posts plain-text messages to ntfy-style webhook endpoints.
pub struct NtfyNotifier {
    client: Client,
}

impl NtfyNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Notifier for NtfyNotifier {
    fn send(&self, message: &str, destination: &Destination) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .post(&destination.endpoint)
            .header(CONTENT_TYPE, "text/plain")
            .body(message.to_string());
        if let Some(token) = &destination.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}
