//! Network gateway to the ward REST API.
//!
//! All HTTP concerns live here: URL mapping per collection, the bearer
//! header, the request timeout, the `{ data, message? }` response envelope,
//! and the error taxonomy the sync engine keys its halt/drop decision on.
//! Everything above this module speaks `GatewayError`, never `reqwest`.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::models::{Collection, EntityId};
use crate::util::compact_text;

/// Result alias for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Failures of a network attempt, split along the retry boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection-level failure (DNS, refused, reset). Transient.
    #[error("Network error: {0}")]
    Transport(String),

    /// The configured request timeout elapsed. Transient.
    #[error("Request timed out")]
    Timeout,

    /// The server answered 5xx. Transient.
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// The server rejected the request as unsatisfiable (4xx). Permanent;
    /// `message` is the user-facing text from the response envelope.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The response body did not match the documented envelope.
    #[error("Invalid response envelope: {0}")]
    Envelope(String),
}

impl GatewayError {
    /// Transient errors halt a drain and are retried on the next trigger;
    /// permanent rejections drop the queued entry instead.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Request capability consumed by repositories and the sync engine.
///
/// Tests inject a scripted fake; production uses [`HttpGateway`].
#[async_trait]
pub trait NetworkGateway: Send + Sync {
    /// Authoritative read of a whole collection.
    async fn fetch_list(&self, collection: Collection) -> GatewayResult<Vec<Value>>;

    /// Create an entity; returns the server-confirmed document.
    async fn create(&self, collection: Collection, payload: &Value) -> GatewayResult<Value>;

    /// Update an entity; returns the server-confirmed document.
    async fn update(
        &self,
        collection: Collection,
        id: &EntityId,
        payload: &Value,
    ) -> GatewayResult<Value>;

    /// Delete an entity.
    async fn delete(&self, collection: Collection, id: &EntityId) -> GatewayResult<()>;

    /// GET a partial-action path (e.g. `/admissions/info/<qr>`).
    async fn get_action(&self, path: &str) -> GatewayResult<Value>;

    /// POST a partial-action path (e.g. `/admissions/change-bed`).
    async fn post_action(&self, path: &str, payload: &Value) -> GatewayResult<Value>;

    /// PUT a partial-action path (e.g. `/nurses/assignments`).
    async fn put_action(&self, path: &str, payload: &Value) -> GatewayResult<Value>;

    /// PATCH a partial-action path (e.g. `/admissions/discharge/<id>`).
    async fn patch_action(&self, path: &str, payload: Option<&Value>) -> GatewayResult<Value>;
}

/// Production gateway backed by `reqwest`.
pub struct HttpGateway {
    client: reqwest::Client,
    config: ApiConfig,
}

impl HttpGateway {
    pub fn new(config: ApiConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|error| GatewayError::Transport(error.to_string()))?;
        Ok(Self { client, config })
    }

    /// Collection listing path. Beds and help alerts expose dedicated
    /// status/pending endpoints instead of the bare collection root.
    fn list_path(collection: Collection) -> &'static str {
        match collection {
            Collection::Beds => "/beds/status",
            Collection::Rooms => "/rooms",
            Collection::Islands => "/islands",
            Collection::Nurses => "/nurses",
            Collection::Patients => "/patients",
            Collection::HelpAlerts => "/help/pending",
        }
    }

    fn create_path(collection: Collection) -> &'static str {
        match collection {
            Collection::Beds => "/beds",
            Collection::Rooms => "/rooms",
            Collection::Islands => "/islands",
            Collection::Nurses => "/nurses",
            Collection::Patients => "/patients",
            Collection::HelpAlerts => "/help/trigger",
        }
    }

    fn item_path(collection: Collection, id: &EntityId) -> String {
        let segment = match collection {
            Collection::Beds => "beds",
            Collection::Rooms => "rooms",
            Collection::Islands => "islands",
            Collection::Nurses => "nurses",
            Collection::Patients => "patients",
            Collection::HelpAlerts => "help",
        };
        format!("/{segment}/{id}")
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
    ) -> GatewayResult<Value> {
        let mut request = self.client.request(method, self.config.url(path));
        if let Some(token) = self.config.token() {
            request = request.bearer_auth(token);
        }
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            let envelope = parse_envelope(&body)?;
            if let Some(message) = &envelope.message {
                tracing::debug!("Server message: {message}");
            }
            return Ok(envelope.data);
        }
        Err(error_for_status(status, &body))
    }
}

#[async_trait]
impl NetworkGateway for HttpGateway {
    async fn fetch_list(&self, collection: Collection) -> GatewayResult<Vec<Value>> {
        let data = self
            .request(Method::GET, Self::list_path(collection), None)
            .await?;
        match data {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(GatewayError::Envelope(format!(
                "expected a list for {collection}, got {other}"
            ))),
        }
    }

    async fn create(&self, collection: Collection, payload: &Value) -> GatewayResult<Value> {
        self.request(Method::POST, Self::create_path(collection), Some(payload))
            .await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &EntityId,
        payload: &Value,
    ) -> GatewayResult<Value> {
        self.request(Method::PUT, &Self::item_path(collection, id), Some(payload))
            .await
    }

    async fn delete(&self, collection: Collection, id: &EntityId) -> GatewayResult<()> {
        self.request(Method::DELETE, &Self::item_path(collection, id), None)
            .await?;
        Ok(())
    }

    async fn get_action(&self, path: &str) -> GatewayResult<Value> {
        self.request(Method::GET, path, None).await
    }

    async fn post_action(&self, path: &str, payload: &Value) -> GatewayResult<Value> {
        self.request(Method::POST, path, Some(payload)).await
    }

    async fn put_action(&self, path: &str, payload: &Value) -> GatewayResult<Value> {
        self.request(Method::PUT, path, Some(payload)).await
    }

    async fn patch_action(&self, path: &str, payload: Option<&Value>) -> GatewayResult<Value> {
        self.request(Method::PATCH, path, payload).await
    }
}

fn map_reqwest_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(error.to_string())
    }
}

/// Parsed `{ data, message? }` response envelope.
#[derive(Debug, PartialEq)]
pub(crate) struct Envelope {
    pub data: Value,
    pub message: Option<String>,
}

/// Validate a success body against the envelope contract.
///
/// A bare top-level array is accepted as a malformed-but-recoverable
/// envelope (older endpoints emit it) and normalized here, once, instead of
/// being sniffed at every call site.
pub(crate) fn parse_envelope(body: &str) -> GatewayResult<Envelope> {
    let value: Value = serde_json::from_str(body)
        .map_err(|error| GatewayError::Envelope(format!("not JSON: {error}")))?;

    match value {
        Value::Object(mut fields) => {
            let data = fields
                .remove("data")
                .ok_or_else(|| GatewayError::Envelope("missing data field".to_string()))?;
            let message = fields
                .remove("message")
                .and_then(|m| m.as_str().map(ToString::to_string));
            Ok(Envelope { data, message })
        }
        Value::Array(items) => {
            tracing::warn!("Response body is a bare array, normalizing into an envelope");
            Ok(Envelope {
                data: Value::Array(items),
                message: None,
            })
        }
        other => Err(GatewayError::Envelope(format!(
            "expected an object envelope, got {other}"
        ))),
    }
}

/// Map a non-2xx response to the error taxonomy, extracting the
/// user-facing `message` when the body carries one.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> GatewayError {
    if status.is_server_error() {
        return GatewayError::Server {
            status: status.as_u16(),
        };
    }

    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .unwrap_or_else(|| {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        });

    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_envelope_reads_data_and_message() {
        let envelope = parse_envelope(r#"{"data": [1, 2], "message": "ok"}"#).unwrap();
        assert_eq!(envelope.data, json!([1, 2]));
        assert_eq!(envelope.message.as_deref(), Some("ok"));
    }

    #[test]
    fn parse_envelope_normalizes_bare_arrays() {
        let envelope = parse_envelope(r#"[{"id": 1}]"#).unwrap();
        assert_eq!(envelope.data, json!([{ "id": 1 }]));
    }

    #[test]
    fn parse_envelope_rejects_other_shapes() {
        assert!(parse_envelope("42").is_err());
        assert!(parse_envelope("not json").is_err());
        assert!(parse_envelope(r#"{"rows": []}"#).is_err());
    }

    #[test]
    fn error_for_status_splits_transient_from_rejected() {
        let server = error_for_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(server.is_transient());

        let rejected = error_for_status(
            StatusCode::CONFLICT,
            r#"{"message": "bed has an active patient"}"#,
        );
        assert!(!rejected.is_transient());
        assert_eq!(rejected.to_string(), "bed has an active patient");
    }

    #[test]
    fn error_for_status_falls_back_to_body_text() {
        let rejected = error_for_status(StatusCode::BAD_REQUEST, "plain text failure");
        assert_eq!(rejected.to_string(), "plain text failure");

        let empty = error_for_status(StatusCode::BAD_REQUEST, "   ");
        assert_eq!(empty.to_string(), "HTTP 400");
    }

    #[test]
    fn timeouts_and_transport_errors_are_transient() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Transport("reset".to_string()).is_transient());
        assert!(GatewayError::Server { status: 502 }.is_transient());
        assert!(!GatewayError::Rejected {
            status: 422,
            message: "invalid".to_string()
        }
        .is_transient());
    }
}
