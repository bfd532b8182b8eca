//! Request/response bearers.
//!
//! Handlers receive an [`Incoming`] and produce an [`Outgoing`]; only
//! `server.rs` knows how to build one from an axum request or turn one
//! into an axum response.

use std::collections::HashMap;
use std::pin::Pin;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use http::{header, HeaderMap, HeaderValue, StatusCode};

use crate::errors::AssetError;
use crate::path::AssetType;
use crate::sink::ByteStream;

/// Error type carried by request body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A request body: chunks as they arrive from the client.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// Parsed inbound request.
pub struct Incoming {
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Option<BodyStream>,
}

impl Incoming {
    pub fn new(params: HashMap<String, String>, headers: HeaderMap) -> Self {
        Self {
            params,
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: BodyStream) -> Self {
        self.body = Some(body);
        self
    }

    /// Route parameter `name`, if present and non-empty.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Route parameter `name`, failing with `MissingParameter` if absent
    /// or empty.
    pub fn require(&self, name: &'static str) -> Result<&str, AssetError> {
        self.param(name).ok_or(AssetError::MissingParameter(name))
    }

    /// The `type` parameter, parsed.
    pub fn asset_type(&self) -> Result<AssetType, AssetError> {
        self.require("type")?.parse()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `Content-Type` header as a string.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Hand over the request body.  A second call yields an error.
    pub fn take_body(&mut self) -> Result<BodyStream, AssetError> {
        self.body
            .take()
            .ok_or_else(|| AssetError::MalformedBody("request has no body".to_string()))
    }
}

/// Response payload.
pub enum OutgoingBody {
    Empty,
    Json(serde_json::Value),
    Stream(ByteStream),
}

/// Outbound response metadata plus payload.
pub struct Outgoing {
    pub status: StatusCode,
    pub location: Option<String>,
    pub mime_type: Option<String>,
    pub cache_control: Option<&'static str>,
    pub body: OutgoingBody,
}

impl Outgoing {
    fn new(status: StatusCode, body: OutgoingBody) -> Self {
        Self {
            status,
            location: None,
            mime_type: None,
            cache_control: None,
            body,
        }
    }

    /// `{"success": true, "url": url}`.
    pub fn success(status: StatusCode, url: String) -> Self {
        Self::new(
            status,
            OutgoingBody::Json(serde_json::json!({ "success": true, "url": url })),
        )
    }

    /// Failure outcome that is not an error condition (alias lookup miss).
    pub fn not_found(message: String) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            OutgoingBody::Json(serde_json::json!({ "success": false, "error": message })),
        )
    }

    /// 302 redirect.
    pub fn redirect(location: String) -> Self {
        let mut out = Self::new(StatusCode::FOUND, OutgoingBody::Empty);
        out.location = Some(location);
        out
    }

    /// 200 with an arbitrary JSON document.
    pub fn json(value: serde_json::Value) -> Self {
        Self::new(StatusCode::OK, OutgoingBody::Json(value))
    }

    /// 200 streaming stored bytes.
    pub fn stream(mime_type: &str, body: ByteStream) -> Self {
        let mut out = Self::new(StatusCode::OK, OutgoingBody::Stream(body));
        out.mime_type = Some(mime_type.to_string());
        out
    }

    pub fn with_cache_control(mut self, value: &'static str) -> Self {
        self.cache_control = Some(value);
        self
    }

    /// Whether the outcome reports success.
    pub fn is_success(&self) -> bool {
        self.status.is_success() || self.status.is_redirection()
    }
}

impl IntoResponse for Outgoing {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            OutgoingBody::Empty => self.status.into_response(),
            OutgoingBody::Json(value) => (self.status, axum::Json(value)).into_response(),
            OutgoingBody::Stream(stream) => {
                (self.status, axum::body::Body::from_stream(stream)).into_response()
            }
        };

        let headers = response.headers_mut();
        if let Some(location) = self.location.and_then(|l| HeaderValue::try_from(l).ok()) {
            headers.insert(header::LOCATION, location);
        }
        if let Some(mime) = self.mime_type.and_then(|m| HeaderValue::try_from(m).ok()) {
            headers.insert(header::CONTENT_TYPE, mime);
        }
        if let Some(cache_control) = self.cache_control {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(cache_control),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(pairs: &[(&str, &str)]) -> Incoming {
        let params = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Incoming::new(params, HeaderMap::new())
    }

    #[test]
    fn test_require_rejects_missing_and_empty() {
        let req = incoming(&[("org", "acme"), ("name", "")]);
        assert_eq!(req.require("org").unwrap(), "acme");
        assert!(matches!(
            req.require("name"),
            Err(AssetError::MissingParameter("name"))
        ));
        assert!(matches!(
            req.require("alias"),
            Err(AssetError::MissingParameter("alias"))
        ));
    }

    #[test]
    fn test_asset_type_param() {
        assert_eq!(
            incoming(&[("type", "css")]).asset_type().unwrap(),
            AssetType::Css
        );
        assert!(matches!(
            incoming(&[("type", "wasm")]).asset_type(),
            Err(AssetError::InvalidIdentifier { field: "type", .. })
        ));
    }

    #[test]
    fn test_take_body_once() {
        let mut req = incoming(&[]).with_body(Box::pin(futures::stream::empty()));
        assert!(req.take_body().is_ok());
        assert!(matches!(req.take_body(), Err(AssetError::MalformedBody(_))));
    }

    #[test]
    fn test_redirect_sets_location() {
        let response = Outgoing::redirect("http://localhost:4001/pkg/a".into()).into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "http://localhost:4001/pkg/a"
        );
    }

    #[tokio::test]
    async fn test_success_body() {
        let out = Outgoing::success(StatusCode::OK, "http://x/a".into());
        assert!(out.is_success());
        let response = out.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "url": "http://x/a"}));
    }

    #[test]
    fn test_not_found_is_not_success() {
        assert!(!Outgoing::not_found("nope".into()).is_success());
    }
}
