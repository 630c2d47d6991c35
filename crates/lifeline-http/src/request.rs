//! Requests the coordinator can send more than once.
//!
//! A `reqwest::RequestBuilder` is consumed by sending it and cannot be
//! cloned once it carries a streaming body, so the coordinator keeps its
//! own description of the call and rebuilds the reqwest request for every
//! attempt.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::HttpError;

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// One field of a multipart form.
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

/// A multipart form whose parts are held in memory so it can be resent.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<FormPart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        });
        self
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub(crate) fn to_form(&self) -> Result<reqwest::multipart::Form, HttpError> {
        let mut form = reqwest::multipart::Form::new();
        for part in &self.parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let part = reqwest::multipart::Part::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str(mime)
                        .map_err(|e| HttpError::InvalidRequest(format!("mime {mime:?}: {e}")))?;
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartForm),
}

// ---------------------------------------------------------------------------
// RetryMarker
// ---------------------------------------------------------------------------

/// Which recoveries a request has already used. Each happens at most once
/// per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryMarker {
    /// Set once a 401 has triggered a refresh for this request.
    pub auth_retried: bool,
    /// Set once a network failure has triggered a resend.
    pub network_retried: bool,
}

// ---------------------------------------------------------------------------
// ApiRequest
// ---------------------------------------------------------------------------

/// A request relative to the configured base URL.
///
/// ```rust
/// use lifeline_http::ApiRequest;
/// use serde_json::json;
///
/// let request = ApiRequest::put("/api/users/me")
///     .json(&json!({ "bio": "hello" }))
///     .expect("serializable");
/// assert_eq!(request.path(), "/api/users/me");
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: RequestBody,
    timeout: Option<Duration>,
    pub(crate) marker: RetryMarker,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
            marker: RetryMarker::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets a JSON body.
    ///
    /// # Errors
    /// [`HttpError::Decode`] if `body` does not serialize.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Overrides the configured default timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn marker(&self) -> RetryMarker {
        self.marker
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Builds the reqwest request for one attempt.
    pub(crate) fn build(
        &self,
        client: &reqwest::Client,
        url: String,
        timeout: Duration,
        bearer: Option<&str>,
    ) -> Result<reqwest::RequestBuilder, HttpError> {
        let mut builder = client.request(self.method.clone(), url).timeout(timeout);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };
        Ok(builder)
    }
}

// ---------------------------------------------------------------------------
// ApiResponse
// ---------------------------------------------------------------------------

/// A successful response with its body read into memory.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body.
    ///
    /// # Errors
    /// [`HttpError::Decode`] if the body is not the expected JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_builders_set_method_and_path() {
        let request = ApiRequest::delete("/api/users/favorites/7");
        assert_eq!(request.method(), &Method::DELETE);
        assert_eq!(request.path(), "/api/users/favorites/7");
        assert_eq!(request.marker(), RetryMarker::default());
        assert!(matches!(request.body(), RequestBody::Empty));
    }

    #[test]
    fn test_json_body_is_stored_as_value() {
        let request = ApiRequest::post("/api/items")
            .json(&json!({ "title": "lamp" }))
            .unwrap();
        match request.body() {
            RequestBody::Json(value) => assert_eq!(value["title"], "lamp"),
            other => panic!("expected JSON body, got {other:?}"),
        }
    }

    #[test]
    fn test_multipart_form_builds_with_valid_mime() {
        let form = MultipartForm::new()
            .text("title", "lamp")
            .file("avatar", "me.png", "image/png", vec![1, 2, 3]);
        assert_eq!(form.parts().len(), 2);
        assert!(form.to_form().is_ok());
    }

    #[test]
    fn test_multipart_form_rejects_bad_mime() {
        let form = MultipartForm::new().file("avatar", "me.png", "not a mime", vec![]);
        assert!(matches!(form.to_form(), Err(HttpError::InvalidRequest(_))));
    }

    #[test]
    fn test_response_json_decodes_body() {
        #[derive(Deserialize)]
        struct Item {
            id: u32,
        }
        let response = ApiResponse::new(200, br#"{"id":7}"#.to_vec());
        let item: Item = response.json().unwrap();
        assert_eq!(item.id, 7);
        assert!(response.json::<Vec<u32>>().is_err());
    }
}
