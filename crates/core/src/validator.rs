//! The validator result protocol shared by every validation stage.
//!
//! Every pluggable validator — state, URL parameter, query, header, body and
//! response — reports its outcome through [`ValidatorResult`]. The engine
//! branches on this one sum type and nothing else: expected validation
//! outcomes are data, never errors, and a validator that wants a specific
//! wire response returns [`ValidatorResult::Protocol`] which is honored
//! verbatim.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use http_body::Body;
use http_body_util::BodyExt;
use serde_json::Value;

use crate::adapter::BoxError;
use crate::body::{ResponseContent, ResponsePayload};
use crate::request::{HeaderInput, QueryValue};

/// Outcome of one validation step.
#[derive(Debug)]
pub enum ValidatorResult<T> {
    /// Validation succeeded, carrying the validated data.
    Valid(T),
    /// Validation failed; the stage decides the status code.
    Invalid(ValidationError),
    /// Validation failed with an explicit wire response, honored verbatim.
    Protocol(ProtocolError),
}

impl<T> ValidatorResult<T> {
    /// Maps the validated data, leaving failures untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ValidatorResult<U> {
        match self {
            Self::Valid(data) => ValidatorResult::Valid(f(data)),
            Self::Invalid(error) => ValidatorResult::Invalid(error),
            Self::Protocol(error) => ValidatorResult::Protocol(error),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// A failed validation with a human-readable message and optional
/// machine-readable detail. Reported through events only; never written to
/// the response body.
#[derive(Debug, Clone)]
pub struct ValidationError {
    message: String,
    detail: Option<Value>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), detail: None }
    }

    pub fn with_detail(message: impl Into<String>, detail: Value) -> Self {
        Self { message: message.into(), detail: Some(detail) }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// An explicit status code and optional body requested by a validator or
/// handler. Always forwarded to the wire unchanged.
#[derive(Debug, Clone)]
pub struct ProtocolError {
    pub status_code: StatusCode,
    pub body: Option<String>,
}

impl ProtocolError {
    pub fn new(status_code: StatusCode) -> Self {
        Self { status_code, body: None }
    }

    pub fn with_body(status_code: StatusCode, body: impl Into<String>) -> Self {
        Self { status_code, body: Some(body.into()) }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error {}", self.status_code)
    }
}

/// The non-success half of [`ValidatorResult`], as carried by events.
#[derive(Debug, Clone)]
pub enum ValidationFailure {
    Error(ValidationError),
    Protocol(ProtocolError),
}

/// A named validation failure, used when a keyed stage (URL parameters,
/// query, headers, response headers) aggregates per-key errors.
#[derive(Debug, Clone)]
pub struct ParameterError {
    pub name: String,
    pub failure: ValidationFailure,
}

impl ParameterError {
    pub fn new(name: impl Into<String>, error: ValidationError) -> Self {
        Self { name: name.into(), failure: ValidationFailure::Error(error) }
    }

    pub fn protocol(name: impl Into<String>, error: ProtocolError) -> Self {
        Self { name: name.into(), failure: ValidationFailure::Protocol(error) }
    }
}

/// Outcome of a body validator. Extends the common result shape with the
/// content-type mismatch signal, which maps to its own event and status.
#[derive(Debug)]
pub enum BodyResult {
    Valid(Value),
    UnsupportedContentType { content_type: Option<String> },
    Invalid(ValidationError),
    Protocol(ProtocolError),
}

/// Validates one raw URL path capture.
pub type UrlParameterValidator = Box<dyn Fn(&str) -> ValidatorResult<Value> + Send + Sync>;

/// Validates one query parameter; sees `None` when the key is absent.
pub type QueryValidator = Box<dyn Fn(Option<&QueryValue>) -> ValidatorResult<Value> + Send + Sync>;

/// Validates one request header; sees `None` when the header is absent.
pub type HeaderValidator = Box<dyn Fn(Option<&HeaderInput>) -> ValidatorResult<Value> + Send + Sync>;

/// Validates one response header value produced by the handler; `None`
/// output means the header is skipped on the wire.
pub type ResponseHeaderValidator = Box<dyn Fn(&Value) -> ValidatorResult<Option<String>> + Send + Sync>;

/// Validates the handler's returned body and turns it into the wire
/// payload; `None` output means a bodyless 204 response.
pub type ResponseBodyValidator =
    Box<dyn Fn(Option<Value>) -> ValidatorResult<Option<ResponsePayload>> + Send + Sync>;

/// Validates the adapter context and produces the request state. Async so
/// authorization may consult external systems.
pub type StateValidator<C, S> =
    Arc<dyn for<'a> Fn(&'a C) -> BoxFuture<'a, ValidatorResult<S>> + Send + Sync>;

/// Validates the request body stream against the raw `content-type` value.
/// Receives ownership of the stream and must consume or drop it.
pub type BodyValidator<B> =
    Box<dyn Fn(Option<String>, Option<B>) -> BoxFuture<'static, BodyResult> + Send + Sync>;

/// Accepts any capture as a JSON string.
pub fn string_parameter() -> UrlParameterValidator {
    Box::new(|raw| ValidatorResult::Valid(Value::String(raw.to_owned())))
}

/// Requires the capture to parse as an unsigned integer.
pub fn u64_parameter() -> UrlParameterValidator {
    Box::new(|raw| match raw.parse::<u64>() {
        Ok(value) => ValidatorResult::Valid(Value::from(value)),
        Err(e) => ValidatorResult::Invalid(ValidationError::new(format!("expected an unsigned integer: {e}"))),
    })
}

/// Requires the query parameter to be present with a single value.
pub fn required_query() -> QueryValidator {
    Box::new(|value| match value {
        Some(QueryValue::One(value)) => ValidatorResult::Valid(Value::String(value.clone())),
        Some(QueryValue::Many(_)) => {
            ValidatorResult::Invalid(ValidationError::new("expected a single value, got several"))
        }
        None => ValidatorResult::Invalid(ValidationError::new("required query parameter is missing")),
    })
}

/// Accepts a missing query parameter as JSON null, a present one as string
/// or array of strings.
pub fn optional_query() -> QueryValidator {
    Box::new(|value| {
        ValidatorResult::Valid(match value {
            None => Value::Null,
            Some(QueryValue::One(value)) => Value::String(value.clone()),
            Some(QueryValue::Many(values)) => {
                Value::Array(values.iter().map(|v| Value::String(v.clone())).collect())
            }
        })
    })
}

/// Requires the header to be present; multiple values collapse to the first.
pub fn required_header() -> HeaderValidator {
    Box::new(|value| match value {
        Some(input) => ValidatorResult::Valid(Value::String(input.first().to_owned())),
        None => ValidatorResult::Invalid(ValidationError::new("required header is missing")),
    })
}

/// Response body validator for plain text output with a fixed content type.
/// The handler must return a JSON string (or nothing for a 204).
pub fn text_response(content_type: impl Into<String>) -> ResponseBodyValidator {
    let content_type = content_type.into();
    Box::new(move |body| match body {
        None => ValidatorResult::Valid(None),
        Some(Value::String(text)) => {
            ValidatorResult::Valid(Some(ResponsePayload::new(content_type.clone(), ResponseContent::Text(text))))
        }
        Some(other) => ValidatorResult::Invalid(ValidationError::with_detail("expected a text body", other)),
    })
}

/// Response body validator serializing any JSON value as
/// `application/json`.
pub fn json_response() -> ResponseBodyValidator {
    Box::new(|body| match body {
        None => ValidatorResult::Valid(None),
        Some(value) => match serde_json::to_string(&value) {
            Ok(text) => ValidatorResult::Valid(Some(ResponsePayload::new(
                mime::APPLICATION_JSON.to_string(),
                ResponseContent::Text(text),
            ))),
            Err(e) => ValidatorResult::Invalid(ValidationError::new(format!("serializing response body: {e}"))),
        },
    })
}

/// Body validator requiring `application/json` and a well-formed JSON
/// document. A destroyed or erroring stream surfaces as a validation
/// failure, not a hang.
pub fn json_body<B>() -> BodyValidator<B>
where
    B: Body<Data = Bytes, Error = BoxError> + Send + 'static,
{
    Box::new(|content_type, body| {
        async move {
            let is_json = content_type
                .as_deref()
                .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with(mime::APPLICATION_JSON.essence_str()));
            if !is_json {
                return BodyResult::UnsupportedContentType { content_type };
            }
            let Some(body) = body else {
                return BodyResult::Invalid(ValidationError::new("request body is missing"));
            };
            let bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => return BodyResult::Invalid(ValidationError::new(format!("reading request body: {e}"))),
            };
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => BodyResult::Valid(value),
                Err(e) => BodyResult::Invalid(ValidationError::new(format!("invalid json body: {e}"))),
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_parameter_accepts_digits() {
        assert!(matches!(u64_parameter()("42"), ValidatorResult::Valid(Value::Number(_))));
    }

    #[test]
    fn u64_parameter_rejects_text() {
        assert!(matches!(u64_parameter()("x42"), ValidatorResult::Invalid(_)));
    }

    #[test]
    fn required_query_rejects_missing_and_repeated() {
        let validator = required_query();
        assert!(matches!(validator(None), ValidatorResult::Invalid(_)));
        let many = QueryValue::Many(vec!["a".to_owned(), "b".to_owned()]);
        assert!(matches!(validator(Some(&many)), ValidatorResult::Invalid(_)));
        let one = QueryValue::One("a".to_owned());
        assert!(matches!(validator(Some(&one)), ValidatorResult::Valid(Value::String(s)) if s == "a"));
    }

    #[test]
    fn text_response_passes_strings_through() {
        let validator = text_response("text/plain");
        match validator(Some(Value::String("hi".to_owned()))) {
            ValidatorResult::Valid(Some(payload)) => {
                assert_eq!(payload.content_type, "text/plain");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(validator(None), ValidatorResult::Valid(None)));
        assert!(matches!(validator(Some(Value::Bool(true))), ValidatorResult::Invalid(_)));
    }

    type TestBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

    fn full(bytes: &'static [u8]) -> TestBody {
        http_body_util::Full::new(Bytes::from_static(bytes))
            .map_err(|never| match never {})
            .boxed_unsync()
    }

    #[tokio::test]
    async fn json_body_rejects_wrong_content_type() {
        let validator = json_body::<TestBody>();
        let result = validator(Some("text/plain".to_owned()), Some(full(b"{}"))).await;
        assert!(matches!(result, BodyResult::UnsupportedContentType { .. }));
    }

    #[tokio::test]
    async fn json_body_parses_document() {
        let validator = json_body::<TestBody>();
        let result = validator(Some("application/json; charset=utf-8".to_owned()), Some(full(b"{\"a\":1}"))).await;
        match result {
            BodyResult::Valid(value) => assert_eq!(value["a"], 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
