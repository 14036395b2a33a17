//! Registered endpoints and their per-method handler bundles.
//!
//! An [`Endpoint`] pairs one route pattern with a per-HTTP-method map of
//! [`StaticHandler`]s. The table is built once at startup and immutable
//! afterwards; the engine only ever reads it.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::Method;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::adapter::{BoxError, ServerAdapter};
use crate::validator::{
    BodyResult, BodyValidator, HeaderValidator, QueryValidator, ResponseBodyValidator, ResponseHeaderValidator,
    StateValidator, UrlParameterValidator, ValidatorResult,
};

/// Everything a business handler gets to see. Optional fields are
/// populated only when the matching validator was declared on the
/// endpoint, so handler argument shapes stay minimal.
#[derive(Debug)]
pub struct HandlerArgs<'a, C, S> {
    pub context: &'a mut C,
    pub state: &'a S,
    pub url_parameters: Option<Map<String, Value>>,
    pub query: Option<Map<String, Value>>,
    pub headers: Option<Map<String, Value>>,
    pub body: Option<Value>,
}

/// What a business handler returns: optional output (absent means 204) and
/// optional response headers (required when the endpoint declares response
/// header validators).
#[derive(Debug, Default)]
pub struct HandlerResponse {
    pub body: Option<Value>,
    pub headers: Option<Map<String, Value>>,
}

impl HandlerResponse {
    /// A bodyless response, emitted as 204.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_body(body: Value) -> Self {
        Self { body: Some(body), headers: None }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Map<String, Value>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// A business handler: pure request-data in, response-data out. Transport
/// concerns never reach it.
#[async_trait]
pub trait Handler<C, S>: Send + Sync {
    async fn invoke(&self, args: HandlerArgs<'_, C, S>) -> Result<HandlerResponse, BoxError>;
}

/// Adapts a plain closure into a [`Handler`].
///
/// The closure consumes the arguments synchronously and returns the
/// future doing the actual work; a handler that must hold borrows across
/// await points implements [`Handler`] directly instead.
pub struct FnHandler<F, Fut> {
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

pub fn handler_fn<C, S, F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: for<'a> Fn(HandlerArgs<'a, C, S>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerResponse, BoxError>> + Send,
{
    FnHandler { f, _phantom: PhantomData }
}

#[async_trait]
impl<C, S, F, Fut> Handler<C, S> for FnHandler<F, Fut>
where
    C: Send,
    S: Sync,
    F: for<'a> Fn(HandlerArgs<'a, C, S>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerResponse, BoxError>> + Send,
{
    async fn invoke(&self, args: HandlerArgs<'_, C, S>) -> Result<HandlerResponse, BoxError> {
        (self.f)(args).await
    }
}

/// Immutable per-method handler bundle: the validators for every pipeline
/// stage plus the business handler itself.
pub struct StaticHandler<A: ServerAdapter, S> {
    pub(crate) state_validator: StateValidator<A::Context, S>,
    pub(crate) url_parameters: Option<Vec<(String, UrlParameterValidator)>>,
    pub(crate) query: Option<Vec<(String, QueryValidator)>>,
    pub(crate) headers: Option<Vec<(String, HeaderValidator)>>,
    pub(crate) body: Option<BodyValidator<A::RequestBody>>,
    pub(crate) response_headers: Option<Vec<(String, ResponseHeaderValidator)>>,
    pub(crate) response_body: ResponseBodyValidator,
    pub(crate) handler: Box<dyn Handler<A::Context, S>>,
}

impl<A: ServerAdapter, S> StaticHandler<A, S> {
    pub fn builder() -> StaticHandlerBuilder<A, S> {
        StaticHandlerBuilder::new()
    }
}

impl<A: ServerAdapter, S> std::fmt::Debug for StaticHandler<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticHandler")
            .field("url_parameters", &self.url_parameters.as_ref().map(Vec::len))
            .field("query", &self.query.as_ref().map(Vec::len))
            .field("headers", &self.headers.as_ref().map(Vec::len))
            .field("body", &self.body.is_some())
            .field("response_headers", &self.response_headers.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum EndpointBuildError {
    #[error("state validator must be set")]
    MissingStateValidator,
    #[error("handler must be set")]
    MissingHandler,
}

/// Accumulates the pieces of a [`StaticHandler`].
///
/// The response body validator defaults to
/// [`crate::validator::json_response`] when not set; state validator and
/// handler are mandatory.
pub struct StaticHandlerBuilder<A: ServerAdapter, S> {
    state_validator: Option<StateValidator<A::Context, S>>,
    url_parameters: Option<Vec<(String, UrlParameterValidator)>>,
    query: Option<Vec<(String, QueryValidator)>>,
    headers: Option<Vec<(String, HeaderValidator)>>,
    body: Option<BodyValidator<A::RequestBody>>,
    response_headers: Option<Vec<(String, ResponseHeaderValidator)>>,
    response_body: Option<ResponseBodyValidator>,
    handler: Option<Box<dyn Handler<A::Context, S>>>,
}

impl<A: ServerAdapter, S> StaticHandlerBuilder<A, S> {
    fn new() -> Self {
        Self {
            state_validator: None,
            url_parameters: None,
            query: None,
            headers: None,
            body: None,
            response_headers: None,
            response_body: None,
            handler: None,
        }
    }

    pub fn state<F>(mut self, validator: F) -> Self
    where
        F: for<'a> Fn(&'a A::Context) -> BoxFuture<'a, ValidatorResult<S>> + Send + Sync + 'static,
    {
        self.state_validator = Some(Arc::new(validator));
        self
    }

    /// Shares an already-built state validator between methods, so 405
    /// disclosure filtering can group them by identity.
    pub fn state_shared(mut self, validator: StateValidator<A::Context, S>) -> Self {
        self.state_validator = Some(validator);
        self
    }

    /// State validation that always succeeds with a clone of `value`.
    pub fn state_value(self, value: S) -> Self
    where
        S: Clone + Send + Sync + 'static,
    {
        self.state(move |_context| futures::future::ready(ValidatorResult::Valid(value.clone())).boxed())
    }

    pub fn url_parameter(
        mut self,
        name: impl Into<String>,
        validator: impl Fn(&str) -> ValidatorResult<Value> + Send + Sync + 'static,
    ) -> Self {
        insert_keyed(self.url_parameters.get_or_insert_default(), name.into(), Box::new(validator));
        self
    }

    pub fn query_parameter(
        mut self,
        name: impl Into<String>,
        validator: impl Fn(Option<&crate::request::QueryValue>) -> ValidatorResult<Value> + Send + Sync + 'static,
    ) -> Self {
        insert_keyed(self.query.get_or_insert_default(), name.into(), Box::new(validator));
        self
    }

    pub fn request_header(
        mut self,
        name: impl Into<String>,
        validator: impl Fn(Option<&crate::request::HeaderInput>) -> ValidatorResult<Value> + Send + Sync + 'static,
    ) -> Self {
        insert_keyed(self.headers.get_or_insert_default(), name.into().to_ascii_lowercase(), Box::new(validator));
        self
    }

    pub fn body<F>(mut self, validator: F) -> Self
    where
        F: Fn(Option<String>, Option<A::RequestBody>) -> BoxFuture<'static, BodyResult> + Send + Sync + 'static,
    {
        self.body = Some(Box::new(validator));
        self
    }

    pub fn response_header(
        mut self,
        name: impl Into<String>,
        validator: impl Fn(&Value) -> ValidatorResult<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        insert_keyed(self.response_headers.get_or_insert_default(), name.into(), Box::new(validator));
        self
    }

    pub fn response_body(
        mut self,
        validator: impl Fn(Option<Value>) -> ValidatorResult<Option<crate::body::ResponsePayload>> + Send + Sync + 'static,
    ) -> Self {
        self.response_body = Some(Box::new(validator));
        self
    }

    pub fn handler(mut self, handler: impl Handler<A::Context, S> + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<StaticHandler<A, S>, EndpointBuildError> {
        Ok(StaticHandler {
            state_validator: self.state_validator.ok_or(EndpointBuildError::MissingStateValidator)?,
            url_parameters: self.url_parameters,
            query: self.query,
            headers: self.headers,
            body: self.body,
            response_headers: self.response_headers,
            response_body: self.response_body.unwrap_or_else(crate::validator::json_response),
            handler: self.handler.ok_or(EndpointBuildError::MissingHandler)?,
        })
    }
}

/// Replaces an existing key, otherwise appends; declaration order is
/// preserved so error aggregation and event payloads stay deterministic.
fn insert_keyed<V>(entries: &mut Vec<(String, V)>, name: String, validator: V) {
    match entries.iter_mut().find(|(existing, _)| *existing == name) {
        Some((_, slot)) => *slot = validator,
        None => entries.push((name, validator)),
    }
}

/// One registered endpoint: a route pattern plus its per-method handlers.
pub struct Endpoint<A: ServerAdapter, S> {
    pattern: String,
    handlers: Vec<(Method, StaticHandler<A, S>)>,
}

impl<A: ServerAdapter, S> Endpoint<A, S> {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), handlers: Vec::new() }
    }

    #[must_use]
    pub fn method(mut self, method: Method, handler: StaticHandler<A, S>) -> Self {
        match self.handlers.iter_mut().find(|(existing, _)| *existing == method) {
            Some((_, slot)) => *slot = handler,
            None => self.handlers.push((method, handler)),
        }
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self, method: &Method) -> Option<&StaticHandler<A, S>> {
        self.handlers.iter().find(|(m, _)| m == method).map(|(_, handler)| handler)
    }

    /// Supported methods in registration order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.handlers.iter().map(|(method, _)| method)
    }

    pub(crate) fn handlers(&self) -> &[(Method, StaticHandler<A, S>)] {
        &self.handlers
    }
}

impl<A: ServerAdapter, S> std::fmt::Debug for Endpoint<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("pattern", &self.pattern)
            .field("methods", &self.handlers.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>())
            .finish()
    }
}
