//! The request-processing pipeline.
//!
//! [`RequestEngine::handle_request`] drives the full lifecycle of one
//! inbound request: route matching, method dispatch, the five validation
//! stages, handler invocation, response validation and emission. Every
//! short-circuit exit maps to one event and one status code; internal
//! failures funnel through a single outermost catch-all that still
//! attempts a 500 response.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use http::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::adapter::{ResponseControl, ServerAdapter};
use crate::body::{ResponseContent, ResponsePayload};
use crate::dispatch::{MethodDispatch, disclosable_methods, dispatch};
use crate::endpoint::{Endpoint, HandlerArgs};
use crate::error::EngineError;
use crate::events::{Event, EventBus, EventListener, EventScope, RouteInfo};
use crate::request::RequestUrl;
use crate::router::{PathRouter, RawPathParams, RouterBuildError};
use crate::validator::{
    BodyResult, ParameterError, UrlParameterValidator, ValidationError, ValidationFailure, ValidatorResult,
};

/// The immutable request-processing engine. Holds no per-request state, so
/// one instance serves arbitrarily many concurrent requests.
pub struct RequestEngine<A: ServerAdapter, S> {
    adapter: A,
    endpoints: Vec<Endpoint<A, S>>,
    router: PathRouter,
    events: EventBus<A, S>,
}

impl<A: ServerAdapter, S> std::fmt::Debug for RequestEngine<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("endpoints", &self.endpoints)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Accumulates endpoints and event listeners, then freezes them into a
/// [`RequestEngine`].
pub struct EngineBuilder<A: ServerAdapter, S> {
    adapter: A,
    endpoints: Vec<Endpoint<A, S>>,
    listeners: Vec<Box<dyn EventListener<A, S>>>,
}

impl<A: ServerAdapter, S> EngineBuilder<A, S> {
    pub fn new(adapter: A) -> Self {
        Self { adapter, endpoints: Vec::new(), listeners: Vec::new() }
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint<A, S>) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: impl EventListener<A, S> + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Compiles the route table. Pattern conflicts surface here, never at
    /// request time.
    pub fn build(self) -> Result<RequestEngine<A, S>, RouterBuildError> {
        let router = PathRouter::new(self.endpoints.iter().map(|endpoint| endpoint.pattern().to_owned()))?;
        Ok(RequestEngine {
            adapter: self.adapter,
            endpoints: self.endpoints,
            router,
            events: EventBus::new(self.listeners),
        })
    }
}

impl<A: ServerAdapter, S> RequestEngine<A, S> {
    pub fn builder(adapter: A) -> EngineBuilder<A, S> {
        EngineBuilder::new(adapter)
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Processes one inbound request to completion. Never fails from the
    /// caller's point of view: every internal error still produces a
    /// response attempt and an `exception` event.
    pub async fn handle_request(&self, context: &mut A::Context) {
        let control = ResponseControl::new();
        let outcome = AssertUnwindSafe(self.run(context, &control)).catch_unwind().await;
        let outcome_error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => EngineError::panic(panic),
        };
        error!(cause = %outcome_error, "request pipeline failed");
        self.emit(context, &control, &Event::Exception { error: &outcome_error });
        self.respond(context, &control, StatusCode::INTERNAL_SERVER_ERROR, None, Some(&outcome_error)).await;
    }

    async fn run(&self, context: &mut A::Context, control: &ResponseControl) -> Result<(), EngineError> {
        // Stage 0: routing. URL objects and bare path strings normalize
        // through the same RequestUrl view.
        let url = self.adapter.request_url(context);
        let Some(route_match) = url.as_ref().and_then(|u| self.router.lookup(u.path())) else {
            let path = url.as_ref().map_or("", RequestUrl::path);
            debug!(path, "no matching endpoint");
            self.emit(context, control, &Event::InvalidUrl { path });
            self.respond(context, control, StatusCode::NOT_FOUND, None, None).await;
            return Ok(());
        };
        let endpoint = &self.endpoints[route_match.index];
        let route = RouteInfo { pattern: endpoint.pattern(), params: &route_match.params };

        // Stage 1: method dispatch, HEAD falling back to GET.
        let method = self.adapter.request_method(context);
        let (handler, head_request) = match dispatch(endpoint, &method) {
            MethodDispatch::Found { handler, head_request } => (handler, head_request),
            MethodDispatch::InvalidMethod { allowed } => {
                let disclosed = disclosable_methods(endpoint, context).await;
                self.emit(
                    context,
                    control,
                    &Event::InvalidMethod { route, method: &method, allowed: &allowed, disclosed: &disclosed },
                );
                if disclosed.is_empty() {
                    // an endpoint whose every method is hidden must look
                    // like it does not exist at all
                    self.respond(context, control, StatusCode::NOT_FOUND, None, None).await;
                } else if !control.status_code_suppressed() {
                    self.adapter.set_header(context, "allow", &join_methods(&disclosed));
                    self.adapter.set_status_code(context, StatusCode::METHOD_NOT_ALLOWED, false, None);
                }
                return Ok(());
            }
        };

        // Stage 2: context/state validation.
        let state = match (handler.state_validator)(context).await {
            ValidatorResult::Valid(state) => state,
            ValidatorResult::Invalid(e) => {
                let failure = ValidationFailure::Error(e);
                self.emit(context, control, &Event::InvalidState { route, failure: &failure });
                self.respond(context, control, StatusCode::INTERNAL_SERVER_ERROR, None, None).await;
                return Ok(());
            }
            ValidatorResult::Protocol(e) => {
                let status = e.status_code;
                let body = e.body.clone();
                let failure = ValidationFailure::Protocol(e);
                self.emit(context, control, &Event::InvalidState { route, failure: &failure });
                self.respond(context, control, status, body, None).await;
                return Ok(());
            }
        };

        // Stage 3: URL parameters, errors aggregated across parameters.
        let url_parameters = match &handler.url_parameters {
            None => None,
            Some(validators) => match validate_url_parameters(validators, &route_match.params) {
                Ok(values) => Some(values),
                Err(errors) => {
                    self.emit(context, control, &Event::InvalidUrlParameters { route, errors: &errors });
                    let (status, body) = aggregate_status(&errors);
                    self.respond(context, control, status, body, None).await;
                    return Ok(());
                }
            },
        };

        // Stage 4: query parameters over the normalized one-or-many view.
        let query = match &handler.query {
            None => None,
            Some(validators) => {
                let view = crate::request::parse_query(url.as_ref().and_then(RequestUrl::query).unwrap_or(""));
                let mut values = Map::new();
                let mut errors = Vec::new();
                for (name, validator) in validators {
                    collect_keyed(name, validator(view.get(name)), &mut values, &mut errors);
                }
                if !errors.is_empty() {
                    self.emit(context, control, &Event::InvalidQuery { route, errors: &errors });
                    let (status, body) = aggregate_status(&errors);
                    self.respond(context, control, status, body, None).await;
                    return Ok(());
                }
                Some(values)
            }
        };

        // Stage 5: request headers.
        let headers = match &handler.headers {
            None => None,
            Some(validators) => {
                let mut values = Map::new();
                let mut errors = Vec::new();
                for (name, validator) in validators {
                    let input = self.adapter.request_header(context, name);
                    collect_keyed(name, validator(input.as_ref()), &mut values, &mut errors);
                }
                if !errors.is_empty() {
                    self.emit(context, control, &Event::InvalidRequestHeaders { route, errors: &errors });
                    let (status, body) = aggregate_status(&errors);
                    self.respond(context, control, status, body, None).await;
                    return Ok(());
                }
                Some(values)
            }
        };

        // Stage 6: body. Without a declared validator the stream is never
        // requested, so the adapter or later middleware can still read it.
        let body = match &handler.body {
            None => None,
            Some(validator) => {
                let content_type = self.adapter.request_header(context, "content-type").map(|h| h.first().to_owned());
                let stream = self.adapter.request_body(context);
                match validator(content_type, stream).await {
                    BodyResult::Valid(value) => Some(value),
                    BodyResult::UnsupportedContentType { content_type } => {
                        self.emit(
                            context,
                            control,
                            &Event::InvalidContentType { route, content_type: content_type.as_deref() },
                        );
                        self.respond(context, control, StatusCode::UNSUPPORTED_MEDIA_TYPE, None, None).await;
                        return Ok(());
                    }
                    BodyResult::Invalid(e) => {
                        let failure = ValidationFailure::Error(e);
                        self.emit(context, control, &Event::InvalidBody { route, failure: &failure });
                        self.respond(context, control, StatusCode::UNPROCESSABLE_ENTITY, None, None).await;
                        return Ok(());
                    }
                    BodyResult::Protocol(e) => {
                        let status = e.status_code;
                        let body = e.body.clone();
                        let failure = ValidationFailure::Protocol(e);
                        self.emit(context, control, &Event::InvalidBody { route, failure: &failure });
                        self.respond(context, control, status, body, None).await;
                        return Ok(());
                    }
                }
            }
        };

        // Invocation.
        self.emit(context, control, &Event::SuccessfulInvocationStart { route, state: &state });
        let args = HandlerArgs { context: &mut *context, state: &state, url_parameters, query, headers, body };
        let response = handler.handler.invoke(args).await.map_err(EngineError::handler)?;

        // Response validation: headers first, then the body envelope.
        let response_headers = match &handler.response_headers {
            None => None,
            Some(validators) => {
                let Some(provided) = &response.headers else {
                    let failure = ValidationFailure::Error(ValidationError::new(
                        "response headers are declared for this endpoint but the handler returned none",
                    ));
                    self.emit(context, control, &Event::InvalidResponse { route, failure: &failure });
                    self.respond(context, control, StatusCode::INTERNAL_SERVER_ERROR, None, None).await;
                    return Ok(());
                };
                let mut values = Vec::new();
                let mut failed = Vec::new();
                for (name, validator) in validators {
                    match validator(provided.get(name).unwrap_or(&Value::Null)) {
                        ValidatorResult::Valid(value) => values.push((name.as_str(), value)),
                        ValidatorResult::Invalid(_) | ValidatorResult::Protocol(_) => failed.push(name.as_str()),
                    }
                }
                if !failed.is_empty() {
                    let failure = ValidationFailure::Error(ValidationError::new(format!(
                        "invalid response headers: {}",
                        failed.join(", ")
                    )));
                    self.emit(context, control, &Event::InvalidResponse { route, failure: &failure });
                    self.respond(context, control, StatusCode::INTERNAL_SERVER_ERROR, None, None).await;
                    return Ok(());
                }
                Some(values)
            }
        };
        let payload = match (handler.response_body)(response.body) {
            ValidatorResult::Valid(payload) => payload,
            ValidatorResult::Invalid(e) => {
                let failure = ValidationFailure::Error(e);
                self.emit(context, control, &Event::InvalidResponse { route, failure: &failure });
                self.respond(context, control, StatusCode::INTERNAL_SERVER_ERROR, None, None).await;
                return Ok(());
            }
            ValidatorResult::Protocol(e) => {
                let status = e.status_code;
                let body = e.body.clone();
                let failure = ValidationFailure::Protocol(e);
                self.emit(context, control, &Event::InvalidResponse { route, failure: &failure });
                self.respond(context, control, status, body, None).await;
                return Ok(());
            }
        };
        self.emit(context, control, &Event::SuccessfulInvocationEnd { route, state: &state });

        // Emission: headers, status, then content.
        if let Some(values) = &response_headers {
            for (name, value) in values {
                if let Some(value) = value {
                    self.adapter.set_header(context, name, value);
                }
            }
        }
        let has_output = payload.is_some();
        if !control.status_code_suppressed() {
            let will_send_body = has_output && !head_request && !control.sending_body_suppressed();
            let status = if has_output { StatusCode::OK } else { StatusCode::NO_CONTENT };
            self.adapter.set_status_code(context, status, will_send_body, None);
        }
        if head_request {
            // never send a body for HEAD; advertise the length the GET
            // would have produced, streams stay unread and length-less
            match payload {
                None => self.adapter.set_header(context, "content-length", "0"),
                Some(ResponsePayload { content_type, content }) => {
                    self.adapter.set_header(context, "content-type", &content_type);
                    if let Some(length) = content.content_length(Some(&content_type)) {
                        self.adapter.set_header(context, "content-length", &length.to_string());
                    }
                }
            }
        } else if let Some(ResponsePayload { content_type, content }) = payload {
            if !control.sending_body_suppressed() {
                self.adapter.set_header(context, "content-type", &content_type);
                self.send_guarded(context, control, content).await;
            }
        }
        Ok(())
    }

    fn emit(&self, context: &mut A::Context, control: &ResponseControl, event: &Event<'_, S>) {
        let mut scope = EventScope { adapter: &self.adapter, context, control };
        self.events.emit(&mut scope, event);
    }

    /// Terminal response for every early exit. Honors the suppression
    /// flags a listener may have raised during the preceding event.
    async fn respond(
        &self,
        context: &mut A::Context,
        control: &ResponseControl,
        status: StatusCode,
        body: Option<String>,
        error: Option<&EngineError>,
    ) {
        let will_send = body.is_some() && !control.sending_body_suppressed();
        if !control.status_code_suppressed() {
            self.adapter.set_status_code(context, status, will_send, error);
        }
        if will_send {
            if let Some(text) = body {
                self.send_guarded(context, control, ResponseContent::Text(text)).await;
            }
        }
    }

    /// The send primitive itself must not take the pipeline down; failures
    /// are reported through the event surface only.
    async fn send_guarded(&self, context: &mut A::Context, control: &ResponseControl, content: ResponseContent) {
        if let Err(source) = self.adapter.send_content(context, content).await {
            let send_error = EngineError::send(source);
            error!(cause = %send_error, "sending response content failed");
            self.emit(context, control, &Event::Exception { error: &send_error });
        }
    }
}

fn join_methods(methods: &[Method]) -> String {
    methods.iter().map(Method::as_str).collect::<Vec<_>>().join(",")
}

fn validate_url_parameters(
    validators: &[(String, UrlParameterValidator)],
    params: &RawPathParams,
) -> Result<Map<String, Value>, Vec<ParameterError>> {
    let mut values = Map::new();
    let mut errors = Vec::new();
    for (name, validator) in validators {
        match params.get(name) {
            None => errors.push(ParameterError::new(
                name.clone(),
                ValidationError::new(format!("no capture for parameter '{name}'")),
            )),
            Some(raw) => collect_keyed(name, validator(raw), &mut values, &mut errors),
        }
    }
    if errors.is_empty() { Ok(values) } else { Err(errors) }
}

fn collect_keyed(
    name: &str,
    result: ValidatorResult<Value>,
    values: &mut Map<String, Value>,
    errors: &mut Vec<ParameterError>,
) {
    match result {
        ValidatorResult::Valid(value) => {
            values.insert(name.to_owned(), value);
        }
        ValidatorResult::Invalid(e) => errors.push(ParameterError::new(name, e)),
        ValidatorResult::Protocol(e) => errors.push(ParameterError::protocol(name, e)),
    }
}

/// Keyed stages answer 400 unless some validator demanded an explicit
/// protocol response, which is honored verbatim.
fn aggregate_status(errors: &[ParameterError]) -> (StatusCode, Option<String>) {
    errors
        .iter()
        .find_map(|e| match &e.failure {
            ValidationFailure::Protocol(p) => Some((p.status_code, p.body.clone())),
            ValidationFailure::Error(_) => None,
        })
        .unwrap_or((StatusCode::BAD_REQUEST, None))
}
