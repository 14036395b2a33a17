//! The per-request event surface.
//!
//! Every lifecycle juncture of the pipeline emits exactly one [`Event`] to
//! the registered listeners. Cross-cutting features (CORS, logging,
//! metrics) live entirely behind this seam: listeners see the adapter, the
//! request context and the [`ResponseControl`] flags, and may decorate or
//! take over the response, but they can never break the pipeline — a
//! panicking listener is caught and discarded.

use std::panic::AssertUnwindSafe;

use http::Method;
use tracing::warn;

use crate::adapter::{ResponseControl, ServerAdapter};
use crate::error::EngineError;
use crate::router::RawPathParams;
use crate::validator::{ParameterError, ValidationFailure};

/// The matched route as carried by events: the winning pattern and its raw
/// captures.
#[derive(Debug, Clone, Copy)]
pub struct RouteInfo<'a> {
    pub pattern: &'a str,
    pub params: &'a RawPathParams,
}

/// The closed set of lifecycle events.
#[derive(Debug)]
pub enum Event<'a, S> {
    /// Emitted immediately before the business handler runs.
    SuccessfulInvocationStart { route: RouteInfo<'a>, state: &'a S },
    /// Emitted after the handler's output passed response validation.
    SuccessfulInvocationEnd { route: RouteInfo<'a>, state: &'a S },
    /// No registered pattern matched the request path.
    InvalidUrl { path: &'a str },
    /// The endpoint does not support the request method. `disclosed` is
    /// the authorization-filtered subset that ends up in `Allow`.
    InvalidMethod {
        route: RouteInfo<'a>,
        method: &'a Method,
        allowed: &'a [Method],
        disclosed: &'a [Method],
    },
    InvalidState { route: RouteInfo<'a>, failure: &'a ValidationFailure },
    InvalidUrlParameters { route: RouteInfo<'a>, errors: &'a [ParameterError] },
    InvalidQuery { route: RouteInfo<'a>, errors: &'a [ParameterError] },
    InvalidRequestHeaders { route: RouteInfo<'a>, errors: &'a [ParameterError] },
    InvalidContentType { route: RouteInfo<'a>, content_type: Option<&'a str> },
    InvalidBody { route: RouteInfo<'a>, failure: &'a ValidationFailure },
    InvalidResponse { route: RouteInfo<'a>, failure: &'a ValidationFailure },
    /// An internal failure: handler error, send failure or caught panic.
    Exception { error: &'a EngineError },
}

impl<S> Event<'_, S> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SuccessfulInvocationStart { .. } => "successful_invocation_start",
            Self::SuccessfulInvocationEnd { .. } => "successful_invocation_end",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::InvalidMethod { .. } => "invalid_method",
            Self::InvalidState { .. } => "invalid_state",
            Self::InvalidUrlParameters { .. } => "invalid_url_parameters",
            Self::InvalidQuery { .. } => "invalid_query",
            Self::InvalidRequestHeaders { .. } => "invalid_request_headers",
            Self::InvalidContentType { .. } => "invalid_content_type",
            Self::InvalidBody { .. } => "invalid_body",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Exception { .. } => "exception",
        }
    }
}

/// What a listener may reach during an event: the adapter, the request
/// context and the response-intent flags.
pub struct EventScope<'a, A: ServerAdapter> {
    pub adapter: &'a A,
    pub context: &'a mut A::Context,
    pub control: &'a ResponseControl,
}

impl<A: ServerAdapter> std::fmt::Debug for EventScope<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScope").field("control", &self.control).finish_non_exhaustive()
    }
}

/// A synchronous event observer.
pub trait EventListener<A: ServerAdapter, S>: Send + Sync {
    fn on_event(&self, scope: &mut EventScope<'_, A>, event: &Event<'_, S>);
}

impl<A, S, F> EventListener<A, S> for F
where
    A: ServerAdapter,
    F: Fn(&mut EventScope<'_, A>, &Event<'_, S>) + Send + Sync,
{
    fn on_event(&self, scope: &mut EventScope<'_, A>, event: &Event<'_, S>) {
        self(scope, event);
    }
}

/// Fans one event out to every registered listener, containing panics.
pub struct EventBus<A: ServerAdapter, S> {
    listeners: Vec<Box<dyn EventListener<A, S>>>,
}

impl<A: ServerAdapter, S> EventBus<A, S> {
    pub(crate) fn new(listeners: Vec<Box<dyn EventListener<A, S>>>) -> Self {
        Self { listeners }
    }

    pub fn emit(&self, scope: &mut EventScope<'_, A>, event: &Event<'_, S>) {
        for listener in &self.listeners {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(scope, event)));
            if outcome.is_err() {
                warn!(event = event.name(), "event listener panicked, discarding");
            }
        }
    }
}

impl<A: ServerAdapter, S> std::fmt::Debug for EventBus<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("listeners", &self.listeners.len()).finish()
    }
}
