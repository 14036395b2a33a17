//! CORS as a pure event subscriber.
//!
//! Nothing in the core pipeline knows this crate exists: [`Cors`]
//! implements [`EventListener`] and is registered like any other listener.
//! On an `invalid_method` event for an `OPTIONS` request it answers the
//! preflight itself — `Access-Control-*` headers, status 200, no body —
//! and raises the [`restmachine_core::ResponseControl`] suppression flags
//! so the pipeline's own `Allow`/405 behavior never reaches the wire. On every other
//! lifecycle event it decorates the in-flight response with the
//! simple-CORS headers.
//!
//! # Example
//!
//! ```no_run
//! # fn configure<A: restmachine_core::ServerAdapter>() -> restmachine_cors::Cors<A> {
//! restmachine_cors::Cors::builder()
//!     .allow_headers(["content-type", "authorization"])
//!     .max_age(3600)
//!     .build()
//! # }
//! ```

use http::{Method, StatusCode};
use tracing::debug;

use restmachine_core::ServerAdapter;
use restmachine_core::events::{Event, EventListener, EventScope};

/// Which `Access-Control-Allow-Origin` value to send.
#[derive(Debug, Clone)]
pub enum AllowOrigin {
    /// `*` — any origin, no `Vary` needed.
    Any,
    /// A fixed origin value, sent together with `Vary: origin`.
    Exact(String),
}

/// The CORS event subscriber. Register it on the engine builder; one
/// instance serves every request.
pub struct Cors<A: ServerAdapter> {
    allow_origin: AllowOrigin,
    allow_headers: Option<Vec<String>>,
    expose_headers: Option<Vec<String>>,
    allow_credentials: bool,
    max_age: Option<u32>,
    proceed: Option<ProceedFn<A>>,
}

type ProceedFn<A> = Box<dyn Fn(&<A as ServerAdapter>::Context) -> bool + Send + Sync>;

impl<A: ServerAdapter> Cors<A> {
    pub fn builder() -> CorsBuilder<A> {
        CorsBuilder::new()
    }

    fn apply_origin(&self, scope: &mut EventScope<'_, A>) {
        let adapter = scope.adapter;
        match &self.allow_origin {
            AllowOrigin::Any => adapter.set_header(scope.context, "access-control-allow-origin", "*"),
            AllowOrigin::Exact(origin) => {
                adapter.set_header(scope.context, "access-control-allow-origin", origin);
                adapter.set_header(scope.context, "vary", "origin");
            }
        }
        if self.allow_credentials {
            adapter.set_header(scope.context, "access-control-allow-credentials", "true");
        }
    }

    /// Answers the preflight in place of the pipeline's 405 response.
    fn answer_preflight(&self, scope: &mut EventScope<'_, A>, disclosed: &[Method]) {
        debug!("answering CORS preflight");
        self.apply_origin(scope);
        let adapter = scope.adapter;
        if let Some(headers) = &self.allow_headers {
            adapter.set_header(scope.context, "access-control-allow-headers", &headers.join(","));
        }
        adapter.set_header(scope.context, "access-control-allow-methods", &join_methods(disclosed));
        if let Some(age) = self.max_age {
            adapter.set_header(scope.context, "access-control-max-age", &age.to_string());
        }
        adapter.set_status_code(scope.context, StatusCode::OK, false, None);
        scope.control.suppress_status_code();
        scope.control.suppress_sending_body();
    }
}

impl<A: ServerAdapter, S> EventListener<A, S> for Cors<A> {
    fn on_event(&self, scope: &mut EventScope<'_, A>, event: &Event<'_, S>) {
        if let Some(proceed) = &self.proceed {
            if !proceed(scope.context) {
                return;
            }
        }
        match event {
            Event::InvalidMethod { disclosed, .. }
                if scope.adapter.request_method(scope.context) == Method::OPTIONS =>
            {
                self.answer_preflight(scope, disclosed);
            }
            Event::SuccessfulInvocationEnd { .. } => {
                self.apply_origin(scope);
                if let Some(exposed) = &self.expose_headers {
                    scope.adapter.set_header(scope.context, "access-control-expose-headers", &exposed.join(","));
                }
            }
            _ => self.apply_origin(scope),
        }
    }
}

impl<A: ServerAdapter> std::fmt::Debug for Cors<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cors")
            .field("allow_origin", &self.allow_origin)
            .field("allow_headers", &self.allow_headers)
            .field("expose_headers", &self.expose_headers)
            .field("allow_credentials", &self.allow_credentials)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// Accumulates CORS options; origin defaults to [`AllowOrigin::Any`].
pub struct CorsBuilder<A: ServerAdapter> {
    allow_origin: AllowOrigin,
    allow_headers: Option<Vec<String>>,
    expose_headers: Option<Vec<String>>,
    allow_credentials: bool,
    max_age: Option<u32>,
    proceed: Option<ProceedFn<A>>,
}

impl<A: ServerAdapter> CorsBuilder<A> {
    fn new() -> Self {
        Self {
            allow_origin: AllowOrigin::Any,
            allow_headers: None,
            expose_headers: None,
            allow_credentials: false,
            max_age: None,
            proceed: None,
        }
    }

    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = AllowOrigin::Exact(origin.into());
        self
    }

    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.allow_origin = AllowOrigin::Any;
        self
    }

    #[must_use]
    pub fn allow_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.allow_headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn expose_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.expose_headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn allow_credentials(mut self) -> Self {
        self.allow_credentials = true;
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Disables the subscriber for requests the predicate rejects, without
    /// touching the pipeline.
    #[must_use]
    pub fn proceed(mut self, predicate: impl Fn(&A::Context) -> bool + Send + Sync + 'static) -> Self {
        self.proceed = Some(Box::new(predicate));
        self
    }

    pub fn build(self) -> Cors<A> {
        Cors {
            allow_origin: self.allow_origin,
            allow_headers: self.allow_headers,
            expose_headers: self.expose_headers,
            allow_credentials: self.allow_credentials,
            max_age: self.max_age,
            proceed: self.proceed,
        }
    }
}

impl<A: ServerAdapter> std::fmt::Debug for CorsBuilder<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorsBuilder").field("allow_origin", &self.allow_origin).finish_non_exhaustive()
    }
}

fn join_methods(methods: &[Method]) -> String {
    methods.iter().map(Method::as_str).collect::<Vec<_>>().join(",")
}
