//! A server-agnostic REST request-processing engine.
//!
//! This crate implements the full lifecycle of one inbound HTTP request —
//! route matching, method dispatch, context/state validation,
//! parameter/query/header/body validation, handler invocation, response
//! validation and emission — without knowing anything about the concrete
//! HTTP server or async runtime hosting it. A host integration supplies a
//! small [`adapter::ServerAdapter`] callback set; an external builder
//! supplies the immutable endpoint table; the engine does the rest.
//!
//! # Features
//!
//! - Single-pass multi-route matching with named path captures
//! - Per-method dispatch with `HEAD`→`GET` fallback and
//!   authorization-filtered `Allow` disclosure
//! - Five independently pluggable validation stages, each short-circuiting
//!   to a precise status code
//! - Zero-copy streaming request bodies that stay untouched unless a body
//!   validator asks for them
//! - A synchronous event surface at every lifecycle juncture, so
//!   cross-cutting features (CORS, logging, metrics) need no coupling to
//!   the pipeline
//! - One outermost catch-all that turns any internal failure into a 500
//!   response attempt
//!
//! # Example
//!
//! ```no_run
//! use http::Method;
//! use restmachine_core::endpoint::{Endpoint, HandlerArgs, HandlerResponse, StaticHandler, handler_fn};
//! use restmachine_core::engine::RequestEngine;
//! use restmachine_core::validator::{string_parameter, text_response};
//! use serde_json::json;
//!
//! # fn build<A: restmachine_core::adapter::ServerAdapter + 'static>(adapter: A) {
//! let greet = StaticHandler::<A, ()>::builder()
//!     .state_value(())
//!     .url_parameter("name", string_parameter())
//!     .response_body(text_response("text/plain; charset=utf-8"))
//!     .handler(handler_fn(|args: HandlerArgs<'_, A::Context, ()>| {
//!         let name = args
//!             .url_parameters
//!             .as_ref()
//!             .and_then(|p| p.get("name"))
//!             .and_then(|n| n.as_str())
//!             .unwrap_or_default()
//!             .to_owned();
//!         async move { Ok(HandlerResponse::with_body(json!(format!("hello, {name}")))) }
//!     }))
//!     .build()
//!     .unwrap();
//!
//! let engine = RequestEngine::builder(adapter)
//!     .endpoint(Endpoint::new("/greet/{name}").method(Method::GET, greet))
//!     .build()
//!     .unwrap();
//! // hand `engine` to the server binding; it calls
//! // `engine.handle_request(&mut context)` once per inbound request
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`engine`]: the pipeline itself and its builder
//! - [`adapter`]: the contract a host server integration implements
//! - [`endpoint`]: the immutable endpoint table and handler bundles
//! - [`router`]: multi-route path matching
//! - [`dispatch`]: per-endpoint method resolution and `Allow` disclosure
//! - [`validator`]: the shared validator result protocol
//! - [`events`]: the per-request event surface
//! - [`body`]: response payloads and charset-aware wire lengths
//!
//! # Error handling
//!
//! Expected validation outcomes travel as
//! [`validator::ValidatorResult`] data and map to 400/415/422 responses;
//! validators may demand an explicit status and body instead, which is
//! honored verbatim. Only genuine programming or I/O faults become
//! [`error::EngineError`], reported through the `exception` event and a
//! best-effort 500.

pub mod adapter;
pub mod body;
pub mod dispatch;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod request;
pub mod router;
pub mod validator;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{BoxError, ResponseControl, ServerAdapter};
pub use body::{ResponseContent, ResponsePayload};
pub use endpoint::{Endpoint, Handler, HandlerArgs, HandlerResponse, StaticHandler, handler_fn};
pub use engine::{EngineBuilder, RequestEngine};
pub use events::{Event, EventListener, EventScope, RouteInfo};
pub use validator::{ProtocolError, ValidationError, ValidatorResult};
