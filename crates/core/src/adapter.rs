//! The contract between the engine and a concrete HTTP server binding.
//!
//! The engine never touches sockets or wire framing. A host integration
//! implements [`ServerAdapter`] over its own per-request context type and
//! the engine drives the full request lifecycle through these callbacks.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body::Body;

use crate::body::ResponseContent;
use crate::error::EngineError;
use crate::request::{HeaderInput, RequestUrl};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks a host server integration supplies.
///
/// The context value is opaque to the engine and externally mutable: the
/// adapter may write to the underlying connection through side channels at
/// any time, which is why response suppression travels as explicit
/// [`ResponseControl`] flags instead of return values.
#[async_trait]
pub trait ServerAdapter: Send + Sync {
    /// Per-request context owned by the host server.
    type Context: Send;
    /// Streaming request body. Zero-copy: the engine never buffers it.
    type RequestBody: Body<Data = Bytes, Error = BoxError> + Send + 'static;

    fn request_url(&self, context: &Self::Context) -> Option<RequestUrl>;

    fn request_method(&self, context: &Self::Context) -> Method;

    /// Looks up a request header; `name` is always lower-cased.
    fn request_header(&self, context: &Self::Context, name: &str) -> Option<HeaderInput>;

    /// Hands out the request body stream. The engine calls this at most
    /// once per request, and only when the matched handler declares a body
    /// validator, so an undeclared body stays untouched for the adapter or
    /// later middleware to consume.
    fn request_body(&self, context: &mut Self::Context) -> Option<Self::RequestBody>;

    fn set_header(&self, context: &mut Self::Context, name: &str, value: &str);

    /// Sets the response status. `will_send_body` tells the adapter whether
    /// a `send_content` call follows; `error` carries the engine failure on
    /// internal-error responses.
    fn set_status_code(
        &self,
        context: &mut Self::Context,
        code: StatusCode,
        will_send_body: bool,
        error: Option<&EngineError>,
    );

    async fn send_content(&self, context: &mut Self::Context, content: ResponseContent) -> Result<(), BoxError>;
}

/// Per-request response intent, shared with event listeners.
///
/// A listener that has already answered the request (a CORS preflight, for
/// instance) raises these flags and the engine suppresses its own terminal
/// status/body behavior. Flags only ever go up.
#[derive(Debug, Default)]
pub struct ResponseControl {
    skip_status_code: AtomicBool,
    skip_sending_body: AtomicBool,
}

impl ResponseControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppress_status_code(&self) {
        self.skip_status_code.store(true, Ordering::Relaxed);
    }

    pub fn suppress_sending_body(&self) {
        self.skip_sending_body.store(true, Ordering::Relaxed);
    }

    pub fn status_code_suppressed(&self) -> bool {
        self.skip_status_code.load(Ordering::Relaxed)
    }

    pub fn sending_body_suppressed(&self) -> bool {
        self.skip_sending_body.load(Ordering::Relaxed)
    }
}
