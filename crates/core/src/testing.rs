//! A scripted adapter for driving the engine in tests.
//!
//! [`TestRequest`] doubles as the adapter context: it carries the scripted
//! request on the way in and records every adapter callback on the way
//! out, so assertions can check status codes, headers, sent content and —
//! crucially — which callbacks were *never* invoked.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body::{Body, Frame};

use crate::adapter::{BoxError, ServerAdapter};
use crate::body::ResponseContent;
use crate::error::EngineError;
use crate::events::{Event, EventListener, EventScope};
use crate::request::{HeaderInput, RequestUrl};

/// One recorded adapter callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    RequestBody,
    SetHeader { name: String, value: String },
    SetStatusCode { code: u16, will_send_body: bool, error: Option<String> },
    SendContent { content: String },
}

/// A scripted request plus the log of everything the engine did with it.
#[derive(Debug, Default)]
pub struct TestRequest {
    url: Option<String>,
    method: Method,
    headers: Vec<(String, HeaderInput)>,
    body: Option<Bytes>,
    body_error: Option<String>,
    fail_send: bool,
    calls: Vec<AdapterCall>,
    header_lookups: AtomicUsize,
    bytes_read: Arc<AtomicUsize>,
}

impl TestRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), method, ..Self::default() }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn options(url: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderInput>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The body stream errors on first poll, like a connection torn down
    /// mid-upload.
    #[must_use]
    pub fn with_broken_body(mut self, message: impl Into<String>) -> Self {
        self.body_error = Some(message.into());
        self
    }

    /// Every `send_content` call fails.
    #[must_use]
    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn calls(&self) -> &[AdapterCall] {
        &self.calls
    }

    pub fn status_codes(&self) -> Vec<u16> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                AdapterCall::SetStatusCode { code, .. } => Some(*code),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                AdapterCall::SendContent { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The last value set for a response header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.calls
            .iter()
            .rev()
            .find_map(|call| match call {
                AdapterCall::SetHeader { name: set, value } if set.eq_ignore_ascii_case(name) => {
                    Some(value.as_str())
                }
                _ => None,
            })
    }

    pub fn body_requested(&self) -> bool {
        self.calls.iter().any(|call| *call == AdapterCall::RequestBody)
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn header_lookups(&self) -> usize {
        self.header_lookups.load(Ordering::Relaxed)
    }
}

/// Request body handed out by [`RecordingAdapter`], counting every byte
/// the engine actually reads.
#[derive(Debug)]
pub struct TestBody {
    data: Option<Bytes>,
    error: Option<String>,
    read: Arc<AtomicUsize>,
}

impl Body for TestBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        if let Some(message) = this.error.take() {
            return Poll::Ready(Some(Err(message.into())));
        }
        match this.data.take() {
            Some(bytes) => {
                this.read.fetch_add(bytes.len(), Ordering::Relaxed);
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            None => Poll::Ready(None),
        }
    }
}

/// The scripted adapter. Stateless itself; everything lives on the
/// [`TestRequest`] context.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingAdapter;

#[async_trait]
impl ServerAdapter for RecordingAdapter {
    type Context = TestRequest;
    type RequestBody = TestBody;

    fn request_url(&self, context: &TestRequest) -> Option<RequestUrl> {
        context.url.as_deref().map(RequestUrl::from)
    }

    fn request_method(&self, context: &TestRequest) -> Method {
        context.method.clone()
    }

    fn request_header(&self, context: &TestRequest, name: &str) -> Option<HeaderInput> {
        context.header_lookups.fetch_add(1, Ordering::Relaxed);
        context
            .headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    fn request_body(&self, context: &mut TestRequest) -> Option<TestBody> {
        context.calls.push(AdapterCall::RequestBody);
        let read = Arc::clone(&context.bytes_read);
        if let Some(message) = context.body_error.take() {
            return Some(TestBody { data: None, error: Some(message), read });
        }
        context.body.take().map(|data| TestBody { data: Some(data), error: None, read })
    }

    fn set_header(&self, context: &mut TestRequest, name: &str, value: &str) {
        context.calls.push(AdapterCall::SetHeader { name: name.to_owned(), value: value.to_owned() });
    }

    fn set_status_code(
        &self,
        context: &mut TestRequest,
        code: StatusCode,
        will_send_body: bool,
        error: Option<&EngineError>,
    ) {
        context.calls.push(AdapterCall::SetStatusCode {
            code: code.as_u16(),
            will_send_body,
            error: error.map(ToString::to_string),
        });
    }

    async fn send_content(&self, context: &mut TestRequest, content: ResponseContent) -> Result<(), BoxError> {
        if context.fail_send {
            return Err("send refused".into());
        }
        let rendered = match content {
            ResponseContent::Text(text) => text,
            ResponseContent::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            ResponseContent::Stream(_) => "<stream>".to_owned(),
        };
        context.calls.push(AdapterCall::SendContent { content: rendered });
        Ok(())
    }
}

/// A shared, thread-safe log of event names in emission order.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// An [`EventListener`] appending every event name to the returned log.
pub fn recording_listener<A, S>() -> (EventLog, impl EventListener<A, S> + 'static)
where
    A: ServerAdapter,
{
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let listener = move |_scope: &mut EventScope<'_, A>, event: &Event<'_, S>| {
        sink.lock().unwrap().push(event.name().to_owned());
    };
    (log, listener)
}
