//! Per-endpoint HTTP method dispatch.
//!
//! Resolves a matched endpoint and a request method to a handler bundle,
//! or to the method set the endpoint does support so the caller can answer
//! with 405 (or 404 when nothing may be disclosed).

use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::adapter::ServerAdapter;
use crate::endpoint::{Endpoint, StaticHandler};
use crate::validator::{StateValidator, ValidatorResult};

/// Outcome of method dispatch on a matched endpoint.
#[derive(Debug)]
pub enum MethodDispatch<'e, A: ServerAdapter, S> {
    Found {
        handler: &'e StaticHandler<A, S>,
        /// The original request was `HEAD`: run the full pipeline but
        /// suppress the body on emission.
        head_request: bool,
    },
    InvalidMethod {
        /// Every method the endpoint supports, in registration order.
        allowed: Vec<Method>,
    },
}

/// Resolves `method` against the endpoint's handler table. `HEAD` falls
/// back to the `GET` handler when no dedicated `HEAD` handler exists, so
/// validation and business logic run identically for both.
pub fn dispatch<'e, A: ServerAdapter, S>(endpoint: &'e Endpoint<A, S>, method: &Method) -> MethodDispatch<'e, A, S> {
    if let Some(handler) = endpoint.handler(method) {
        return MethodDispatch::Found { handler, head_request: *method == Method::HEAD };
    }
    if *method == Method::HEAD {
        if let Some(handler) = endpoint.handler(&Method::GET) {
            debug!(pattern = endpoint.pattern(), "dispatching HEAD to the GET handler");
            return MethodDispatch::Found { handler, head_request: true };
        }
    }
    MethodDispatch::InvalidMethod { allowed: endpoint.methods().cloned().collect() }
}

/// The subset of an endpoint's methods that may be disclosed to this
/// caller: a method is hidden when its state validator rejects the current
/// context, so `Allow` does not enumerate routes the caller cannot use.
/// Methods sharing one validator (by identity) are checked with a single
/// invocation.
pub async fn disclosable_methods<A: ServerAdapter, S>(endpoint: &Endpoint<A, S>, context: &A::Context) -> Vec<Method> {
    let mut groups: Vec<(StateValidator<A::Context, S>, Vec<Method>)> = Vec::new();
    for (method, handler) in endpoint.handlers() {
        match groups.iter_mut().find(|(validator, _)| Arc::ptr_eq(validator, &handler.state_validator)) {
            Some((_, methods)) => methods.push(method.clone()),
            None => groups.push((Arc::clone(&handler.state_validator), vec![method.clone()])),
        }
    }

    let mut disclosed = Vec::new();
    for (validator, methods) in groups {
        match validator(context).await {
            ValidatorResult::Valid(_) => disclosed.extend(methods),
            ValidatorResult::Invalid(_) | ValidatorResult::Protocol(_) => {
                debug!(pattern = endpoint.pattern(), hidden = methods.len(), "hiding unauthorized methods from Allow");
            }
        }
    }
    disclosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingAdapter;
    use crate::testing::TestRequest;
    use crate::endpoint::{HandlerResponse, handler_fn};
    use crate::validator::{ProtocolError, ValidationError};
    use futures::FutureExt;
    use http::StatusCode;
    use serde_json::json;

    fn handler(
        builder: crate::endpoint::StaticHandlerBuilder<RecordingAdapter, ()>,
    ) -> StaticHandler<RecordingAdapter, ()> {
        builder
            .handler(handler_fn(|_args: crate::endpoint::HandlerArgs<'_, TestRequest, ()>| {
                futures::future::ready(Ok(HandlerResponse::with_body(json!("ok"))))
            }))
            .build()
            .unwrap()
    }

    fn endpoint() -> Endpoint<RecordingAdapter, ()> {
        Endpoint::new("/things")
            .method(Method::GET, handler(StaticHandler::builder().state_value(())))
            .method(Method::POST, handler(StaticHandler::builder().state_value(())))
    }

    #[test]
    fn finds_registered_method() {
        let endpoint = endpoint();
        assert!(matches!(
            dispatch(&endpoint, &Method::POST),
            MethodDispatch::Found { head_request: false, .. }
        ));
    }

    #[test]
    fn head_falls_back_to_get() {
        let endpoint = endpoint();
        assert!(matches!(
            dispatch(&endpoint, &Method::HEAD),
            MethodDispatch::Found { head_request: true, .. }
        ));
    }

    #[test]
    fn head_without_get_is_invalid() {
        let endpoint = Endpoint::new("/things")
            .method(Method::POST, handler(StaticHandler::builder().state_value(())));
        match dispatch(&endpoint, &Method::HEAD) {
            MethodDispatch::InvalidMethod { allowed } => assert_eq!(allowed, vec![Method::POST]),
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[test]
    fn unsupported_method_reports_allowed_set() {
        let endpoint = endpoint();
        match dispatch(&endpoint, &Method::DELETE) {
            MethodDispatch::InvalidMethod { allowed } => {
                assert_eq!(allowed, vec![Method::GET, Method::POST]);
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disclosure_hides_rejected_state_validators() {
        let endpoint = Endpoint::new("/things")
            .method(Method::GET, handler(StaticHandler::builder().state_value(())))
            .method(
                Method::DELETE,
                handler(StaticHandler::builder().state(|_context| {
                    futures::future::ready(ValidatorResult::<()>::Protocol(ProtocolError::new(
                        StatusCode::UNAUTHORIZED,
                    )))
                    .boxed()
                })),
            )
            .method(
                Method::PUT,
                handler(StaticHandler::builder().state(|_context| {
                    futures::future::ready(ValidatorResult::<()>::Invalid(ValidationError::new("no")))
                        .boxed()
                })),
            );

        let context = TestRequest::get("/things");
        let disclosed = disclosable_methods(&endpoint, &context).await;
        assert_eq!(disclosed, vec![Method::GET]);
    }

    #[tokio::test]
    async fn shared_validators_run_once_and_group_methods() {
        let shared: StateValidator<TestRequest, ()> = Arc::new(|_context: &TestRequest| {
            futures::future::ready(ValidatorResult::Valid(())).boxed()
        });
        let endpoint = Endpoint::new("/things")
            .method(Method::GET, handler(StaticHandler::builder().state_shared(Arc::clone(&shared))))
            .method(Method::POST, handler(StaticHandler::builder().state_shared(Arc::clone(&shared))));

        let context = TestRequest::get("/things");
        let disclosed = disclosable_methods(&endpoint, &context).await;
        assert_eq!(disclosed, vec![Method::GET, Method::POST]);
    }
}
