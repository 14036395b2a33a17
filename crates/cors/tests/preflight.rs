//! Drives the engine with the recording adapter and checks that CORS
//! behavior emerges purely from event subscription.

use http::Method;
use restmachine_core::endpoint::{Endpoint, HandlerArgs, HandlerResponse, StaticHandler, handler_fn};
use restmachine_core::engine::RequestEngine;
use restmachine_core::testing::{RecordingAdapter, TestRequest};
use restmachine_core::validator::text_response;
use restmachine_cors::Cors;
use serde_json::json;

type Args<'a> = HandlerArgs<'a, TestRequest, ()>;

fn text_handler(body: &'static str) -> StaticHandler<RecordingAdapter, ()> {
    StaticHandler::builder()
        .state_value(())
        .response_body(text_response("text/plain"))
        .handler(handler_fn(move |_args: Args<'_>| {
            futures::future::ready(Ok(HandlerResponse::with_body(json!(body))))
        }))
        .build()
        .unwrap()
}

fn engine(cors: Cors<RecordingAdapter>) -> RequestEngine<RecordingAdapter, ()> {
    RequestEngine::builder(RecordingAdapter)
        .endpoint(
            Endpoint::new("/things")
                .method(Method::POST, text_handler("created"))
                .method(Method::PUT, text_handler("replaced")),
        )
        .endpoint(Endpoint::new("/data").method(Method::GET, text_handler("data")))
        .listener(cors)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn preflight_is_answered_and_405_suppressed() {
    let engine = engine(Cors::builder().allow_headers(["h1", "h2"]).build());
    let mut request = TestRequest::options("/things").with_header("origin", "https://app.example");
    engine.handle_request(&mut request).await;

    assert_eq!(request.header_value("access-control-allow-origin"), Some("*"));
    assert_eq!(request.header_value("access-control-allow-headers"), Some("h1,h2"));
    assert_eq!(request.header_value("access-control-allow-methods"), Some("POST,PUT"));
    assert_eq!(request.status_codes(), vec![200]);
    // the pipeline's own method-not-allowed response must not surface
    assert_eq!(request.header_value("allow"), None);
    assert!(request.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn simple_request_is_decorated_with_origin() {
    let engine = engine(Cors::builder().expose_headers(["x-request-id"]).build());
    let mut request = TestRequest::get("/data").with_header("origin", "https://app.example");
    engine.handle_request(&mut request).await;

    assert_eq!(request.header_value("access-control-allow-origin"), Some("*"));
    assert_eq!(request.header_value("access-control-expose-headers"), Some("x-request-id"));
    assert_eq!(request.status_codes(), vec![200]);
    assert_eq!(request.sent(), vec!["data"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn error_responses_are_decorated_too() {
    let engine = engine(Cors::builder().build());
    let mut request = TestRequest::get("/missing");
    engine.handle_request(&mut request).await;

    assert_eq!(request.header_value("access-control-allow-origin"), Some("*"));
    assert_eq!(request.status_codes(), vec![404]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn exact_origin_sets_vary() {
    let engine = engine(Cors::builder().allow_origin("https://app.example").allow_credentials().build());
    let mut request = TestRequest::get("/data").with_header("origin", "https://app.example");
    engine.handle_request(&mut request).await;

    assert_eq!(request.header_value("access-control-allow-origin"), Some("https://app.example"));
    assert_eq!(request.header_value("vary"), Some("origin"));
    assert_eq!(request.header_value("access-control-allow-credentials"), Some("true"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn proceed_predicate_disables_the_subscriber() {
    let engine = engine(Cors::builder().allow_headers(["h1"]).proceed(|_context| false).build());
    let mut request = TestRequest::options("/things");
    engine.handle_request(&mut request).await;

    // with CORS opted out the pipeline's normal 405 answer stands
    assert_eq!(request.header_value("access-control-allow-origin"), None);
    assert_eq!(request.header_value("allow"), Some("POST,PUT"));
    assert_eq!(request.status_codes(), vec![405]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn max_age_is_advertised_on_preflight() {
    let engine = engine(Cors::builder().allow_headers(["h1"]).max_age(3600).build());
    let mut request = TestRequest::options("/things");
    engine.handle_request(&mut request).await;

    assert_eq!(request.header_value("access-control-max-age"), Some("3600"));
    assert_eq!(request.status_codes(), vec![200]);
}
