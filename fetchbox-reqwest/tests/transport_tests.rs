//! Integration tests for ReqwestTransport using wiremock.

use std::time::Duration;

use fetchbox::{abort_pair, Client, Error, Payload, RequestOptions};
use fetchbox_memory::{MemoryCacheStore, MemoryDedupeStore};
use fetchbox_reqwest::ReqwestTransport;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server_agnostic_retry: bool) -> Client {
    let builder = Client::builder()
        .transport(ReqwestTransport::new())
        .cache_store(MemoryCacheStore::new(1_000))
        .dedupe_store(MemoryDedupeStore::new());
    if server_agnostic_retry {
        builder.build()
    } else {
        builder.no_retry().build()
    }
}

#[tokio::test]
async fn fetches_and_caches_a_json_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=60")
                .set_body_json(json!({"message": "hello"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(false);
    let url = format!("{}/data", server.uri());

    let first = client.get(&url, RequestOptions::new()).await.unwrap();
    let second = client.get(&url, RequestOptions::new()).await.unwrap();
    assert_eq!(first, Payload::Json(json!({"message": "hello"})));
    assert_eq!(second, first);
}

#[tokio::test]
async fn params_and_headers_reach_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust"))
        .and(header("x-trace", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(false);
    let url = format!("{}/search", server.uri());
    let value = client
        .get(
            &url,
            RequestOptions::new().param("q", "rust").header("x-trace", "abc"),
        )
        .await
        .unwrap();
    assert_eq!(value, Payload::Json(json!({"hits": 1})));
}

#[tokio::test]
async fn non_2xx_surfaces_as_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "missing"})))
        .mount(&server)
        .await;

    let client = client(false);
    let url = format!("{}/missing", server.uri());
    let error = client.get(&url, RequestOptions::new()).await.unwrap_err();
    assert_eq!(error.status_code(), Some(404));
}

#[tokio::test]
async fn text_bodies_come_back_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string("just text"),
        )
        .mount(&server)
        .await;

    let client = client(false);
    let url = format!("{}/plain", server.uri());
    let value = client.get(&url, RequestOptions::new()).await.unwrap();
    assert_eq!(value, Payload::Text("just text".into()));
}

#[tokio::test]
async fn connection_failures_are_network_errors() {
    // Nothing listens on this port.
    let client = client(false);
    let error = client
        .get("http://127.0.0.1:9/unreachable", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Network(_)));
}

#[tokio::test]
async fn abort_cancels_a_slow_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(10))
                .set_body_string("late"),
        )
        .mount(&server)
        .await;

    let client = client(false);
    let url = format!("{}/slow", server.uri());
    let (handle, signal) = abort_pair();
    let request = tokio::spawn({
        let client = client.clone();
        async move { client.get(&url, RequestOptions::new().signal(signal)).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();

    let error = request.await.unwrap().unwrap_err();
    assert!(matches!(error, Error::Aborted));
}

#[tokio::test]
async fn conditional_revalidation_round_trip() {
    let server = MockServer::start().await;
    // First exchange: a response that is immediately stale but validatable.
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=0")
                .insert_header("etag", "\"v1\"")
                .set_body_json(json!({"v": 1})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Second exchange: the conditional request is answered with 304.
    Mock::given(method("GET"))
        .and(path("/doc"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(false);
    let url = format!("{}/doc", server.uri());
    let first = client.get(&url, RequestOptions::new()).await.unwrap();
    let second = client.get(&url, RequestOptions::new()).await.unwrap();
    assert_eq!(first, Payload::Json(json!({"v": 1})));
    assert_eq!(second, first);
}
