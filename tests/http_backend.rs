//! HTTP backend against a mock server.

use std::time::Duration;

use batchsweep::backend::{BackendSettings, HttpBackend, ItemSource, OperationClient, Session};
use batchsweep::models::{Batch, GroupTask, Item, ItemId};
use batchsweep::services::{classify, ErrorKind};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(base_url: &str) -> BackendSettings {
    BackendSettings {
        base_url: base_url.to_string(),
        page_size: 2,
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn batch(ids: &[&str]) -> Batch {
    Batch {
        seq: 1,
        items: ids.iter().map(|id| Item::new(*id, *id)).collect(),
    }
}

#[tokio::test]
async fn test_fetch_groups_builds_ordered_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 12, "name": "12. Winter"},
            {"id": "g3", "name": "3. Summer"},
            {"id": "gx", "name": null}
        ])))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(settings(&server.uri())).unwrap();
    let directory = backend.fetch_groups().await.unwrap();

    assert_eq!(directory.names(), &["3. Summer", "12. Winter"]);
    assert_eq!(directory.id_of("12. Winter"), Some("12"));
}

#[tokio::test]
async fn test_fetch_all_paginates_until_short_page() {
    let server = MockServer::start().await;
    let pages = [
        (0, json!([{"id": "1", "name": "a"}, {"id": "2", "name": "b"}])),
        (2, json!([{"id": "3", "name": "c"}, {"id": "4", "name": "d"}])),
        (4, json!([{"id": 5, "name": "e", "payload": {"sku": "X"}}])),
    ];
    for (offset, items) in pages {
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(body_partial_json(json!({
                "group_id": "g1",
                "offset": offset,
                "limit": 2,
                "filter": {"market": "ST11"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let backend = HttpBackend::new(settings(&server.uri())).unwrap();
    let mut params = batchsweep::models::FetchParams::new();
    params.insert("market".into(), "ST11".into());
    let group = GroupTask::new("1. Spring", "g1").with_fetch_params(params);

    let items = backend.fetch_all(&group, &|| false).await.unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.0.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(items[4].payload, json!({"sku": "X"}));
}

#[tokio::test]
async fn test_entry_without_id_does_not_end_pagination() {
    let server = MockServer::start().await;
    let pages = [
        (0, json!([{"id": "1", "name": "a"}, {"id": null, "name": "broken"}])),
        (2, json!([{"id": "3", "name": "c"}, {"id": "4", "name": "d"}])),
        (4, json!([])),
    ];
    for (offset, items) in pages {
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(body_partial_json(json!({"offset": offset, "limit": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let backend = HttpBackend::new(settings(&server.uri())).unwrap();
    let items = backend
        .fetch_all(&GroupTask::new("1. Spring", "g1"), &|| false)
        .await
        .unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.0.as_str()).collect();
    assert_eq!(ids, vec!["1", "3", "4"]);
}

#[tokio::test]
async fn test_execute_maps_results_and_sends_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/operation"))
        .and(header("authorization", "Bearer secret"))
        .and(header("x-tenant", "shop-1"))
        .and(body_partial_json(json!({
            "ids": ["a", "b", "c"],
            "params": {"market_type": "ST11"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "a", "code": 0},
                {"id": "b", "success": false, "status": "not linked"},
                {"id": "c", "success": true, "status": "done"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = settings(&server.uri());
    config.token = Some("secret".into());
    config.headers.insert("X-Tenant".into(), "shop-1".into());
    config
        .operation_params
        .insert("market_type".into(), json!("ST11"));
    let backend = HttpBackend::new(config).unwrap();

    let result = backend.execute(&batch(&["a", "b", "c"])).await.unwrap();
    assert_eq!(result.per_item.len(), 3);
    assert!(result.per_item[0].success);
    assert_eq!(result.per_item[1].id, ItemId::from("b"));
    assert!(!result.per_item[1].success);
    assert_eq!(result.per_item[1].status, "not linked");
}

#[tokio::test]
async fn test_http_error_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/operation"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid price: -1"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(settings(&server.uri())).unwrap();
    let err = backend.execute(&batch(&["a"])).await.unwrap_err();

    assert_eq!(err.message, "HTTP 400: Invalid price: -1");
    assert_eq!(classify(&err.message), ErrorKind::Permanent);
}

#[tokio::test]
async fn test_slow_response_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/operation"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = settings(&server.uri());
    config.request_timeout = Duration::from_millis(200);
    let backend = HttpBackend::new(config).unwrap();

    let err = backend.execute(&batch(&["a"])).await.unwrap_err();
    assert_eq!(classify(&err.message), ErrorKind::Transient, "{}", err);
}

#[tokio::test]
async fn test_refused_connection_is_transient() {
    // Grab a free port, then close it so nothing is listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let backend = HttpBackend::new(settings(&format!("http://127.0.0.1:{}", port))).unwrap();
    let err = backend.execute(&batch(&["a"])).await.unwrap_err();
    assert_eq!(classify(&err.message), ErrorKind::Transient, "{}", err);
}

#[tokio::test]
async fn test_reset_keeps_backend_usable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/operation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "a", "success": true}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(settings(&server.uri())).unwrap();
    backend.execute(&batch(&["a"])).await.unwrap();
    backend.reset().await.unwrap();
    let result = backend.execute(&batch(&["a"])).await.unwrap();
    assert!(result.per_item[0].success);
}

#[tokio::test]
async fn test_malformed_item_page_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(settings(&server.uri())).unwrap();
    let err = backend
        .fetch_all(&GroupTask::new("1. Spring", "g1"), &|| false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Malformed item page"), "{}", err);
}
