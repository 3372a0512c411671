//! API helpers against a wiremock backend

use serde_json::json;
use std::time::Duration;
use testbed_common::{Credentials, PollConfig, UserBuilder};
use testbed_e2e::logging::init_test_logging;
use testbed_e2e::{
    ApiClient, AuthApi, E2eError, MockBackend, PostsApi, RequestOptions, ResponseValidator,
    UsersApi,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_users_crud() {
    init_test_logging();
    let backend = MockBackend::start().await;
    backend
        .stub_json("get", "/users/1", 200, json!({
            "id": 1,
            "name": "Leanne Graham",
            "username": "Bret",
            "email": "leanne@example.test",
            "address": {"street": "Kulas Light", "city": "Gwenborough", "zipcode": "92998"}
        }))
        .await;
    backend
        .stub_json("post", "/users", 201, json!({
            "id": 11,
            "name": "New User",
            "username": "new.user",
            "email": "new@example.test"
        }))
        .await;
    backend.stub_json("delete", "/users/11", 200, json!({})).await;

    let client = ApiClient::for_base_url(backend.uri()).unwrap();
    let users = UsersApi::new(&client);

    let user = users.get(1).await.unwrap();
    assert_eq!(user.id, Some(1));
    assert_eq!(user.address.unwrap().city, "Gwenborough");

    let created = users.create(&UserBuilder::random().build()).await.unwrap();
    assert_eq!(created.id, Some(11));

    users.delete(11).await.unwrap();
    assert_eq!(backend.received("/users").await.unwrap(), 1);
}

#[tokio::test]
async fn test_unexpected_status_is_reported() {
    let backend = MockBackend::start().await;
    backend
        .stub_json("get", "/posts/999", 404, json!({"error": "not found"}))
        .await;

    let client = ApiClient::for_base_url(backend.uri()).unwrap();
    let err = PostsApi::new(&client).get(999).await.unwrap_err();

    match err {
        E2eError::UnexpectedStatus { status, expected, body, .. } => {
            assert_eq!((status, expected), (404, 200));
            assert!(body.contains("not found"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_validator_reports_every_failure() {
    let backend = MockBackend::start().await;
    backend
        .stub_json("get", "/posts/1", 200, json!({"id": 1, "userId": 1, "title": "hello"}))
        .await;

    let client = ApiClient::for_base_url(backend.uri()).unwrap();
    let resp = client.get("/posts/1", RequestOptions::new()).await.unwrap();

    ResponseValidator::new()
        .status(200)
        .content_type("application/json")
        .has_fields(&["id", "userId", "title"])
        .field_eq("/title", json!("hello"))
        .max_duration(Duration::from_secs(5))
        .validate(&resp)
        .unwrap();

    let err = ResponseValidator::new()
        .status(201)
        .has_fields(&["body"])
        .field_eq("/userId", json!(2))
        .validate(&resp)
        .unwrap_err()
        .to_string();
    assert!(err.contains("3 soft assertion(s) failed"), "{}", err);
}

#[tokio::test]
async fn test_login_issues_bearer_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "abc123", "expiresIn": 3600})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let client = ApiClient::for_base_url(server.uri()).unwrap();
    let credentials = Credentials {
        username: "admin".to_string(),
        password: "secret".to_string(),
    };
    let authed = AuthApi::new(&client).authenticated_client(&credentials).await.unwrap();

    let resp = authed.get("/users/me", RequestOptions::new()).await.unwrap();
    assert_eq!(resp.status, 200);

    // The original client is untouched
    let anon = client.get("/users/me", RequestOptions::new()).await.unwrap();
    assert_eq!(anon.status, 404);
}

#[tokio::test]
async fn test_wait_for_status_rides_out_pending_responses() {
    let backend = MockBackend::start().await;
    backend
        .stub_sequence("get", "/jobs/7", 3, 202, 200, json!({"state": "done"}))
        .await;

    let client = ApiClient::for_base_url(backend.uri()).unwrap();
    let resp = client
        .wait_for_status("/jobs/7", 200, PollConfig::new(5_000, 20))
        .await
        .unwrap();

    assert_eq!(resp.json_value().unwrap()["state"], "done");
    assert_eq!(backend.received("/jobs/7").await.unwrap(), 4);
}

#[tokio::test]
async fn test_wait_for_status_times_out() {
    let backend = MockBackend::start().await;
    backend.stub_json("get", "/jobs/8", 202, json!({})).await;

    let client = ApiClient::for_base_url(backend.uri()).unwrap();
    let err = client
        .wait_for_status("/jobs/8", 200, PollConfig::new(300, 50))
        .await
        .unwrap_err();

    match err {
        E2eError::Timeout(t) => {
            assert!(t.attempts >= 2);
            assert!(t.to_string().contains("/jobs/8 to return 200"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_wait_for_requests_sees_background_traffic() {
    let backend = MockBackend::start().await;
    backend.stub_json("post", "/events", 202, json!({"queued": true})).await;

    let uri = backend.uri();
    let sender = tokio::spawn(async move {
        let client = ApiClient::for_base_url(uri).unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            client
                .post("/events", RequestOptions::new().json(&json!({"kind": "click"})).unwrap())
                .await
                .unwrap();
        }
    });

    let seen = backend
        .wait_for_requests("/events", 3, PollConfig::new(5_000, 20))
        .await
        .unwrap();
    assert_eq!(seen, 3);
    sender.await.unwrap();

    backend.reset().await;
    assert_eq!(backend.received("/events").await.unwrap(), 0);
}
