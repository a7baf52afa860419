#![allow(clippy::unwrap_used)]
// Integration tests for the token and subscription REST APIs using wiremock.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{basic_auth, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use c8y_api::notification2::{
    ApiFilter, Subscription, SubscriptionContext, SubscriptionQuery, Subscriptions, TokenRequest,
    Tokens,
};
use c8y_api::{Credentials, Error, RestClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let credentials = Credentials::basic("t100", "admin", SecretString::from("s3cret".to_owned()));
    let client = RestClient::with_client(reqwest::Client::new(), base_url, credentials);
    (server, client)
}

fn token_request() -> TokenRequest {
    TokenRequest {
        subscriber: "pumpListener".into(),
        subscription: "PumpSubscription".into(),
        expires_in_minutes: 1440,
        shared: false,
        token_type: "notification".into(),
        non_persistent: false,
    }
}

// ── Tokens ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generate_token() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/notification2/token"))
        .and(basic_auth("t100/admin", "s3cret"))
        .and(body_json(json!({
            "subscriber": "pumpListener",
            "subscription": "PumpSubscription",
            "expiresInMinutes": 1440,
            "shared": false,
            "type": "notification",
            "nonPersistent": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "eyJhbGciOi.x.y" })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = Tokens::new(client);
    let token = tokens.generate(&token_request()).await.unwrap();
    assert_eq!(token.expose_secret(), "eyJhbGciOi.x.y");
}

#[tokio::test]
async fn test_generate_token_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/notification2/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let err = Tokens::new(client)
        .generate(&token_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }), "{err:?}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_generate_token_unknown_subscription() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/notification2/token"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({ "error": "notification2/Not Found", "message": "no such subscription" })),
        )
        .mount(&server)
        .await;

    let err = Tokens::new(client)
        .generate(&token_request())
        .await
        .unwrap_err();
    match err {
        Error::Api { status, ref message } => {
            assert_eq!(status, 404);
            assert!(message.contains("no such subscription"));
        }
        ref other => panic!("expected Api error, got {other:?}"),
    }
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unsubscribe_subscriber() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/notification2/unsubscribe"))
        .and(query_param("token", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "DONE" })))
        .expect(1)
        .mount(&server)
        .await;

    Tokens::new(client)
        .unsubscribe_subscriber(&SecretString::from("tok-1".to_owned()))
        .await
        .unwrap();
}

// ── Subscriptions ───────────────────────────────────────────────────

#[tokio::test]
async fn test_create_subscription() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/notification2/subscriptions"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "subscription": "PumpSubscription",
            "context": "mo",
            "source": { "id": "4711" },
            "subscriptionFilter": { "apis": ["measurements"] }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "9001",
            "subscription": "PumpSubscription",
            "context": "mo",
            "source": { "id": "4711", "self": "https://t100/inventory/managedObjects/4711" },
            "subscriptionFilter": { "apis": ["measurements"] },
            "self": "https://t100/notification2/subscriptions/9001"
        })))
        .mount(&server)
        .await;

    let sub = Subscription::managed_object("PumpSubscription", "4711")
        .with_apis([ApiFilter::Measurements]);
    let created = Subscriptions::new(&client).create(&sub).await.unwrap();

    assert_eq!(created.id.as_deref(), Some("9001"));
    assert_eq!(created.context, SubscriptionContext::ManagedObject);
    assert_eq!(created.source.unwrap().id, "4711");
}

#[tokio::test]
async fn test_list_subscriptions_pages_until_short_page() {
    let (server, client) = setup().await;

    let full_page: Vec<_> = (0..100)
        .map(|i| json!({ "id": format!("{i}"), "subscription": format!("Sub{i}"), "context": "tenant" }))
        .collect();

    Mock::given(method("GET"))
        .and(path("/notification2/subscriptions"))
        .and(query_param("context", "tenant"))
        .and(query_param("currentPage", "1"))
        .and(query_param("pageSize", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "subscriptions": full_page })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/notification2/subscriptions"))
        .and(query_param("currentPage", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptions": [{ "id": "100", "subscription": "Last", "context": "tenant" }]
        })))
        .mount(&server)
        .await;

    let query = SubscriptionQuery {
        context: Some(SubscriptionContext::Tenant),
        ..SubscriptionQuery::default()
    };
    let all = Subscriptions::new(&client).list(&query).await.unwrap();

    assert_eq!(all.len(), 101);
    assert_eq!(all[100].name, "Last");
}

#[tokio::test]
async fn test_count_subscriptions() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/notification2/subscriptions"))
        .and(query_param("source", "4711"))
        .and(query_param("withTotalElements", "true"))
        .and(query_param("pageSize", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptions": [],
            "statistics": { "currentPage": 1, "pageSize": 1, "totalElements": 3 }
        })))
        .mount(&server)
        .await;

    let query = SubscriptionQuery {
        source: Some("4711".into()),
        ..SubscriptionQuery::default()
    };
    assert_eq!(Subscriptions::new(&client).count(&query).await.unwrap(), 3);
}

#[tokio::test]
async fn test_delete_subscription_and_by_filter() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/notification2/subscriptions/9001"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/notification2/subscriptions"))
        .and(query_param("context", "mo"))
        .and(query_param("source", "4711"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let subs = Subscriptions::new(&client);
    subs.delete("9001").await.unwrap();
    subs.delete_by(&SubscriptionQuery {
        context: Some(SubscriptionContext::ManagedObject),
        source: Some("4711".into()),
        ..SubscriptionQuery::default()
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_get_subscription_malformed_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/notification2/subscriptions/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let err = Subscriptions::new(&client).get("1").await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert!(body.contains("proxy error")),
        other => panic!("expected Deserialization error, got {other:?}"),
    }
}
