use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use orchard_api::app::services::AppServices;
use orchard_api::config::AppConfig;
use orchard_auth::{AppRole, ExternalId};
use orchard_core::SystemClock;
use orchard_infra::{InMemoryClaimsStore, InMemoryStore, Store};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    store: Arc<InMemoryStore>,
    claims: Arc<InMemoryClaimsStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, over in-memory stores the test can reach into.
        let config = AppConfig::for_tests(JWT_SECRET);
        let store = Arc::new(InMemoryStore::new());
        let claims = Arc::new(InMemoryClaimsStore::new());
        let services = Arc::new(AppServices::new(
            store.clone(),
            claims.clone(),
            Arc::new(SystemClock),
            &config,
        ));
        let app = orchard_api::app::router(services, &config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            claims,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Provision `sub` through the API, then set its stored role directly.
    async fn promote(&self, client: &reqwest::Client, sub: &str, role: AppRole) {
        let res = client
            .get(self.url("/me"))
            .bearer_auth(mint_jwt(sub, None))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let mut tx = self.store.begin().await.unwrap();
        let profile = tx
            .profile_by_external_id(&ExternalId::new(sub).unwrap())
            .await
            .unwrap()
            .expect("profile provisioned by /me");
        tx.set_profile_role(profile.id, role).await.unwrap();
        tx.commit().await.unwrap();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(sub: &str, app_role: Option<&str>) -> String {
    let now = Utc::now();
    let mut claims = json!({
        "sub": sub,
        "iat": now.timestamp(),
        "exp": (now + ChronoDuration::minutes(10)).timestamp(),
    });
    if let Some(role) = app_role {
        claims["app_role"] = json!(role);
    }

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn create_product(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    product_type: &str,
) -> String {
    let res = client
        .post(srv.url("/products"))
        .bearer_auth(token)
        .json(&json!({ "name": format!("{product_type} product"), "product_type": product_type, "price_cents": 1500 }))
        .send()
        .await
        .unwrap();
    if res.status() != StatusCode::CREATED {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        panic!("expected 201 from create, got {status} body={body}");
    }
    let created: serde_json::Value = res.json().await.unwrap();
    created["id"].as_str().unwrap().to_string()
}

async fn me(client: &reqwest::Client, srv: &TestServer, token: &str) -> serde_json::Value {
    let res = client.get(srv.url("/me")).bearer_auth(token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

#[tokio::test]
async fn health_is_public_and_everything_else_needs_a_token() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/me")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/me"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn first_request_provisions_a_user_profile() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // The token claims ADMIN; the stored role is what counts.
    let token = mint_jwt("idp|alice", Some("ADMIN"));
    let first = me(&client, &srv, &token).await;
    assert_eq!(first["external_id"], "idp|alice");
    assert_eq!(first["app_role"], "USER");
    assert_eq!(first["claimed_role"], "ADMIN");
    assert_eq!(first["claims_in_sync"], false);
    assert_eq!(first["membership_state"], "NONE");

    let again = me(&client, &srv, &token).await;
    assert_eq!(again["profile_id"], first["profile_id"]);

    let res = client
        .post(srv.url("/products"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Crate", "product_type": "ORANGE", "price_cents": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn buying_a_membership_makes_the_buyer_a_member() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    srv.promote(&client, "idp|admin", AppRole::Admin).await;
    let admin = mint_jwt("idp|admin", Some("ADMIN"));
    let membership = create_product(&client, &srv, &admin, "MEMBERSHIP").await;
    let apple = create_product(&client, &srv, &admin, "APPLE").await;

    let buyer = mint_jwt("idp|bob", None);
    let res = client
        .get(srv.url(&format!("/products/{apple}")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(srv.url(&format!("/products/{membership}/purchase")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["quantity"], 1);
    assert!(body["term_ends_at"].is_string());
    assert!(body["claims_warnings"].as_array().unwrap().is_empty());

    let profile = me(&client, &srv, &buyer).await;
    assert_eq!(profile["app_role"], "MEMBER");
    assert_eq!(profile["membership_state"], "ACTIVE");

    let claim = srv.claims.record(&ExternalId::new("idp|bob").unwrap()).unwrap();
    assert_eq!(claim.app_role.as_deref(), Some("MEMBER"));

    let res = client
        .get(srv.url(&format!("/products/{apple}")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url("/permissions/check?permission=access:member"))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    let decision: serde_json::Value = res.json().await.unwrap();
    assert_eq!(decision["allowed"], true);
}

#[tokio::test]
async fn staff_cannot_archive_apple_products() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    srv.promote(&client, "idp|staff", AppRole::Staff).await;
    srv.promote(&client, "idp|admin", AppRole::Admin).await;
    let staff = mint_jwt("idp|staff", Some("STAFF"));
    let admin = mint_jwt("idp|admin", Some("ADMIN"));

    let apple = create_product(&client, &srv, &staff, "APPLE").await;

    let res = client
        .post(srv.url(&format!("/products/{apple}/archive")))
        .bearer_auth(&staff)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(srv.url(&format!("/products/{apple}/archive")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url(&format!("/products/{apple}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn archiving_a_membership_product_downgrades_subscribers() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    srv.promote(&client, "idp|admin", AppRole::Admin).await;
    let admin = mint_jwt("idp|admin", Some("ADMIN"));
    let membership = create_product(&client, &srv, &admin, "MEMBERSHIP").await;

    let subscribers = ["idp|s1", "idp|s2"];
    for sub in subscribers {
        let res = client
            .post(srv.url(&format!("/products/{membership}/purchase")))
            .bearer_auth(mint_jwt(sub, None))
            .json(&json!({ "quantity": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = client
        .post(srv.url(&format!("/products/{membership}/archive")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["cancelled_purchases"], 2);
    assert_eq!(report["downgraded_profiles"], 2);
    assert!(report["product"]["archived_at"].is_string());

    for sub in subscribers {
        let profile = me(&client, &srv, &mint_jwt(sub, None)).await;
        assert_eq!(profile["app_role"], "USER");
        assert_eq!(profile["membership_state"], "EXPIRED");
    }

    let res = client
        .get(srv.url("/admin/purchases"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let purchases: Vec<serde_json::Value> = res.json().await.unwrap();
    assert_eq!(purchases.len(), 2);
    assert!(purchases.iter().all(|p| p["cancelled_at"].is_string()));
}

#[tokio::test]
async fn claims_refresh_returns_a_token_with_the_stored_role() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    srv.promote(&client, "idp|carol", AppRole::Staff).await;
    let stale = mint_jwt("idp|carol", None);

    let res = client
        .post(srv.url("/claims/refresh"))
        .bearer_auth(&stale)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["app_role"], "STAFF");
    assert_eq!(body["changed"], true);

    let fresh = body["token"].as_str().unwrap();
    let profile = me(&client, &srv, fresh).await;
    assert_eq!(profile["claimed_role"], "STAFF");
    assert_eq!(profile["claims_in_sync"], true);
}

#[tokio::test]
async fn claims_outage_surfaces_as_service_unavailable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_jwt("idp|dave", None);
    me(&client, &srv, &token).await;

    srv.claims.set_unavailable(true);
    let res = client
        .post(srv.url("/claims/reconcile"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "claims_unavailable");
}

#[tokio::test]
async fn malformed_ids_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/purchases/not-a-uuid/cancel"))
        .bearer_auth(mint_jwt("idp|erin", None))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");
}
