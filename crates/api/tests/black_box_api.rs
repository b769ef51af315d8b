use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use stockroom_api::AppConfig;
use stockroom_api::app::{AppServices, build_router};
use stockroom_ratelimit::{Limit, LockoutPolicy};

struct TestServer {
    base_url: String,
    user: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: AppConfig) -> Self {
        // Same router as prod, in-memory backend, ephemeral port.
        let services = Arc::new(AppServices::in_memory(&config));
        let app = build_router(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            user: Uuid::new_v4().to_string(),
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(format!("{}{}", self.base_url, path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-User-Id", &self.user)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn warehouse(&self, code: &str) -> String {
        let (status, body) = self
            .post(
                "/warehouses",
                json!({
                    "code": code,
                    "name": format!("Warehouse {code}"),
                    "address": {
                        "line1": "1 Dock Road",
                        "city": "Leeds",
                        "postal_code": "LS1 4AP",
                        "country": "GB"
                    }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["warehouse"]["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn roomy_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.rate_limit = config.rate_limit.with_default_limit(Limit::new(1000.0, 1000));
    config
}

#[tokio::test]
async fn health_is_open_and_mutations_need_an_identity() {
    let srv = TestServer::spawn(roomy_config()).await;

    let res = srv.client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv
        .client
        .post(format!("{}/inventory/adjust", srv.base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .post(format!("{}/inventory/adjust", srv.base_url))
        .header("X-User-Id", "not-a-uuid")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn stock_lifecycle_adjust_reserve_transfer_query() {
    let srv = TestServer::spawn(roomy_config()).await;
    let a = srv.warehouse("WH-A").await;
    let b = srv.warehouse("WH-B").await;
    let product = Uuid::new_v4().to_string();

    let (status, body) = srv
        .post(
            "/inventory/adjust",
            json!({ "product_id": product, "warehouse_id": a, "delta": 10, "reason": "opening" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["inventory"]["quantity_on_hand"], 10);

    let (status, body) = srv
        .post(
            "/inventory/reserve",
            json!({ "product_id": product, "warehouse_id": a, "quantity": 4 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["quantity_reserved"], 4);

    let (status, body) = srv
        .get(&format!(
            "/inventory/availability?product_id={product}&warehouse_id={a}&quantity=7"
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available_qty"], 6);
    assert_eq!(body["can_fulfill"], false);

    let (status, body) = srv
        .post(
            "/inventory/transfer",
            json!({
                "product_id": product,
                "from_warehouse": a,
                "to_warehouse": b,
                "quantity": 3,
                "reason": "rebalance"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["source"]["quantity_on_hand"], 7);
    assert_eq!(body["destination"]["quantity_on_hand"], 3);

    let (status, body) = srv.get(&format!("/inventory?product_id={product}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, body) = srv
        .get(&format!("/transactions?product_id={product}&types=transfer_in,transfer_out"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, body) = srv.get(&format!("/warehouses/{b}/utilization")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_stock"], 3);
}

#[tokio::test]
async fn domain_errors_map_to_statuses() {
    let srv = TestServer::spawn(roomy_config()).await;
    let a = srv.warehouse("WH-A").await;
    let product = Uuid::new_v4().to_string();

    let (status, body) = srv
        .post(
            "/inventory/reserve",
            json!({ "product_id": product, "warehouse_id": a, "quantity": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");

    srv.post(
        "/inventory/adjust",
        json!({ "product_id": product, "warehouse_id": a, "delta": 2 }),
    )
    .await;
    let (status, body) = srv
        .post(
            "/inventory/reserve",
            json!({ "product_id": product, "warehouse_id": a, "quantity": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INSUFFICIENT_STOCK");

    let (status, body) = srv
        .post(
            "/inventory/release",
            json!({ "reservation_id": Uuid::new_v4(), "quantity": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["error"], "NOT_IMPLEMENTED");

    let (status, body) = srv.get("/inventory?sort_by=password").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");

    let (status, body) = srv.get(&format!("/warehouses/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");

    let (status, _) = srv.get("/transactions/not-an-id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = srv
        .post(
            "/inventory/transfer",
            json!({ "product_id": product, "from_warehouse": a, "to_warehouse": a, "quantity": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = srv
        .post(
            "/warehouses",
            json!({
                "code": "WH-A",
                "name": "Duplicate",
                "address": { "line1": "x", "city": "Leeds", "postal_code": "LS1 4AP", "country": "GB" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "ALREADY_EXISTS");
}

#[tokio::test]
async fn gated_movements_wait_for_approval() {
    let srv = TestServer::spawn(roomy_config()).await;
    let a = srv.warehouse("WH-A").await;
    let product = Uuid::new_v4().to_string();
    srv.post(
        "/inventory/adjust",
        json!({ "product_id": product, "warehouse_id": a, "delta": 5 }),
    )
    .await;

    let (status, body) = srv
        .post(
            "/inventory/movements",
            json!({
                "product_id": product,
                "warehouse_id": a,
                "transaction_type": "damage",
                "quantity": -2,
                "reason": "forklift"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["inventory"]["quantity_on_hand"], 5);
    let tx_id = body["transaction"]["id"].as_str().unwrap().to_string();

    let (_, pending) = srv.get("/transactions?approval=pending").await;
    assert_eq!(pending["total"], 1);

    let (status, body) = srv.post(&format!("/transactions/{tx_id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["inventory"]["quantity_on_hand"], 3);

    let (status, body) = srv.post(&format!("/transactions/{tx_id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
}

#[tokio::test]
async fn clients_are_throttled_with_retry_after() {
    let mut config = AppConfig::default();
    config.rate_limit = config.rate_limit.with_default_limit(Limit::new(0.01, 3));
    let srv = TestServer::spawn(config).await;

    for _ in 0..3 {
        let (status, _) = srv.get("/health").await;
        assert_eq!(status, StatusCode::OK);
    }
    let res = srv.client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "RATE_LIMITED");
}

#[tokio::test]
async fn repeated_failed_logins_lock_the_account() {
    let mut config = roomy_config();
    config.lockout = LockoutPolicy::default().with_threshold(2);
    let srv = TestServer::spawn(config).await;

    let attempt = |success: bool| json!({ "identifier": "ops@example.com", "success": success });

    let (status, body) = srv.post("/auth/login-attempt", attempt(false)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");

    let (status, body) = srv.post("/auth/login-attempt", attempt(false)).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"], "ACCOUNT_LOCKED");
    assert!(body["unlock_time"].is_string());

    let (status, _) = srv.post("/auth/login-attempt", attempt(true)).await;
    assert_eq!(status, StatusCode::LOCKED);

    let (status, _) = srv
        .post("/auth/login-attempt", json!({ "identifier": "other@example.com", "success": true }))
        .await;
    assert_eq!(status, StatusCode::OK);
}
