use std::sync::Arc;

use chrono::{Days, Utc};
use reqwest::StatusCode;
use serde_json::json;

use stocklot_api::app::services::{AppServices, build_in_memory_services};
use stocklot_api::app::build_app_with_services;
use stocklot_catalog::{Variant, Warehouse};
use stocklot_core::{AggregateId, UserId, VariantId, WarehouseId};

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Build the same router as prod, but bind to an ephemeral port and
        // keep a handle on the services for catalog seeding.
        let services = Arc::new(build_in_memory_services());
        let app = build_app_with_services(services.clone());

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
            services,
            handle,
        }
    }

    fn seed_variant(&self) -> VariantId {
        let variant = Variant::new(VariantId::new(), AggregateId::new(), "SKU-API");
        let id = variant.id;
        self.services.variants().upsert(variant);
        id
    }

    fn seed_warehouse(&self) -> WarehouseId {
        let warehouse = Warehouse::new(WarehouseId::new(), "API Warehouse");
        let id = warehouse.id;
        self.services.warehouses().upsert(warehouse);
        id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn actor_header() -> String {
    UserId::new().to_string()
}

fn inward_body(variant_id: VariantId, warehouse_id: WarehouseId, quantity: i64) -> serde_json::Value {
    json!({
        "variant_id": variant_id.to_string(),
        "warehouse_id": warehouse_id.to_string(),
        "batch_number": "B1",
        "expiry": Utc::now()
            .date_naive()
            .checked_add_days(Days::new(365))
            .unwrap()
            .to_string(),
        "unit_cost": 10,
        "quantity": quantity,
        "reason": "goods receipt",
    })
}

/// The write path is synchronous but projections update off the bus; poll
/// briefly until the read side catches up.
async fn current_stock_eventually(
    client: &reqwest::Client,
    base_url: &str,
    actor: &str,
    variant_id: VariantId,
    warehouse_id: Option<WarehouseId>,
    expected: i64,
) -> i64 {
    let mut query = vec![("variant", variant_id.to_string())];
    if let Some(w) = warehouse_id {
        query.push(("warehouse", w.to_string()));
    }

    for _ in 0..50 {
        let res = client
            .get(format!("{}/stock/current", base_url))
            .query(&query)
            .header("x-actor-id", actor)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body: serde_json::Value = res.json().await.unwrap();
        let current = body["current_stock"].as_i64().unwrap();
        if current == expected {
            return current;
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("stock did not become visible in projection within timeout");
}

#[tokio::test]
async fn requests_without_actor_header_are_rejected() {
    let srv = TestServer::spawn().await;
    let variant_id = srv.seed_variant();
    let warehouse_id = srv.seed_warehouse();

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/stock/inward", srv.base_url))
        .json(&inward_body(variant_id, warehouse_id, 10))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_does_not_require_an_actor() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn inward_is_visible_in_stock_ledger_and_stats() {
    let srv = TestServer::spawn().await;
    let variant_id = srv.seed_variant();
    let warehouse_id = srv.seed_warehouse();
    let actor = actor_header();

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/stock/inward", srv.base_url))
        .header("x-actor-id", &actor)
        .json(&inward_body(variant_id, warehouse_id, 100))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["events_committed"], 1);

    current_stock_eventually(&client, &srv.base_url, &actor, variant_id, None, 100).await;

    let res = client
        .get(format!("{}/ledger/", srv.base_url))
        .query(&[("variant", variant_id.to_string())])
        .header("x-actor-id", &actor)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["kind"], "purchase");
    assert_eq!(items[0]["running_balance"], 100);

    let res = client
        .get(format!("{}/reports/stats", srv.base_url))
        .header("x-actor-id", &actor)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["asset_value"], 1000);
}

#[tokio::test]
async fn transfer_and_adjust_flow_through_the_live_view() {
    let srv = TestServer::spawn().await;
    let variant_id = srv.seed_variant();
    let w1 = srv.seed_warehouse();
    let w2 = srv.seed_warehouse();
    let actor = actor_header();

    let client = reqwest::Client::new();
    client
        .post(format!("{}/stock/inward", srv.base_url))
        .header("x-actor-id", &actor)
        .json(&inward_body(variant_id, w1, 100))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/stock/transfer", srv.base_url))
        .header("x-actor-id", &actor)
        .json(&json!({
            "variant_id": variant_id.to_string(),
            "source_warehouse_id": w1.to_string(),
            "target_warehouse_id": w2.to_string(),
            "quantity": 30,
            "reason": "rebalance",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    current_stock_eventually(&client, &srv.base_url, &actor, variant_id, Some(w2), 30).await;
    current_stock_eventually(&client, &srv.base_url, &actor, variant_id, Some(w1), 70).await;

    // Draining more than the warehouse holds is rejected.
    let res = client
        .post(format!("{}/stock/adjust", srv.base_url))
        .header("x-actor-id", &actor)
        .json(&json!({
            "variant_id": variant_id.to_string(),
            "warehouse_id": w2.to_string(),
            "delta": -31,
            "reason": "shrinkage",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_stock");
}

#[tokio::test]
async fn invalid_requests_surface_validation_errors() {
    let srv = TestServer::spawn().await;
    let variant_id = srv.seed_variant();
    let warehouse_id = srv.seed_warehouse();
    let actor = actor_header();

    let client = reqwest::Client::new();

    // Zero quantity.
    let res = client
        .post(format!("{}/stock/inward", srv.base_url))
        .header("x-actor-id", &actor)
        .json(&inward_body(variant_id, warehouse_id, 0))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Unknown variant.
    let res = client
        .post(format!("{}/stock/inward", srv.base_url))
        .header("x-actor-id", &actor)
        .json(&inward_body(VariantId::new(), warehouse_id, 10))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Malformed id.
    let res = client
        .post(format!("{}/stock/inward", srv.base_url))
        .header("x-actor-id", &actor)
        .json(&json!({
            "variant_id": "not-a-uuid",
            "warehouse_id": warehouse_id.to_string(),
            "batch_number": "B1",
            "expiry": "2027-01-01",
            "unit_cost": 10,
            "quantity": 1,
            "reason": "grn",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
