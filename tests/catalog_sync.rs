use deskly_admin::billing::{BillingService, StripeLikeAdapter, SyncOutcome};
use httpmock::prelude::*;
use serde_json::json;
use sqlx::PgPool;
use url::Url;
use uuid::Uuid;

// key: catalog-sync-tests -> dry-run vs apply,created/skipped outcomes

async fn seed_product(pool: &PgPool, code: &str, price_cents: i64, status: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO products (id, product_code, name, category, monthly_price_cents, stock_quantity, status) \
         VALUES ($1, $2, $3, 'desks', $4, 10, $5)",
    )
    .bind(id)
    .bind(code)
    .bind(format!("Product {code}"))
    .bind(price_cents)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
    id
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn dry_run_previews_without_creating_prices(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_product(&pool, "DSK-DESK01", 25_900, "active").await;
    seed_product(&pool, "DSK-CHAIR1", 15_900, "active").await;
    // drafts stay out of the provider catalog
    seed_product(&pool, "DSK-DRAFT1", 9_900, "draft").await;

    let server = MockServer::start_async().await;
    // DSK-DESK01 already has an equivalent price object
    let desk_lookup = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/prices")
                .query_param("lookup_keys[]", "DSK-DESK01");
            then.status(200).json_body(json!({
                "data": [{"id": "price_desk", "unit_amount": 25_900, "currency": "myr"}]
            }));
        })
        .await;
    let chair_lookup = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/prices")
                .query_param("lookup_keys[]", "DSK-CHAIR1");
            then.status(200).json_body(json!({ "data": [] }));
        })
        .await;
    let create_price = server
        .mock_async(|when, then| {
            when.method(POST).path("/prices");
            then.status(200).json_body(json!({"id": "price_new_chair"}));
        })
        .await;

    let adapter = StripeLikeAdapter::new(
        Url::parse(&server.base_url()).unwrap(),
        "sk_test_123".into(),
    );
    let service = BillingService::new(pool.clone());

    let preview = service
        .sync_catalog(&adapter, true, None, None)
        .await
        .unwrap();
    assert_eq!(preview.created_count, 1);
    assert_eq!(preview.skipped_count, 1);
    assert_eq!(preview.outcomes.len(), 2, "draft products are not synced");
    assert_eq!(create_price.hits_async().await, 0, "dry run never writes");

    let desk = preview
        .outcomes
        .iter()
        .find(|outcome| outcome.product_code == "DSK-DESK01")
        .unwrap();
    assert_eq!(desk.outcome, SyncOutcome::Skipped);
    assert_eq!(desk.provider_price_id.as_deref(), Some("price_desk"));

    // the same inputs applied for real create the missing price
    let applied = service
        .sync_catalog(&adapter, false, None, None)
        .await
        .unwrap();
    assert_eq!(applied.created_count, 1);
    assert_eq!(applied.skipped_count, 1);
    assert_eq!(create_price.hits_async().await, 1);
    let chair = applied
        .outcomes
        .iter()
        .find(|outcome| outcome.product_code == "DSK-CHAIR1")
        .unwrap();
    assert_eq!(chair.provider_price_id.as_deref(), Some("price_new_chair"));

    assert_eq!(desk_lookup.hits_async().await, 2);
    assert_eq!(chair_lookup.hits_async().await, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn price_change_creates_a_new_price_object(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let product_id = seed_product(&pool, "DSK-DESK02", 27_900, "active").await;

    let server = MockServer::start_async().await;
    // an old price exists for the previous amount only
    server
        .mock_async(|when, then| {
            when.method(GET).path("/prices");
            then.status(200).json_body(json!({
                "data": [{"id": "price_old", "unit_amount": 25_900, "currency": "myr"}]
            }));
        })
        .await;
    let create_price = server
        .mock_async(|when, then| {
            when.method(POST).path("/prices");
            then.status(200).json_body(json!({"id": "price_v2"}));
        })
        .await;

    let adapter = StripeLikeAdapter::new(
        Url::parse(&server.base_url()).unwrap(),
        "sk_test_123".into(),
    );
    let report = BillingService::new(pool.clone())
        .sync_catalog(&adapter, false, None, Some(vec![product_id]))
        .await
        .unwrap();

    // no `updated` outcome exists; a changed amount means a fresh object
    assert_eq!(report.created_count, 1);
    assert_eq!(report.skipped_count, 0);
    assert_eq!(create_price.hits_async().await, 1);
}
