use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use deskly_admin::billing::{BillingProviderAdapter, StripeLikeAdapter};
use deskly_admin::error::AppError;
use deskly_admin::extractor::AdminUser;
use deskly_admin::subscriptions::{
    dispatch_action, SubscriptionAction, SubscriptionActionRequest,
};
use httpmock::prelude::*;
use serde_json::json;
use sqlx::PgPool;
use url::Url;
use uuid::Uuid;

// key: subscription-action-tests -> confirm guard,provider-first ordering

async fn seed_active_subscription(pool: &PgPool, provider_id: &str) -> Uuid {
    let user_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, display_name, role) VALUES ($1, $2, $3, 'customer') RETURNING id",
    )
    .bind(format!("{provider_id}@deskly.example"))
    .bind("hashed")
    .bind("Action Customer")
    .fetch_one(pool)
    .await
    .unwrap();

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO subscriptions (id, user_id, billing_status, provider_subscription_id, start_date) \
         VALUES ($1, $2, 'active', $3, CURRENT_DATE)",
    )
    .bind(id)
    .bind(user_id)
    .bind(provider_id)
    .execute(pool)
    .await
    .unwrap();
    id
}

fn adapter_for(server: &MockServer) -> Arc<dyn BillingProviderAdapter> {
    Arc::new(StripeLikeAdapter::new(
        Url::parse(&server.base_url()).unwrap(),
        "sk_test_123".into(),
    ))
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unconfirmed_actions_never_reach_the_provider(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let id = seed_active_subscription(&pool, "sub_guard").await;

    let server = MockServer::start_async().await;
    let cancel = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/subscriptions/sub_guard");
            then.status(200).json_body(json!({"id": "sub_guard"}));
        })
        .await;

    let err = dispatch_action(
        Extension(pool.clone()),
        Extension(adapter_for(&server)),
        AdminUser { user_id: 1 },
        Path(id),
        Json(SubscriptionActionRequest {
            action: SubscriptionAction::CancelNow,
            confirm: false,
        }),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(cancel.hits_async().await, 0);

    let status: String = sqlx::query_scalar("SELECT billing_status FROM subscriptions WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "active");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancel_now_updates_mirror_after_provider_success(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let id = seed_active_subscription(&pool, "sub_now").await;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/subscriptions/sub_now");
            then.status(200).json_body(json!({"id": "sub_now", "status": "canceled"}));
        })
        .await;

    let detail = dispatch_action(
        Extension(pool.clone()),
        Extension(adapter_for(&server)),
        AdminUser { user_id: 1 },
        Path(id),
        Json(SubscriptionActionRequest {
            action: SubscriptionAction::CancelNow,
            confirm: true,
        }),
    )
    .await
    .unwrap()
    .0;
    assert_eq!(detail.subscription.billing_status, "cancelled");
    assert!(detail.subscription.end_date.is_some());

    // the lifecycle forbids cancelling twice
    let err = dispatch_action(
        Extension(pool.clone()),
        Extension(adapter_for(&server)),
        AdminUser { user_id: 1 },
        Path(id),
        Json(SubscriptionActionRequest {
            action: SubscriptionAction::CancelAtPeriodEnd,
            confirm: true,
        }),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancel_at_period_end_keeps_status_until_provider_sync(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let id = seed_active_subscription(&pool, "sub_sched").await;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/subscriptions/sub_sched");
            then.status(200).json_body(json!({"id": "sub_sched", "status": "active"}));
        })
        .await;

    let detail = dispatch_action(
        Extension(pool.clone()),
        Extension(adapter_for(&server)),
        AdminUser { user_id: 1 },
        Path(id),
        Json(SubscriptionActionRequest {
            action: SubscriptionAction::CancelAtPeriodEnd,
            confirm: true,
        }),
    )
    .await
    .unwrap()
    .0;
    // the period-end cancel is provider-owned; locally only the flag flips
    assert_eq!(detail.subscription.billing_status, "active");
    assert!(detail.subscription.cancel_at_period_end);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn provider_failure_leaves_the_mirror_untouched(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let id = seed_active_subscription(&pool, "sub_fail").await;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/subscriptions/sub_fail");
            then.status(502).body("upstream unavailable");
        })
        .await;

    let err = dispatch_action(
        Extension(pool.clone()),
        Extension(adapter_for(&server)),
        AdminUser { user_id: 1 },
        Path(id),
        Json(SubscriptionActionRequest {
            action: SubscriptionAction::CancelNow,
            confirm: true,
        }),
    )
    .await
    .err()
    .unwrap();
    assert!(err.to_string().contains("Billing provider rejected"));

    let (status, at_period_end): (String, bool) = sqlx::query_as(
        "SELECT billing_status, cancel_at_period_end FROM subscriptions WHERE id = $1",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "active");
    assert!(!at_period_end);
}
