use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use deskly_admin::delivery_orders::{update_status, DoStatus};
use deskly_admin::error::AppError;
use deskly_admin::extractor::AdminUser;
use sqlx::{PgPool, Row};
use uuid::Uuid;

// key: delivery-order-tests -> lifecycle,side-field invariant

async fn seed_order(pool: &PgPool) -> Uuid {
    let user_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, display_name, role) VALUES ($1, $2, $3, 'customer') RETURNING id",
    )
    .bind("fleet@example.com")
    .bind("hashed")
    .bind("Fleet Customer")
    .fetch_one(pool)
    .await
    .unwrap();

    let subscription_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO subscriptions (id, user_id, billing_status, start_date) VALUES ($1, $2, 'active', CURRENT_DATE)",
    )
    .bind(subscription_id)
    .bind(user_id)
    .execute(pool)
    .await
    .unwrap();

    let order_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO delivery_orders (id, subscription_id, customer_name, items_summary, status) \
         VALUES ($1, $2, $3, $4, 'confirmed')",
    )
    .bind(order_id)
    .bind(subscription_id)
    .bind("Fleet Customer")
    .bind("2x Standing Desk, 4x Task Chair")
    .execute(pool)
    .await
    .unwrap();

    order_id
}

async fn side_fields(pool: &PgPool, id: Uuid) -> (String, Option<String>, Option<DateTime<Utc>>, Option<String>) {
    let row = sqlx::query(
        "SELECT status, failure_reason, rescheduled_at, cancelled_reason FROM delivery_orders WHERE id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .unwrap();
    (
        row.get("status"),
        row.get("failure_reason"),
        row.get("rescheduled_at"),
        row.get("cancelled_reason"),
    )
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn retry_path_clears_stale_side_fields(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let order_id = seed_order(&pool).await;
    let admin = || AdminUser { user_id: 1 };

    let Json(order) = update_status(
        Extension(pool.clone()),
        admin(),
        Path(order_id),
        Json(DoStatus::Dispatched),
    )
    .await
    .unwrap();
    assert_eq!(order.status, DoStatus::Dispatched);

    let Json(order) = update_status(
        Extension(pool.clone()),
        admin(),
        Path(order_id),
        Json(DoStatus::Failed {
            failure_reason: "customer unreachable".into(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(order.status.kind(), "failed");
    let (status, failure, resched, cancel) = side_fields(&pool, order_id).await;
    assert_eq!(status, "failed");
    assert_eq!(failure.as_deref(), Some("customer unreachable"));
    assert!(resched.is_none());
    assert!(cancel.is_none());

    // re-dispatch must clear the failure reason
    let Json(order) = update_status(
        Extension(pool.clone()),
        admin(),
        Path(order_id),
        Json(DoStatus::Dispatched),
    )
    .await
    .unwrap();
    assert_eq!(order.status, DoStatus::Dispatched);
    let (status, failure, resched, cancel) = side_fields(&pool, order_id).await;
    assert_eq!(status, "dispatched");
    assert!(failure.is_none() && resched.is_none() && cancel.is_none());

    let when: DateTime<Utc> = "2025-04-02T10:30:00Z".parse().unwrap();
    let Json(order) = update_status(
        Extension(pool.clone()),
        admin(),
        Path(order_id),
        Json(DoStatus::Rescheduled {
            rescheduled_at: when,
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        order.status,
        DoStatus::Rescheduled {
            rescheduled_at: when
        }
    );
    let (_, failure, resched, cancel) = side_fields(&pool, order_id).await;
    assert_eq!(resched, Some(when));
    assert!(failure.is_none() && cancel.is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn terminal_states_reject_further_transitions(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let order_id = seed_order(&pool).await;
    let admin = || AdminUser { user_id: 1 };

    update_status(
        Extension(pool.clone()),
        admin(),
        Path(order_id),
        Json(DoStatus::Dispatched),
    )
    .await
    .unwrap();
    update_status(
        Extension(pool.clone()),
        admin(),
        Path(order_id),
        Json(DoStatus::Delivered),
    )
    .await
    .unwrap();

    let err = update_status(
        Extension(pool.clone()),
        admin(),
        Path(order_id),
        Json(DoStatus::Confirmed),
    )
    .await
    .err()
    .unwrap();
    match err {
        AppError::BadRequest(message) => {
            assert!(message.contains("delivered"));
            assert!(message.contains("confirmed"));
        }
        other => panic!("expected BadRequest, got {other:?}"),
    }

    let (status, ..) = side_fields(&pool, order_id).await;
    assert_eq!(status, "delivered");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unknown_order_is_not_found(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let err = update_status(
        Extension(pool.clone()),
        AdminUser { user_id: 1 },
        Path(Uuid::new_v4()),
        Json(DoStatus::Dispatched),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, AppError::NotFound));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn transition_refreshes_updated_at(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let order_id = seed_order(&pool).await;

    let before: DateTime<Utc> =
        sqlx::query_scalar("SELECT updated_at FROM delivery_orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&pool)
            .await
            .unwrap();

    let Json(order) = update_status(
        Extension(pool.clone()),
        AdminUser { user_id: 1 },
        Path(order_id),
        Json(DoStatus::Dispatched),
    )
    .await
    .unwrap();
    assert!(order.updated_at >= before);
}
