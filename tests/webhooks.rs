use std::time::Duration;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use deskly_admin::error::AppError;
use deskly_admin::webhooks::{ingest_billing_webhook, start_webhook_worker, SIGNATURE_HEADER};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use sqlx::PgPool;
use uuid::Uuid;

// key: webhook-tests -> signature gate,idempotent mirroring

const SECRET: &str = "whsec_test";

fn signed_headers(body: &[u8]) -> HeaderMap {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    let signature = hex::encode(mac.finalize().into_bytes());
    let mut headers = HeaderMap::new();
    headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());
    headers
}

async fn seed_subscription(pool: &PgPool, provider_id: &str) -> Uuid {
    let user_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, display_name, role) VALUES ($1, $2, $3, 'customer') RETURNING id",
    )
    .bind(format!("{provider_id}@deskly.example"))
    .bind("hashed")
    .bind("Webhook Customer")
    .fetch_one(pool)
    .await
    .unwrap();

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO subscriptions (id, user_id, billing_status, provider_subscription_id, start_date) \
         VALUES ($1, $2, 'pending_payment', $3, CURRENT_DATE)",
    )
    .bind(id)
    .bind(user_id)
    .bind(provider_id)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn wait_for_event_status(pool: &PgPool, event_id: &str, expected: &str) {
    for _ in 0..50 {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM billing_webhook_events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .unwrap();
        if status.as_deref() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("event {event_id} never reached status {expected}");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn signed_events_are_mirrored_exactly_once(pool: PgPool) {
    std::env::set_var("BILLING_WEBHOOK_SECRET", SECRET);
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let subscription_id = seed_subscription(&pool, "sub_hook_1").await;
    let handle = start_webhook_worker(pool.clone());

    let body = serde_json::to_vec(&json!({
        "id": "evt_1001",
        "type": "invoice.paid",
        "data": {
            "object": {
                "id": "in_hook_1",
                "number": "INV-1001",
                "subscription": "sub_hook_1",
                "status": "paid",
                "total": 10_600,
                "amount_due": 0,
                "currency": "myr",
                "created": 1_700_000_000
            }
        }
    }))
    .unwrap();

    let status = ingest_billing_webhook(
        Extension(pool.clone()),
        Extension(handle.clone()),
        signed_headers(&body),
        Bytes::from(body.clone()),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);

    wait_for_event_status(&pool, "evt_1001", "processed").await;
    let (count, linked): (i64, Option<Uuid>) = sqlx::query_as(
        "SELECT COUNT(*), MIN(subscription_id) FROM billing_invoices WHERE provider_invoice_id = 'in_hook_1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
    assert_eq!(linked, Some(subscription_id));

    // redelivery of the same event id is acknowledged but not re-mirrored
    let status = ingest_billing_webhook(
        Extension(pool.clone()),
        Extension(handle.clone()),
        signed_headers(&body),
        Bytes::from(body),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    let events: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM billing_webhook_events WHERE event_id = 'evt_1001'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(events, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn subscription_events_flow_into_billing_status(pool: PgPool) {
    std::env::set_var("BILLING_WEBHOOK_SECRET", SECRET);
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let subscription_id = seed_subscription(&pool, "sub_hook_2").await;
    let handle = start_webhook_worker(pool.clone());

    let body = serde_json::to_vec(&json!({
        "id": "evt_2001",
        "type": "customer.subscription.updated",
        "data": {
            "object": {"id": "sub_hook_2", "status": "active", "cancel_at_period_end": false}
        }
    }))
    .unwrap();

    ingest_billing_webhook(
        Extension(pool.clone()),
        Extension(handle),
        signed_headers(&body),
        Bytes::from(body),
    )
    .await
    .unwrap();

    wait_for_event_status(&pool, "evt_2001", "processed").await;
    let status: String =
        sqlx::query_scalar("SELECT billing_status FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "active");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn tampered_payloads_are_rejected(pool: PgPool) {
    std::env::set_var("BILLING_WEBHOOK_SECRET", SECRET);
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let handle = start_webhook_worker(pool.clone());

    let body = br#"{"id":"evt_3001","type":"invoice.paid","data":{"object":{}}}"#.to_vec();
    let mut headers = signed_headers(&body);
    let mut tampered = body.clone();
    tampered[10] ^= 1;

    let err = ingest_billing_webhook(
        Extension(pool.clone()),
        Extension(handle.clone()),
        headers.clone(),
        Bytes::from(tampered),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, AppError::Unauthorized));

    headers.remove(SIGNATURE_HEADER);
    let err = ingest_billing_webhook(
        Extension(pool.clone()),
        Extension(handle),
        headers,
        Bytes::from(body),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, AppError::Unauthorized));

    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM billing_webhook_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(events, 0);
}
