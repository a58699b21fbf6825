use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use tokio::sync::mpsc::{channel, Sender};
use tracing::{error, info};
use uuid::Uuid;

use crate::billing::{BillingService, ProviderInvoice, WebhookEventStatus};
use crate::config;
use crate::error::{AppError, AppResult};

/// key: webhooks-billing -> signed ingest,mirror worker

pub const SIGNATURE_HEADER: &str = "deskly-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct ProviderEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: ProviderEventData,
}

#[derive(Debug, Deserialize)]
struct ProviderEventData {
    object: Value,
}

#[derive(Debug)]
pub struct WebhookJob {
    pub event_row_id: Uuid,
    pub event_type: String,
    pub object: Value,
}

#[derive(Clone)]
pub struct WebhookHandle {
    sender: Sender<WebhookJob>,
}

impl WebhookHandle {
    pub async fn dispatch(&self, job: WebhookJob) -> anyhow::Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|err| anyhow::anyhow!("failed to enqueue webhook job: {err}"))
    }
}

pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Provider-facing ingest endpoint. Sits outside the admin gate; trust comes
/// from the shared-secret signature instead. Redelivered events are accepted
/// and dropped on the event-id conflict.
pub async fn ingest_billing_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(handle): Extension<WebhookHandle>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let secret = config::BILLING_WEBHOOK_SECRET
        .as_deref()
        .ok_or_else(|| AppError::Message("BILLING_WEBHOOK_SECRET is not configured".into()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if !verify_signature(secret, &body, signature) {
        return Err(AppError::Unauthorized);
    }

    let event: ProviderEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("malformed webhook payload: {e}")))?;

    let row_id = Uuid::new_v4();
    let result = sqlx::query(
        r#"
        INSERT INTO billing_webhook_events (id, provider, event_id, event_type, status, payload)
        VALUES ($1, $2, $3, $4, 'received', $5)
        ON CONFLICT (provider, event_id) DO NOTHING
        "#,
    )
    .bind(row_id)
    .bind(config::BILLING_PROVIDER.as_str())
    .bind(&event.id)
    .bind(&event.event_type)
    .bind(event.data.object.clone())
    .execute(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error recording webhook event");
        AppError::Db(e)
    })?;

    if result.rows_affected() == 0 {
        info!(event_id = %event.id, "webhook event already mirrored");
        return Ok(StatusCode::OK);
    }

    handle
        .dispatch(WebhookJob {
            event_row_id: row_id,
            event_type: event.event_type,
            object: event.data.object,
        })
        .await
        .map_err(|e| AppError::Message(e.to_string()))?;

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct ProviderSubscriptionObject {
    id: String,
    status: String,
    #[serde(default)]
    cancel_at_period_end: bool,
}

pub fn start_webhook_worker(pool: PgPool) -> WebhookHandle {
    let (tx, mut rx) = channel(64);
    tokio::spawn(async move {
        let service = BillingService::new(pool.clone());
        while let Some(job) = rx.recv().await {
            match process_job(&service, &job).await {
                Ok(subscription_id) => {
                    if let Err(err) = mark_event(
                        &pool,
                        job.event_row_id,
                        WebhookEventStatus::Processed,
                        None,
                        subscription_id,
                    )
                    .await
                    {
                        error!(?err, event_row = %job.event_row_id, "failed to mark event processed");
                    }
                }
                Err(err) => {
                    error!(?err, event_type = job.event_type, "webhook processing failed");
                    if let Err(mark_err) = mark_event(
                        &pool,
                        job.event_row_id,
                        WebhookEventStatus::Failed,
                        Some(err.to_string()),
                        None,
                    )
                    .await
                    {
                        error!(?mark_err, event_row = %job.event_row_id, "failed to mark event failed");
                    }
                }
            }
        }
    });

    WebhookHandle { sender: tx }
}

async fn process_job(
    service: &BillingService,
    job: &WebhookJob,
) -> anyhow::Result<Option<Uuid>> {
    if job.event_type.starts_with("invoice.") {
        let invoice: ProviderInvoice = serde_json::from_value(job.object.clone())?;
        service
            .upsert_invoice_mirror(config::BILLING_PROVIDER.as_str(), &invoice)
            .await?;
        let subscription_id = service
            .subscription_for_provider_id(invoice.subscription.as_deref())
            .await?;
        info!(invoice_id = invoice.id, "invoice event mirrored");
        return Ok(subscription_id);
    }

    if job.event_type.starts_with("customer.subscription.")
        || job.event_type.starts_with("subscription.")
    {
        let object: ProviderSubscriptionObject = serde_json::from_value(job.object.clone())?;
        let subscription_id = service
            .apply_subscription_event(&object.id, &object.status, object.cancel_at_period_end)
            .await?;
        info!(provider_subscription = object.id, "subscription event applied");
        return Ok(subscription_id);
    }

    // Unhandled families are mirrored for the console but carry no local effect.
    Ok(None)
}

async fn mark_event(
    pool: &PgPool,
    event_row_id: Uuid,
    status: WebhookEventStatus,
    error_message: Option<String>,
    subscription_id: Option<Uuid>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE billing_webhook_events SET
            status = $2,
            processed_at = NOW(),
            error_message = $3,
            subscription_id = COALESCE($4, subscription_id)
        WHERE id = $1
        "#,
    )
    .bind(event_row_id)
    .bind(status.as_str())
    .bind(error_message)
    .bind(subscription_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn signature_round_trip() {
        let body = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
        let signature = sign("whsec_test", body);
        assert!(verify_signature("whsec_test", body, &signature));
        assert!(!verify_signature("whsec_other", body, &signature));
        assert!(!verify_signature("whsec_test", b"tampered", &signature));
        assert!(!verify_signature("whsec_test", body, "not-hex"));
    }

    #[test]
    fn provider_event_shape_parses() {
        let event: ProviderEvent = serde_json::from_str(
            r#"{"id":"evt_9","type":"customer.subscription.updated",
                "data":{"object":{"id":"sub_1","status":"past_due"}}}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, "customer.subscription.updated");
        let object: ProviderSubscriptionObject =
            serde_json::from_value(event.data.object).unwrap();
        assert_eq!(object.status, "past_due");
        assert!(!object.cancel_at_period_end);
    }
}
