use std::sync::Arc;

use axum::extract::{Extension, Query};
use axum::Json;
use serde::Deserialize;
use sqlx::{PgPool, QueryBuilder};
use tracing::error;
use uuid::Uuid;

use super::adapters::BillingProviderAdapter;
use super::models::{
    BillingInvoice, BillingRuntimeConfig, BillingWebhookEvent, CatalogSyncReport,
    InvoiceBackfillReport, InvoiceStatus,
};
use super::service::BillingService;
use crate::error::{AppError, AppResult};
use crate::extractor::AdminUser;
use crate::pagination::{ListQuery, Page};

/// key: billing-api -> console endpoints over the provider mirrors

const INVOICE_SORT_COLUMNS: &[&str] = &[
    "status",
    "total_cents",
    "amount_due_cents",
    "provider_created_at",
    "created_at",
];

const EVENT_SORT_COLUMNS: &[&str] = &["event_type", "status", "created_at"];

#[derive(Debug, Deserialize)]
pub struct InvoiceFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<Uuid>,
}

fn push_invoice_filters(
    builder: &mut QueryBuilder<'_, sqlx::Postgres>,
    list: &ListQuery,
    filter: &InvoiceFilter,
) {
    builder.push(" WHERE 1=1");
    if let Some(status) = filter.status.as_deref() {
        builder.push(" AND status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(subscription_id) = filter.subscription_id {
        builder.push(" AND subscription_id = ");
        builder.push_bind(subscription_id);
    }
    if let Some(term) = list.search_term() {
        let pattern = format!("%{}%", term);
        builder.push(" AND (invoice_number ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR provider_invoice_id ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

pub async fn list_invoices(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Query(list): Query<ListQuery>,
    Query(filter): Query<InvoiceFilter>,
) -> AppResult<Json<Page<BillingInvoice>>> {
    if let Some(status) = filter.status.as_deref() {
        if InvoiceStatus::normalize(status).as_str() != status {
            return Err(AppError::BadRequest(format!(
                "unknown invoice status filter '{status}'"
            )));
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM billing_invoices");
    push_invoice_filters(&mut count, &list, &filter);
    let total: i64 = count
        .build_query_as::<(i64,)>()
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error counting invoices");
            AppError::Db(e)
        })?
        .0;

    let (column, direction) = list.sort(INVOICE_SORT_COLUMNS, "created_at");
    let mut select = QueryBuilder::new(
        "SELECT id, provider, provider_invoice_id, invoice_number, subscription_id, status, \
         period_start, period_end, total_cents, tax_cents, amount_due_cents, currency, \
         hosted_invoice_url, pdf_url, provider_created_at, created_at FROM billing_invoices",
    );
    push_invoice_filters(&mut select, &list, &filter);
    select.push(format!(" ORDER BY {column} {direction} LIMIT "));
    select.push_bind(list.limit());
    select.push(" OFFSET ");
    select.push_bind(list.offset());

    let invoices: Vec<BillingInvoice> = select
        .build_query_as()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error listing invoices");
            AppError::Db(e)
        })?;

    Ok(Json(Page::new(invoices, &list, total)))
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
}

fn push_event_filters(
    builder: &mut QueryBuilder<'_, sqlx::Postgres>,
    list: &ListQuery,
    filter: &WebhookEventFilter,
) {
    builder.push(" WHERE 1=1");
    if let Some(status) = filter.status.as_deref() {
        builder.push(" AND status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(event_type) = filter.event_type.as_deref() {
        builder.push(" AND event_type = ");
        builder.push_bind(event_type.to_string());
    }
    if let Some(term) = list.search_term() {
        let pattern = format!("%{}%", term);
        builder.push(" AND (event_id ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR event_type ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

pub async fn list_webhook_events(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Query(list): Query<ListQuery>,
    Query(filter): Query<WebhookEventFilter>,
) -> AppResult<Json<Page<BillingWebhookEvent>>> {
    if let Some(status) = filter.status.as_deref() {
        if !matches!(status, "received" | "processed" | "failed") {
            return Err(AppError::BadRequest(format!(
                "unknown webhook status filter '{status}'"
            )));
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM billing_webhook_events");
    push_event_filters(&mut count, &list, &filter);
    let total: i64 = count
        .build_query_as::<(i64,)>()
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error counting webhook events");
            AppError::Db(e)
        })?
        .0;

    let (column, direction) = list.sort(EVENT_SORT_COLUMNS, "created_at");
    let mut select = QueryBuilder::new(
        "SELECT id, provider, event_id, event_type, status, subscription_id, processed_at, \
         error_message, created_at FROM billing_webhook_events",
    );
    push_event_filters(&mut select, &list, &filter);
    select.push(format!(" ORDER BY {column} {direction} LIMIT "));
    select.push_bind(list.limit());
    select.push(" OFFSET ");
    select.push_bind(list.offset());

    let events: Vec<BillingWebhookEvent> = select
        .build_query_as()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error listing webhook events");
            AppError::Db(e)
        })?;

    Ok(Json(Page::new(events, &list, total)))
}

pub async fn get_runtime_config(_admin: AdminUser) -> Json<BillingRuntimeConfig> {
    Json(BillingRuntimeConfig::snapshot())
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CatalogSyncRequest {
    /// Defaults to a preview; committing requires an explicit false.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub product_ids: Option<Vec<Uuid>>,
}

pub async fn sync_catalog(
    Extension(pool): Extension<PgPool>,
    Extension(adapter): Extension<Arc<dyn BillingProviderAdapter>>,
    admin: AdminUser,
    Json(payload): Json<CatalogSyncRequest>,
) -> AppResult<Json<CatalogSyncReport>> {
    let service = BillingService::new(pool);
    let report = service
        .sync_catalog(
            adapter.as_ref(),
            payload.dry_run,
            payload.currency,
            payload.product_ids,
        )
        .await
        .map_err(|e| {
            error!(?e, "catalog sync failed");
            AppError::Message(format!("Catalog sync failed: {e}"))
        })?;
    tracing::info!(
        admin_id = admin.user_id,
        dry_run = report.dry_run,
        "catalog sync requested"
    );
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct InvoiceBackfillRequest {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

pub async fn backfill_invoices(
    Extension(pool): Extension<PgPool>,
    Extension(adapter): Extension<Arc<dyn BillingProviderAdapter>>,
    admin: AdminUser,
    Json(payload): Json<InvoiceBackfillRequest>,
) -> AppResult<Json<InvoiceBackfillReport>> {
    let limit = payload.limit.unwrap_or(50).clamp(1, 500);
    let service = BillingService::new(pool);
    let report = service
        .backfill_invoices(adapter.as_ref(), limit, payload.dry_run)
        .await
        .map_err(|e| {
            error!(?e, "invoice backfill failed");
            AppError::Message(format!("Invoice backfill failed: {e}"))
        })?;
    tracing::info!(
        admin_id = admin.user_id,
        dry_run = report.dry_run,
        "invoice backfill requested"
    );
    Ok(Json(report))
}
