use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config;

/// key: billing-models -> provider mirrors,runtime config

/// Read-only mirror of a provider invoice. Rows arrive through webhook
/// ingestion or backfill and are never edited from the console.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BillingInvoice {
    pub id: Uuid,
    pub provider: String,
    pub provider_invoice_id: String,
    pub invoice_number: Option<String>,
    pub subscription_id: Option<Uuid>,
    pub status: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub total_cents: i64,
    pub tax_cents: i64,
    pub amount_due_cents: i64,
    pub currency: String,
    pub hosted_invoice_url: Option<String>,
    pub pdf_url: Option<String>,
    pub provider_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    PaymentFailed,
    Void,
    Uncollectible,
    Unknown,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::PaymentFailed => "payment_failed",
            InvoiceStatus::Void => "void",
            InvoiceStatus::Uncollectible => "uncollectible",
            InvoiceStatus::Unknown => "unknown",
        }
    }

    /// Provider statuses we do not recognize land on `unknown` rather than
    /// failing the mirror write.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "draft" => InvoiceStatus::Draft,
            "open" => InvoiceStatus::Open,
            "paid" => InvoiceStatus::Paid,
            "payment_failed" | "past_due" => InvoiceStatus::PaymentFailed,
            "void" => InvoiceStatus::Void,
            "uncollectible" => InvoiceStatus::Uncollectible,
            _ => InvoiceStatus::Unknown,
        }
    }
}

/// Read-only mirror of an inbound provider webhook delivery.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BillingWebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub status: String,
    pub subscription_id: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventStatus {
    Received,
    Processed,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventStatus::Received => "received",
            WebhookEventStatus::Processed => "processed",
            WebhookEventStatus::Failed => "failed",
        }
    }
}

/// Singleton settings snapshot the console's billing settings page renders.
#[derive(Debug, Clone, Serialize)]
pub struct BillingRuntimeConfig {
    pub provider: String,
    pub currency: String,
    pub min_term_months: i32,
    pub sst_rate_bps: i64,
    pub automatic_tax: bool,
    pub manual_tax_rate_id: Option<String>,
}

impl BillingRuntimeConfig {
    pub fn snapshot() -> Self {
        BillingRuntimeConfig {
            provider: config::BILLING_PROVIDER.clone(),
            currency: config::BILLING_CURRENCY.clone(),
            min_term_months: *config::BILLING_MIN_TERM_MONTHS,
            sst_rate_bps: *config::BILLING_SST_RATE_BPS,
            automatic_tax: *config::BILLING_AUTOMATIC_TAX,
            manual_tax_rate_id: config::BILLING_MANUAL_TAX_RATE_ID.clone(),
        }
    }
}

/// Per-product result of a catalog sync. Provider price objects are immutable,
/// so the only outcomes are reusing an equivalent price or creating a new one.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSyncOutcome {
    pub product_id: Uuid,
    pub product_code: String,
    pub outcome: SyncOutcome,
    pub provider_price_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSyncReport {
    pub dry_run: bool,
    pub currency: String,
    pub created_count: usize,
    pub skipped_count: usize,
    pub outcomes: Vec<CatalogSyncOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceBackfillReport {
    pub dry_run: bool,
    pub fetched_count: usize,
    pub mirrored_count: usize,
}
