use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::adapters::{BillingProviderAdapter, ProviderInvoice};
use super::models::{
    CatalogSyncOutcome, CatalogSyncReport, InvoiceBackfillReport, InvoiceStatus, SyncOutcome,
};
use crate::config;
use crate::subscriptions::BillingStatus;

/// key: billing-service -> mirror maintenance,catalog sync

#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

struct CatalogProduct {
    id: Uuid,
    product_code: String,
    name: String,
    monthly_price_cents: i64,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts one provider invoice into the mirror. Returns true when the
    /// row was new.
    pub async fn upsert_invoice_mirror(
        &self,
        provider: &str,
        invoice: &ProviderInvoice,
    ) -> Result<bool> {
        let subscription_id = self
            .subscription_for_provider_id(invoice.subscription.as_deref())
            .await?;
        let status = InvoiceStatus::normalize(&invoice.status);

        let row = sqlx::query(
            r#"
            INSERT INTO billing_invoices
                (id, provider, provider_invoice_id, invoice_number, subscription_id, status,
                 period_start, period_end, total_cents, tax_cents, amount_due_cents, currency,
                 hosted_invoice_url, pdf_url, provider_created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (provider, provider_invoice_id)
            DO UPDATE SET
                invoice_number = EXCLUDED.invoice_number,
                subscription_id = EXCLUDED.subscription_id,
                status = EXCLUDED.status,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                total_cents = EXCLUDED.total_cents,
                tax_cents = EXCLUDED.tax_cents,
                amount_due_cents = EXCLUDED.amount_due_cents,
                currency = EXCLUDED.currency,
                hosted_invoice_url = EXCLUDED.hosted_invoice_url,
                pdf_url = EXCLUDED.pdf_url,
                provider_created_at = EXCLUDED.provider_created_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(provider)
        .bind(&invoice.id)
        .bind(&invoice.number)
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(invoice.period_start.and_then(epoch_to_datetime))
        .bind(invoice.period_end.and_then(epoch_to_datetime))
        .bind(invoice.total)
        .bind(invoice.tax.unwrap_or(0))
        .bind(invoice.amount_due)
        .bind(invoice.currency.to_ascii_lowercase())
        .bind(&invoice.hosted_invoice_url)
        .bind(&invoice.invoice_pdf)
        .bind(epoch_to_datetime(invoice.created))
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.get("inserted");
        Ok(inserted)
    }

    /// One-time import of historical invoices predating webhook mirroring.
    /// `mirrored_count` counts rows that did not exist yet, so it can never
    /// exceed `fetched_count`.
    pub async fn backfill_invoices(
        &self,
        adapter: &dyn BillingProviderAdapter,
        limit: u32,
        dry_run: bool,
    ) -> Result<InvoiceBackfillReport> {
        let fetched = adapter.list_invoices(limit).await?;
        let fetched_count = fetched.len();
        let provider = config::BILLING_PROVIDER.as_str();

        let mut mirrored_count = 0usize;
        for invoice in &fetched {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM billing_invoices WHERE provider = $1 AND provider_invoice_id = $2)",
            )
            .bind(provider)
            .bind(&invoice.id)
            .fetch_one(&self.pool)
            .await?;
            if exists {
                continue;
            }
            if !dry_run {
                self.upsert_invoice_mirror(provider, invoice).await?;
            }
            mirrored_count += 1;
        }

        tracing::info!(
            fetched_count,
            mirrored_count,
            dry_run,
            "invoice backfill finished"
        );
        Ok(InvoiceBackfillReport {
            dry_run,
            fetched_count,
            mirrored_count,
        })
    }

    /// Reconciles local product prices against provider price objects. A
    /// dry run performs the same lookups but never writes; `created` then
    /// means "would be created".
    pub async fn sync_catalog(
        &self,
        adapter: &dyn BillingProviderAdapter,
        dry_run: bool,
        currency: Option<String>,
        product_ids: Option<Vec<Uuid>>,
    ) -> Result<CatalogSyncReport> {
        let currency = currency
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| config::BILLING_CURRENCY.clone());

        let products = self.catalog_products(product_ids.as_deref()).await?;

        let mut outcomes = Vec::with_capacity(products.len());
        let mut created_count = 0usize;
        let mut skipped_count = 0usize;
        for product in &products {
            let existing = adapter
                .find_equivalent_price(&product.product_code, product.monthly_price_cents, &currency)
                .await?;
            let outcome = match existing {
                Some(price_id) => {
                    skipped_count += 1;
                    CatalogSyncOutcome {
                        product_id: product.id,
                        product_code: product.product_code.clone(),
                        outcome: SyncOutcome::Skipped,
                        provider_price_id: Some(price_id),
                    }
                }
                None => {
                    let price_id = if dry_run {
                        None
                    } else {
                        Some(
                            adapter
                                .create_price(
                                    &product.product_code,
                                    &product.name,
                                    product.monthly_price_cents,
                                    &currency,
                                )
                                .await?,
                        )
                    };
                    created_count += 1;
                    CatalogSyncOutcome {
                        product_id: product.id,
                        product_code: product.product_code.clone(),
                        outcome: SyncOutcome::Created,
                        provider_price_id: price_id,
                    }
                }
            };
            outcomes.push(outcome);
        }

        tracing::info!(
            created_count,
            skipped_count,
            dry_run,
            %currency,
            "catalog price sync finished"
        );
        Ok(CatalogSyncReport {
            dry_run,
            currency,
            created_count,
            skipped_count,
            outcomes,
        })
    }

    /// Applies a provider subscription lifecycle event to the local mirror.
    pub async fn apply_subscription_event(
        &self,
        provider_subscription_id: &str,
        provider_status: &str,
        cancel_at_period_end: bool,
    ) -> Result<Option<Uuid>> {
        let billing_status = map_provider_subscription_status(provider_status);
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE subscriptions SET
                billing_status = $2,
                cancel_at_period_end = $3,
                updated_at = NOW()
            WHERE provider_subscription_id = $1
            RETURNING id
            "#,
        )
        .bind(provider_subscription_id)
        .bind(billing_status.as_str())
        .bind(cancel_at_period_end)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_none() {
            return Err(anyhow!(
                "no subscription linked to provider id {provider_subscription_id}"
            ));
        }
        Ok(updated)
    }

    pub async fn subscription_for_provider_id(
        &self,
        provider_subscription_id: Option<&str>,
    ) -> Result<Option<Uuid>> {
        let Some(provider_id) = provider_subscription_id else {
            return Ok(None);
        };
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM subscriptions WHERE provider_subscription_id = $1")
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn catalog_products(&self, product_ids: Option<&[Uuid]>) -> Result<Vec<CatalogProduct>> {
        let rows: Vec<(Uuid, String, String, i64)> = match product_ids {
            Some(ids) if !ids.is_empty() => {
                sqlx::query_as(
                    "SELECT id, product_code, name, monthly_price_cents FROM products \
                     WHERE status = 'active' AND id = ANY($1) ORDER BY product_code ASC",
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?
            }
            _ => {
                sqlx::query_as(
                    "SELECT id, product_code, name, monthly_price_cents FROM products \
                     WHERE status = 'active' ORDER BY product_code ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|(id, product_code, name, monthly_price_cents)| CatalogProduct {
                id,
                product_code,
                name,
                monthly_price_cents,
            })
            .collect())
    }
}

/// Provider subscription statuses collapse onto the four console states.
pub fn map_provider_subscription_status(raw: &str) -> BillingStatus {
    match raw {
        "active" | "trialing" => BillingStatus::Active,
        "past_due" | "unpaid" => BillingStatus::PaymentFailed,
        "canceled" | "cancelled" => BillingStatus::Cancelled,
        _ => BillingStatus::PendingPayment,
    }
}

fn epoch_to_datetime(epoch: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_subscription_statuses_collapse_to_console_states() {
        assert_eq!(
            map_provider_subscription_status("active"),
            BillingStatus::Active
        );
        assert_eq!(
            map_provider_subscription_status("past_due"),
            BillingStatus::PaymentFailed
        );
        assert_eq!(
            map_provider_subscription_status("canceled"),
            BillingStatus::Cancelled
        );
        assert_eq!(
            map_provider_subscription_status("incomplete"),
            BillingStatus::PendingPayment
        );
    }

    #[test]
    fn epoch_conversion_handles_invalid_values() {
        assert!(epoch_to_datetime(1_700_000_000).is_some());
        assert!(epoch_to_datetime(i64::MAX).is_none());
    }
}
