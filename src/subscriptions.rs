use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder};
use tracing::error;
use uuid::Uuid;

use crate::billing::BillingProviderAdapter;
use crate::error::{AppError, AppResult};
use crate::extractor::AdminUser;
use crate::pagination::{ListQuery, Page};

const SORT_COLUMNS: &[&str] = &[
    "billing_status",
    "monthly_total_cents",
    "start_date",
    "created_at",
];

/// Provider-owned billing lifecycle. Everything except the two sanctioned
/// cancel actions reaches this field through webhook sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    PendingPayment,
    Active,
    PaymentFailed,
    Cancelled,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::PendingPayment => "pending_payment",
            BillingStatus::Active => "active",
            BillingStatus::PaymentFailed => "payment_failed",
            BillingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending_payment" => Some(BillingStatus::PendingPayment),
            "active" => Some(BillingStatus::Active),
            "payment_failed" => Some(BillingStatus::PaymentFailed),
            "cancelled" => Some(BillingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn permits_cancel(&self) -> bool {
        !matches!(self, BillingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: i32,
    pub customer_name: String,
    pub billing_status: String,
    pub service_state: String,
    pub collection_status: String,
    pub provider_subscription_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub monthly_total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionItem {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub category: String,
    pub quantity: i32,
    pub unit_monthly_price_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionDetail {
    pub subscription: Subscription,
    pub items: Vec<SubscriptionItem>,
}

/// Line totals in integer cents; tax truncates toward zero at cent
/// granularity, matching the storefront's quote math.
pub fn compute_totals(items: &[(i32, i64)], sst_rate_bps: i64) -> (i64, i64, i64) {
    let subtotal: i64 = items
        .iter()
        .map(|(quantity, unit_cents)| i64::from(*quantity) * unit_cents)
        .sum();
    let tax = subtotal * sst_rate_bps / 10_000;
    (subtotal, tax, subtotal + tax)
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default)]
    pub billing_status: Option<String>,
    #[serde(default)]
    pub user_id: Option<i32>,
}

const SELECT_COLUMNS: &str = "s.id, s.user_id, u.display_name AS customer_name, s.billing_status, \
     s.service_state, s.collection_status, s.provider_subscription_id, s.cancel_at_period_end, \
     s.start_date, s.end_date, s.subtotal_cents, s.tax_cents, s.monthly_total_cents, \
     s.created_at, s.updated_at";

fn push_filters(
    builder: &mut QueryBuilder<'_, sqlx::Postgres>,
    list: &ListQuery,
    filter: &SubscriptionFilter,
) {
    builder.push(" WHERE 1=1");
    if let Some(status) = filter.billing_status.as_deref() {
        builder.push(" AND s.billing_status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(user_id) = filter.user_id {
        builder.push(" AND s.user_id = ");
        builder.push_bind(user_id);
    }
    if let Some(term) = list.search_term() {
        let pattern = format!("%{}%", term);
        builder.push(" AND (u.display_name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR u.email ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

pub async fn list_subscriptions(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Query(list): Query<ListQuery>,
    Query(filter): Query<SubscriptionFilter>,
) -> AppResult<Json<Page<Subscription>>> {
    if let Some(status) = filter.billing_status.as_deref() {
        if BillingStatus::parse(status).is_none() {
            return Err(AppError::BadRequest(format!(
                "unknown billing status filter '{status}'"
            )));
        }
    }

    let mut count =
        QueryBuilder::new("SELECT COUNT(*) FROM subscriptions s JOIN users u ON u.id = s.user_id");
    push_filters(&mut count, &list, &filter);
    let total: i64 = count
        .build_query_as::<(i64,)>()
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error counting subscriptions");
            AppError::Db(e)
        })?
        .0;

    let (column, direction) = list.sort(SORT_COLUMNS, "created_at");
    let mut select = QueryBuilder::new(format!(
        "SELECT {SELECT_COLUMNS} FROM subscriptions s JOIN users u ON u.id = s.user_id"
    ));
    push_filters(&mut select, &list, &filter);
    select.push(format!(" ORDER BY s.{column} {direction} LIMIT "));
    select.push_bind(list.limit());
    select.push(" OFFSET ");
    select.push_bind(list.offset());

    let subscriptions: Vec<Subscription> = select
        .build_query_as()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error listing subscriptions");
            AppError::Db(e)
        })?;

    Ok(Json(Page::new(subscriptions, &list, total)))
}

pub async fn get_subscription(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SubscriptionDetail>> {
    let detail = fetch_detail(&pool, id).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    CancelNow,
    CancelAtPeriodEnd,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionActionRequest {
    pub action: SubscriptionAction,
    #[serde(default)]
    pub confirm: bool,
}

/// Both cancel variants mutate provider state, so the console's confirmation
/// modal maps to an explicit `confirm` flag here. The provider call happens
/// before any local write; a provider failure leaves the mirror untouched.
pub async fn dispatch_action(
    Extension(pool): Extension<PgPool>,
    Extension(adapter): Extension<Arc<dyn BillingProviderAdapter>>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubscriptionActionRequest>,
) -> AppResult<Json<SubscriptionDetail>> {
    if !payload.confirm {
        return Err(AppError::BadRequest(
            "Billing actions must be confirmed with confirm=true".into(),
        ));
    }

    let detail = fetch_detail(&pool, id).await?;
    let status = BillingStatus::parse(&detail.subscription.billing_status).ok_or_else(|| {
        AppError::Message(format!(
            "subscription {id} has unknown billing status '{}'",
            detail.subscription.billing_status
        ))
    })?;
    if !status.permits_cancel() {
        return Err(AppError::BadRequest(
            "Subscription is already cancelled".into(),
        ));
    }
    let provider_id = detail
        .subscription
        .provider_subscription_id
        .as_deref()
        .ok_or_else(|| {
            AppError::BadRequest("Subscription is not linked to the billing provider".into())
        })?;

    match payload.action {
        SubscriptionAction::CancelNow => {
            adapter
                .cancel_subscription(provider_id, false)
                .await
                .map_err(|e| {
                    error!(?e, subscription_id = %id, "provider cancel failed");
                    AppError::Message(format!("Billing provider rejected the cancel: {e}"))
                })?;
            sqlx::query(
                "UPDATE subscriptions SET billing_status = 'cancelled', cancel_at_period_end = FALSE, \
                 end_date = CURRENT_DATE, updated_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .execute(&pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error recording immediate cancel");
                AppError::Db(e)
            })?;
        }
        SubscriptionAction::CancelAtPeriodEnd => {
            adapter
                .cancel_subscription(provider_id, true)
                .await
                .map_err(|e| {
                    error!(?e, subscription_id = %id, "provider scheduled cancel failed");
                    AppError::Message(format!("Billing provider rejected the cancel: {e}"))
                })?;
            sqlx::query(
                "UPDATE subscriptions SET cancel_at_period_end = TRUE, updated_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .execute(&pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error recording scheduled cancel");
                AppError::Db(e)
            })?;
        }
    }

    tracing::info!(
        admin_id = admin.user_id,
        subscription_id = %id,
        action = ?payload.action,
        "subscription billing action dispatched"
    );

    // Re-fetch so the response reflects what a list reload will show.
    let refreshed = fetch_detail(&pool, id).await?;
    Ok(Json(refreshed))
}

/// Recomputes stored totals from the line items at the configured SST rate.
/// Used after item corrections or a tax-rate change.
pub async fn recompute_totals(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SubscriptionDetail>> {
    let detail = fetch_detail(&pool, id).await?;
    let lines: Vec<(i32, i64)> = detail
        .items
        .iter()
        .map(|item| (item.quantity, item.unit_monthly_price_cents))
        .collect();
    let (subtotal, tax, total) = compute_totals(&lines, *crate::config::BILLING_SST_RATE_BPS);

    sqlx::query(
        "UPDATE subscriptions SET subtotal_cents = $2, tax_cents = $3, monthly_total_cents = $4, \
         updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(subtotal)
    .bind(tax)
    .bind(total)
    .execute(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error recomputing subscription totals");
        AppError::Db(e)
    })?;

    let refreshed = fetch_detail(&pool, id).await?;
    Ok(Json(refreshed))
}

async fn fetch_detail(pool: &PgPool, id: Uuid) -> AppResult<SubscriptionDetail> {
    let subscription = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SELECT_COLUMNS} FROM subscriptions s JOIN users u ON u.id = s.user_id WHERE s.id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching subscription");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)?;

    let items = sqlx::query_as::<_, SubscriptionItem>(
        "SELECT id, subscription_id, product_id, product_name, category, quantity, \
         unit_monthly_price_cents FROM subscription_items WHERE subscription_id = $1 \
         ORDER BY product_name ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching subscription items");
        AppError::Db(e)
    })?;

    Ok(SubscriptionDetail {
        subscription,
        items,
    })
}
