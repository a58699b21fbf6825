use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder};
use tracing::error;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AdminUser;
use crate::pagination::{ListQuery, Page};

const SORT_COLUMNS: &[&str] = &["status", "created_at", "updated_at"];

const STATUS_KINDS: &[&str] = &[
    "confirmed",
    "dispatched",
    "delivered",
    "partially_delivered",
    "failed",
    "rescheduled",
    "cancelled",
];

/// Delivery-order status with its status-conditional payload. Each variant
/// carries only the field its status requires, so a record with, say, both a
/// failure reason and a reschedule time cannot be represented at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DoStatus {
    Confirmed,
    Dispatched,
    Delivered,
    PartiallyDelivered,
    Failed { failure_reason: String },
    Rescheduled { rescheduled_at: DateTime<Utc> },
    Cancelled { cancelled_reason: String },
}

impl DoStatus {
    pub fn kind(&self) -> &'static str {
        match self {
            DoStatus::Confirmed => "confirmed",
            DoStatus::Dispatched => "dispatched",
            DoStatus::Delivered => "delivered",
            DoStatus::PartiallyDelivered => "partially_delivered",
            DoStatus::Failed { .. } => "failed",
            DoStatus::Rescheduled { .. } => "rescheduled",
            DoStatus::Cancelled { .. } => "cancelled",
        }
    }

    /// The dispatch lifecycle. Delivered, partially delivered and cancelled
    /// orders are terminal; failed and rescheduled orders may be re-dispatched.
    pub fn can_transition_to(&self, target: &DoStatus) -> bool {
        matches!(
            (self.kind(), target.kind()),
            ("confirmed", "dispatched")
                | ("confirmed", "cancelled")
                | ("dispatched", "delivered")
                | ("dispatched", "partially_delivered")
                | ("dispatched", "failed")
                | ("dispatched", "rescheduled")
                | ("dispatched", "cancelled")
                | ("failed", "dispatched")
                | ("failed", "cancelled")
                | ("rescheduled", "dispatched")
                | ("rescheduled", "cancelled")
        )
    }

    /// Splits into the storage columns: the status discriminant plus exactly
    /// one populated side column.
    pub fn columns(
        &self,
    ) -> (
        &'static str,
        Option<&str>,
        Option<DateTime<Utc>>,
        Option<&str>,
    ) {
        match self {
            DoStatus::Failed { failure_reason } => {
                ("failed", Some(failure_reason.as_str()), None, None)
            }
            DoStatus::Rescheduled { rescheduled_at } => {
                ("rescheduled", None, Some(*rescheduled_at), None)
            }
            DoStatus::Cancelled { cancelled_reason } => {
                ("cancelled", None, None, Some(cancelled_reason.as_str()))
            }
            other => (other.kind(), None, None, None),
        }
    }

    /// Rebuilds the union from storage, rejecting any row whose side columns
    /// disagree with its status.
    pub fn from_columns(
        status: &str,
        failure_reason: Option<String>,
        rescheduled_at: Option<DateTime<Utc>>,
        cancelled_reason: Option<String>,
    ) -> Result<Self, String> {
        let extras = [
            failure_reason.is_some() && status != "failed",
            rescheduled_at.is_some() && status != "rescheduled",
            cancelled_reason.is_some() && status != "cancelled",
        ];
        if extras.iter().any(|set| *set) {
            return Err(format!("status '{status}' carries a foreign side field"));
        }
        match status {
            "confirmed" => Ok(DoStatus::Confirmed),
            "dispatched" => Ok(DoStatus::Dispatched),
            "delivered" => Ok(DoStatus::Delivered),
            "partially_delivered" => Ok(DoStatus::PartiallyDelivered),
            "failed" => failure_reason
                .map(|failure_reason| DoStatus::Failed { failure_reason })
                .ok_or_else(|| "failed status requires failure_reason".to_string()),
            "rescheduled" => rescheduled_at
                .map(|rescheduled_at| DoStatus::Rescheduled { rescheduled_at })
                .ok_or_else(|| "rescheduled status requires rescheduled_at".to_string()),
            "cancelled" => cancelled_reason
                .map(|cancelled_reason| DoStatus::Cancelled { cancelled_reason })
                .ok_or_else(|| "cancelled status requires cancelled_reason".to_string()),
            other => Err(format!("unknown delivery order status '{other}'")),
        }
    }

    fn validate_payload(&self) -> Result<(), String> {
        match self {
            DoStatus::Failed { failure_reason } if failure_reason.trim().is_empty() => {
                Err("failure_reason cannot be empty".to_string())
            }
            DoStatus::Cancelled { cancelled_reason } if cancelled_reason.trim().is_empty() => {
                Err("cancelled_reason cannot be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeliveryOrderRow {
    id: Uuid,
    subscription_id: Uuid,
    customer_name: String,
    items_summary: String,
    status: String,
    failure_reason: Option<String>,
    rescheduled_at: Option<DateTime<Utc>>,
    cancelled_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub customer_name: String,
    pub items_summary: String,
    #[serde(flatten)]
    pub status: DoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DeliveryOrderRow> for DeliveryOrder {
    type Error = AppError;

    fn try_from(row: DeliveryOrderRow) -> Result<Self, Self::Error> {
        let status = DoStatus::from_columns(
            &row.status,
            row.failure_reason,
            row.rescheduled_at,
            row.cancelled_reason,
        )
        .map_err(|reason| {
            error!(order_id = %row.id, reason, "delivery order row is inconsistent");
            AppError::Message(format!("delivery order {} is inconsistent", row.id))
        })?;
        Ok(DeliveryOrder {
            id: row.id,
            subscription_id: row.subscription_id,
            customer_name: row.customer_name,
            items_summary: row.items_summary,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliveryOrderFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<Uuid>,
}

const SELECT_COLUMNS: &str = "id, subscription_id, customer_name, items_summary, status, \
     failure_reason, rescheduled_at, cancelled_reason, created_at, updated_at";

fn push_filters(
    builder: &mut QueryBuilder<'_, sqlx::Postgres>,
    list: &ListQuery,
    filter: &DeliveryOrderFilter,
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
        builder.push(" AND (customer_name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR items_summary ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

pub async fn list_delivery_orders(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Query(list): Query<ListQuery>,
    Query(filter): Query<DeliveryOrderFilter>,
) -> AppResult<Json<Page<DeliveryOrder>>> {
    if let Some(status) = filter.status.as_deref() {
        if !STATUS_KINDS.contains(&status) {
            return Err(AppError::BadRequest(format!(
                "unknown status filter '{status}'"
            )));
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM delivery_orders");
    push_filters(&mut count, &list, &filter);
    let total: i64 = count
        .build_query_as::<(i64,)>()
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error counting delivery orders");
            AppError::Db(e)
        })?
        .0;

    let (column, direction) = list.sort(SORT_COLUMNS, "created_at");
    let mut select = QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM delivery_orders"));
    push_filters(&mut select, &list, &filter);
    select.push(format!(" ORDER BY {column} {direction} LIMIT "));
    select.push_bind(list.limit());
    select.push(" OFFSET ");
    select.push_bind(list.offset());

    let rows: Vec<DeliveryOrderRow> = select
        .build_query_as()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error listing delivery orders");
            AppError::Db(e)
        })?;

    let orders = rows
        .into_iter()
        .map(DeliveryOrder::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(Page::new(orders, &list, total)))
}

pub async fn get_delivery_order(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeliveryOrder>> {
    let row = fetch_row(&pool, id).await?;
    DeliveryOrder::try_from(row).map(Json)
}

/// The status transition operation: validates the lifecycle edge, then writes
/// the new status together with exactly its own side field, clearing the
/// other two in the same statement.
pub async fn update_status(
    Extension(pool): Extension<PgPool>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(target): Json<DoStatus>,
) -> AppResult<Json<DeliveryOrder>> {
    target
        .validate_payload()
        .map_err(AppError::BadRequest)?;

    let row = fetch_row(&pool, id).await?;
    let current = DeliveryOrder::try_from(row)?;
    if !current.status.can_transition_to(&target) {
        return Err(AppError::BadRequest(format!(
            "cannot move delivery order from {} to {}",
            current.status.kind(),
            target.kind()
        )));
    }

    let (status, failure_reason, rescheduled_at, cancelled_reason) = target.columns();
    let updated: DeliveryOrderRow = sqlx::query_as(&format!(
        r#"
        UPDATE delivery_orders SET
            status = $2,
            failure_reason = $3,
            rescheduled_at = $4,
            cancelled_reason = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status)
    .bind(failure_reason)
    .bind(rescheduled_at)
    .bind(cancelled_reason)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error updating delivery order status");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)?;

    tracing::info!(
        admin_id = admin.user_id,
        order_id = %id,
        from = current.status.kind(),
        to = status,
        "delivery order transitioned"
    );
    DeliveryOrder::try_from(updated).map(Json)
}

async fn fetch_row(pool: &PgPool, id: Uuid) -> AppResult<DeliveryOrderRow> {
    sqlx::query_as::<_, DeliveryOrderRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM delivery_orders WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching delivery order");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)
}
