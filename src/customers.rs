use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder};
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::extractor::AdminUser;
use crate::pagination::{ListQuery, Page};

const SORT_COLUMNS: &[&str] = &["display_name", "email", "role", "created_at"];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CustomerSummary {
    pub id: i32,
    pub display_name: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CustomerProfile {
    pub user_id: i32,
    pub full_name: String,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CustomerCompany {
    pub user_id: i32,
    pub name: String,
    pub registration_number: Option<String>,
    pub industry: Option<String>,
    pub team_size: Option<i32>,
    pub office_address: Option<String>,
    pub delivery_address: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CustomerDetail {
    pub customer: CustomerSummary,
    pub profile: Option<CustomerProfile>,
    pub company: Option<CustomerCompany>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerFilter {
    #[serde(default)]
    pub role: Option<String>,
}

fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Postgres>, list: &ListQuery, filter: &CustomerFilter) {
    builder.push(" WHERE 1=1");
    if let Some(role) = filter.role.as_deref() {
        builder.push(" AND role = ");
        builder.push_bind(role.to_string());
    }
    if let Some(term) = list.search_term() {
        let pattern = format!("%{}%", term);
        builder.push(" AND (display_name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR email ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

pub async fn list_customers(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Query(list): Query<ListQuery>,
    Query(filter): Query<CustomerFilter>,
) -> AppResult<Json<Page<CustomerSummary>>> {
    if let Some(role) = filter.role.as_deref() {
        if role != "admin" && role != "customer" {
            return Err(AppError::BadRequest(format!("unknown role filter '{role}'")));
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
    push_filters(&mut count, &list, &filter);
    let total: i64 = count
        .build_query_as::<(i64,)>()
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error counting customers");
            AppError::Db(e)
        })?
        .0;

    let (column, direction) = list.sort(SORT_COLUMNS, "created_at");
    let mut select =
        QueryBuilder::new("SELECT id, display_name, email, role, created_at FROM users");
    push_filters(&mut select, &list, &filter);
    select.push(format!(" ORDER BY {column} {direction} LIMIT "));
    select.push_bind(list.limit());
    select.push(" OFFSET ");
    select.push_bind(list.offset());

    let customers: Vec<CustomerSummary> = select
        .build_query_as()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error listing customers");
            AppError::Db(e)
        })?;

    Ok(Json(Page::new(customers, &list, total)))
}

pub async fn get_customer(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<Json<CustomerDetail>> {
    let customer = sqlx::query_as::<_, CustomerSummary>(
        "SELECT id, display_name, email, role, created_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching customer");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)?;

    // A customer without a profile is an onboarding state, not an error;
    // only the customer row itself is allowed to 404.
    let profile = sqlx::query_as::<_, CustomerProfile>(
        "SELECT user_id, full_name, phone, job_title, updated_at FROM customer_profiles WHERE user_id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching customer profile");
        AppError::Db(e)
    })?;

    let company = sqlx::query_as::<_, CustomerCompany>(
        "SELECT user_id, name, registration_number, industry, team_size, office_address, delivery_address, updated_at \
         FROM customer_companies WHERE user_id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching customer company");
        AppError::Db(e)
    })?;

    Ok(Json(CustomerDetail {
        customer,
        profile,
        company,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpsertProfileRequest {
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

pub async fn upsert_profile(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpsertProfileRequest>,
) -> AppResult<Json<CustomerProfile>> {
    if payload.full_name.trim().is_empty() {
        return Err(AppError::BadRequest("Full name required".into()));
    }
    ensure_customer_exists(&pool, id).await?;

    let profile = sqlx::query_as::<_, CustomerProfile>(
        r#"
        INSERT INTO customer_profiles (user_id, full_name, phone, job_title)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id)
        DO UPDATE SET
            full_name = EXCLUDED.full_name,
            phone = EXCLUDED.phone,
            job_title = EXCLUDED.job_title,
            updated_at = NOW()
        RETURNING user_id, full_name, phone, job_title, updated_at
        "#,
    )
    .bind(id)
    .bind(payload.full_name.trim())
    .bind(&payload.phone)
    .bind(&payload.job_title)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error upserting customer profile");
        AppError::Db(e)
    })?;

    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
pub struct UpsertCompanyRequest {
    pub name: String,
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub team_size: Option<i32>,
    #[serde(default)]
    pub office_address: Option<String>,
    #[serde(default)]
    pub delivery_address: Option<String>,
}

pub async fn upsert_company(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpsertCompanyRequest>,
) -> AppResult<Json<CustomerCompany>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("Company name required".into()));
    }
    if let Some(size) = payload.team_size {
        if size < 1 {
            return Err(AppError::BadRequest("Team size must be positive".into()));
        }
    }
    ensure_customer_exists(&pool, id).await?;

    let company = sqlx::query_as::<_, CustomerCompany>(
        r#"
        INSERT INTO customer_companies
            (user_id, name, registration_number, industry, team_size, office_address, delivery_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id)
        DO UPDATE SET
            name = EXCLUDED.name,
            registration_number = EXCLUDED.registration_number,
            industry = EXCLUDED.industry,
            team_size = EXCLUDED.team_size,
            office_address = EXCLUDED.office_address,
            delivery_address = EXCLUDED.delivery_address,
            updated_at = NOW()
        RETURNING user_id, name, registration_number, industry, team_size,
                  office_address, delivery_address, updated_at
        "#,
    )
    .bind(id)
    .bind(payload.name.trim())
    .bind(&payload.registration_number)
    .bind(&payload.industry)
    .bind(payload.team_size)
    .bind(&payload.office_address)
    .bind(&payload.delivery_address)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error upserting customer company");
        AppError::Db(e)
    })?;

    Ok(Json(company))
}

#[derive(Debug, Deserialize)]
pub struct DeleteConfirmation {
    #[serde(default)]
    pub confirm: bool,
}

pub async fn delete_customer(
    Extension(pool): Extension<PgPool>,
    admin: AdminUser,
    Path(id): Path<i32>,
    Query(confirmation): Query<DeleteConfirmation>,
) -> AppResult<StatusCode> {
    if !confirmation.confirm {
        return Err(AppError::BadRequest(
            "Deletion must be confirmed with confirm=true".into(),
        ));
    }
    if admin.user_id == id {
        return Err(AppError::BadRequest(
            "Admins cannot delete their own account".into(),
        ));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error deleting customer");
            AppError::Db(e)
        })?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_customer_exists(pool: &PgPool, id: i32) -> AppResult<()> {
    let exists: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error checking customer");
            AppError::Db(e)
        })?;
    if exists.is_none() {
        return Err(AppError::NotFound);
    }
    Ok(())
}
