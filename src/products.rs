use axum::extract::{Extension, Multipart, Path, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder};
use tracing::error;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AdminUser;
use crate::pagination::{ListQuery, Page};

const SORT_COLUMNS: &[&str] = &[
    "product_code",
    "name",
    "category",
    "monthly_price_cents",
    "stock_quantity",
    "status",
    "created_at",
];

static PRODUCT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DSK-[A-Z0-9]{3,16}$").expect("valid product code pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Draft => "draft",
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(ProductStatus::Draft),
            "active" => Some(ProductStatus::Active),
            "inactive" => Some(ProductStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub product_code: String,
    pub name: String,
    pub category: String,
    pub monthly_price_cents: i64,
    pub stock_quantity: i32,
    pub status: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ProductFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn push_filters(
    builder: &mut QueryBuilder<'_, sqlx::Postgres>,
    list: &ListQuery,
    filter: &ProductFilter,
) {
    builder.push(" WHERE 1=1");
    if let Some(status) = filter.status.as_deref() {
        builder.push(" AND status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(category) = filter.category.as_deref() {
        builder.push(" AND category = ");
        builder.push_bind(category.to_string());
    }
    if let Some(term) = list.search_term() {
        let pattern = format!("%{}%", term);
        builder.push(" AND (name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR product_code ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

fn validate_status_filter(filter: &ProductFilter) -> AppResult<()> {
    if let Some(status) = filter.status.as_deref() {
        if ProductStatus::parse(status).is_none() {
            return Err(AppError::BadRequest(format!(
                "unknown status filter '{status}'"
            )));
        }
    }
    Ok(())
}

async fn fetch_filtered(
    pool: &PgPool,
    list: &ListQuery,
    filter: &ProductFilter,
    paginate: bool,
) -> AppResult<(Vec<Product>, i64)> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM products");
    push_filters(&mut count, list, filter);
    let total: i64 = count
        .build_query_as::<(i64,)>()
        .fetch_one(pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error counting products");
            AppError::Db(e)
        })?
        .0;

    let (column, direction) = list.sort(SORT_COLUMNS, "created_at");
    let mut select = QueryBuilder::new(
        "SELECT id, product_code, name, category, monthly_price_cents, stock_quantity, \
         status, image_url, video_url, description, created_at, updated_at FROM products",
    );
    push_filters(&mut select, list, filter);
    select.push(format!(" ORDER BY {column} {direction}"));
    if paginate {
        select.push(" LIMIT ");
        select.push_bind(list.limit());
        select.push(" OFFSET ");
        select.push_bind(list.offset());
    }

    let products: Vec<Product> = select
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error listing products");
            AppError::Db(e)
        })?;

    Ok((products, total))
}

pub async fn list_products(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Query(list): Query<ListQuery>,
    Query(filter): Query<ProductFilter>,
) -> AppResult<Json<Page<Product>>> {
    validate_status_filter(&filter)?;
    let (products, total) = fetch_filtered(&pool, &list, &filter, true).await?;
    Ok(Json(Page::new(products, &list, total)))
}

pub async fn get_product(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    fetch_product(&pool, id).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub product_code: String,
    pub name: String,
    pub category: String,
    pub monthly_price_cents: i64,
    #[serde(default)]
    pub stock_quantity: i32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create_product(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Json(payload): Json<CreateProductRequest>,
) -> AppResult<(StatusCode, Json<Product>)> {
    validate_product_fields(
        &payload.product_code,
        &payload.name,
        payload.monthly_price_cents,
        payload.stock_quantity,
    )?;

    let result = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products
            (id, product_code, name, category, monthly_price_cents, stock_quantity,
             status, image_url, video_url, description)
        VALUES ($1, $2, $3, $4, $5, $6, 'draft', $7, $8, $9)
        RETURNING id, product_code, name, category, monthly_price_cents, stock_quantity,
                  status, image_url, video_url, description, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.product_code.trim())
    .bind(payload.name.trim())
    .bind(payload.category.trim())
    .bind(payload.monthly_price_cents)
    .bind(payload.stock_quantity)
    .bind(&payload.image_url)
    .bind(&payload.video_url)
    .bind(&payload.description)
    .fetch_one(&pool)
    .await;

    match result {
        Ok(product) => Ok((StatusCode::CREATED, Json(product))),
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("products_product_code_key") {
                    return Err(AppError::BadRequest("Product code already in use".into()));
                }
            }
            error!(?e, "DB error creating product");
            Err(AppError::Db(e))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub monthly_price_cents: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn update_product(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductRequest>,
) -> AppResult<Json<Product>> {
    if let Some(name) = payload.name.as_deref() {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("Name cannot be empty".into()));
        }
    }
    if let Some(price) = payload.monthly_price_cents {
        if price < 0 {
            return Err(AppError::BadRequest("Price cannot be negative".into()));
        }
    }

    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products SET
            name = COALESCE($2, name),
            category = COALESCE($3, category),
            monthly_price_cents = COALESCE($4, monthly_price_cents),
            image_url = COALESCE($5, image_url),
            video_url = COALESCE($6, video_url),
            description = COALESCE($7, description),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, product_code, name, category, monthly_price_cents, stock_quantity,
                  status, image_url, video_url, description, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(payload.name.as_deref().map(str::trim))
    .bind(payload.category.as_deref().map(str::trim))
    .bind(payload.monthly_price_cents)
    .bind(&payload.image_url)
    .bind(&payload.video_url)
    .bind(&payload.description)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error updating product");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)?;

    Ok(Json(product))
}

pub async fn publish_product(
    Extension(pool): Extension<PgPool>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    set_status(&pool, admin, id, ProductStatus::Active).await
}

pub async fn deactivate_product(
    Extension(pool): Extension<PgPool>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    set_status(&pool, admin, id, ProductStatus::Inactive).await
}

/// Soft delete: products are deactivated, never physically removed.
pub async fn delete_product(
    Extension(pool): Extension<PgPool>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    set_status(&pool, admin, id, ProductStatus::Inactive).await
}

async fn set_status(
    pool: &PgPool,
    admin: AdminUser,
    id: Uuid,
    status: ProductStatus,
) -> AppResult<Json<Product>> {
    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, product_code, name, category, monthly_price_cents, stock_quantity,
                  status, image_url, video_url, description, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error changing product status");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)?;

    tracing::info!(
        admin_id = admin.user_id,
        product_id = %id,
        status = status.as_str(),
        "product status changed"
    );
    Ok(Json(product))
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub stock_quantity: i32,
}

pub async fn adjust_stock(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustStockRequest>,
) -> AppResult<Json<Product>> {
    if payload.stock_quantity < 0 {
        return Err(AppError::BadRequest("Stock cannot be negative".into()));
    }
    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products SET stock_quantity = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, product_code, name, category, monthly_price_cents, stock_quantity,
                  status, image_url, video_url, description, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(payload.stock_quantity)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error adjusting stock");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)?;
    Ok(Json(product))
}

/// Export the table exactly as filtered/sorted on screen. Media URLs are
/// deliberately absent from the column set.
pub async fn export_products_csv(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    Query(list): Query<ListQuery>,
    Query(filter): Query<ProductFilter>,
) -> AppResult<impl IntoResponse> {
    validate_status_filter(&filter)?;
    let (products, _total) = fetch_filtered(&pool, &list, &filter, false).await?;

    let mut csv = String::new();
    csv.push_str("product_code,name,category,monthly_price_cents,stock_quantity,status,description\n");
    for product in &products {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            escape_csv_field(&product.product_code),
            escape_csv_field(&product.name),
            escape_csv_field(&product.category),
            product.monthly_price_cents,
            product.stock_quantity,
            product.status,
            escape_csv_field(product.description.as_deref().unwrap_or("")),
        ));
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        header::HeaderValue::from_static("attachment; filename=\"products.csv\""),
    );
    Ok((headers, csv))
}

#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub imported_count: usize,
}

/// Every imported row lands as a draft; there is no row-level error report,
/// the first bad row fails the whole upload.
pub async fn import_products_csv(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    mut multipart: Multipart,
) -> AppResult<Json<ImportSummary>> {
    let mut content: Option<String> = None;
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let data = field.bytes().await.map_err(|e| {
            error!(?e, "Failed reading CSV upload");
            AppError::BadRequest("Unreadable upload".into())
        })?;
        content = Some(
            String::from_utf8(data.to_vec())
                .map_err(|_| AppError::BadRequest("CSV must be UTF-8".into()))?,
        );
        break;
    }
    let content = content.ok_or_else(|| AppError::BadRequest("No file".into()))?;

    let rows = parse_import(&content)?;
    let mut tx = pool.begin().await.map_err(|e| {
        error!(?e, "DB error opening import transaction");
        AppError::Db(e)
    })?;
    let mut imported = 0usize;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO products
                (id, product_code, name, category, monthly_price_cents, stock_quantity, status, description)
            VALUES ($1, $2, $3, $4, $5, $6, 'draft', $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.product_code)
        .bind(&row.name)
        .bind(&row.category)
        .bind(row.monthly_price_cents)
        .bind(row.stock_quantity)
        .bind(&row.description)
        .execute(&mut tx)
        .await;
        match result {
            Ok(_) => imported += 1,
            Err(e) => {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.constraint() == Some("products_product_code_key") {
                        return Err(AppError::BadRequest(format!(
                            "Product code {} already in use",
                            row.product_code
                        )));
                    }
                }
                error!(?e, "DB error importing product row");
                return Err(AppError::Db(e));
            }
        }
    }
    tx.commit().await.map_err(|e| {
        error!(?e, "DB error committing import");
        AppError::Db(e)
    })?;

    Ok(Json(ImportSummary {
        imported_count: imported,
    }))
}

async fn fetch_product(pool: &PgPool, id: Uuid) -> AppResult<Product> {
    sqlx::query_as::<_, Product>(
        "SELECT id, product_code, name, category, monthly_price_cents, stock_quantity, \
         status, image_url, video_url, description, created_at, updated_at \
         FROM products WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching product");
        AppError::Db(e)
    })?
    .ok_or(AppError::NotFound)
}

fn validate_product_fields(
    product_code: &str,
    name: &str,
    monthly_price_cents: i64,
    stock_quantity: i32,
) -> AppResult<()> {
    if !PRODUCT_CODE.is_match(product_code.trim()) {
        return Err(AppError::BadRequest(format!(
            "Product code '{}' must match DSK-XXXX",
            product_code.trim()
        )));
    }
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("Name required".into()));
    }
    if monthly_price_cents < 0 {
        return Err(AppError::BadRequest("Price cannot be negative".into()));
    }
    if stock_quantity < 0 {
        return Err(AppError::BadRequest("Stock cannot be negative".into()));
    }
    Ok(())
}

struct ImportRow {
    product_code: String,
    name: String,
    category: String,
    monthly_price_cents: i64,
    stock_quantity: i32,
    description: Option<String>,
}

fn parse_import(content: &str) -> AppResult<Vec<ImportRow>> {
    let mut lines = content.lines();
    let header = lines
        .next()
        .ok_or_else(|| AppError::BadRequest("Empty CSV".into()))?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let expected = [
        "product_code",
        "name",
        "category",
        "monthly_price_cents",
        "stock_quantity",
    ];
    for column in expected {
        if !columns.contains(&column) {
            return Err(AppError::BadRequest(format!("Missing column '{column}'")));
        }
    }
    let index = |name: &str| columns.iter().position(|c| *c == name);
    let code_idx = index("product_code").unwrap();
    let name_idx = index("name").unwrap();
    let category_idx = index("category").unwrap();
    let price_idx = index("monthly_price_cents").unwrap();
    let stock_idx = index("stock_quantity").unwrap();
    let description_idx = index("description");

    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        let field = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("").trim().to_string();
        let row_no = line_no + 2;

        let product_code = field(code_idx);
        let name = field(name_idx);
        let monthly_price_cents = field(price_idx)
            .parse::<i64>()
            .map_err(|_| AppError::BadRequest(format!("Row {row_no}: bad price")))?;
        let stock_quantity = field(stock_idx)
            .parse::<i32>()
            .map_err(|_| AppError::BadRequest(format!("Row {row_no}: bad stock quantity")))?;
        validate_product_fields(&product_code, &name, monthly_price_cents, stock_quantity)
            .map_err(|e| AppError::BadRequest(format!("Row {row_no}: {e}")))?;

        rows.push(ImportRow {
            product_code,
            name,
            category: field(category_idx),
            monthly_price_cents,
            stock_quantity,
            description: description_idx
                .map(|idx| field(idx))
                .filter(|value| !value.is_empty()),
        });
    }
    Ok(rows)
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Quote fields containing separators and neutralize leading formula
/// characters so exports open safely in spreadsheet tools.
fn escape_csv_field(field: &str) -> String {
    let starts_formula = field
        .chars()
        .next()
        .map(|c| matches!(c, '=' | '+' | '-' | '@' | '\t' | '\r'))
        .unwrap_or(false);
    let value = if starts_formula {
        format!("'{}", field)
    } else {
        field.to_string()
    };
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_code_shape_enforced() {
        assert!(validate_product_fields("DSK-CHAIR01", "Task Chair", 15900, 4).is_ok());
        assert!(validate_product_fields("chair-01", "Task Chair", 15900, 4).is_err());
        assert!(validate_product_fields("DSK-CHAIR01", "", 15900, 4).is_err());
        assert!(validate_product_fields("DSK-CHAIR01", "Task Chair", -1, 4).is_err());
    }

    #[test]
    fn import_rows_parse_with_quotes() {
        let csv = "product_code,name,category,monthly_price_cents,stock_quantity,description\n\
                   DSK-DESK01,\"Standing Desk, 120cm\",desks,25900,10,\"Height adjustable\"\n\
                   DSK-CHAIR2,Mesh Chair,chairs,15900,25,\n";
        let rows = parse_import(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Standing Desk, 120cm");
        assert_eq!(rows[0].monthly_price_cents, 25900);
        assert_eq!(rows[1].description, None);
    }

    #[test]
    fn import_rejects_missing_columns() {
        let csv = "product_code,name\nDSK-A001,Desk\n";
        assert!(parse_import(csv).is_err());
    }

    #[test]
    fn import_rejects_bad_price() {
        let csv = "product_code,name,category,monthly_price_cents,stock_quantity\n\
                   DSK-A001,Desk,desks,notanumber,5\n";
        let err = parse_import(csv).err().unwrap();
        assert!(err.to_string().contains("Row 2"));
    }

    #[test]
    fn csv_escaping_covers_separators_and_formulas() {
        assert_eq!(escape_csv_field("plain"), "plain");
        assert_eq!(escape_csv_field("a,b"), "\"a,b\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv_field("=SUM(A1)"), "'=SUM(A1)");
    }

    #[test]
    fn csv_line_splitting_round_trips_quoted_fields() {
        let fields = split_csv_line("a,\"b,c\",\"d\"\"e\",f");
        assert_eq!(fields, vec!["a", "b,c", "d\"e", "f"]);
    }
}
