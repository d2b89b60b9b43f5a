use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::aggregation;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::money;
use crate::routes::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TxKind {
    Income,
    Expense,
}

pub async fn create_category_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateCategoryReq>,
) -> Result<(StatusCode, Json<CategoryDto>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("name", "This field may not be blank."));
    }
    let row = create_category_db(&state.pool, user.user_id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn create_category_db(
    pool: &SqlitePool,
    user_id: i64,
    name: &str,
) -> Result<CategoryDto, sqlx::Error> {
    sqlx::query_as::<_, CategoryDto>(
        r#"INSERT INTO categories (user_id, name) VALUES (?, ?) RETURNING id, name"#,
    )
    .bind(user_id)
    .bind(name)
    .fetch_one(pool)
    .await
}

pub async fn list_categories_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<CategoryDto>>, ApiError> {
    let rows = sqlx::query_as::<_, CategoryDto>(
        r#"SELECT id, name FROM categories WHERE user_id = ? ORDER BY name"#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

pub async fn delete_category_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(category_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    // dependent transactions keep their rows, category_id goes NULL
    let res = sqlx::query("DELETE FROM categories WHERE id = ? AND user_id = ?")
        .bind(category_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("category"));
    }
    Ok(StatusCode::NO_CONTENT)
}

const TX_SELECT: &str = r#"SELECT t.id, t.amount_cents, t.kind, t.description, t.date, t.category_id, c.name AS category_name
FROM transactions t
LEFT JOIN categories c ON c.id = t.category_id"#;

pub async fn list_transactions_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<TransactionDto>>, ApiError> {
    let sql = format!("{TX_SELECT} WHERE t.user_id = ? ORDER BY t.date DESC, t.id DESC");
    let rows = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(user.user_id)
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn list_transactions_for_date_db(
    pool: &SqlitePool,
    user_id: i64,
    date: NaiveDate,
) -> Result<Vec<TransactionDto>, sqlx::Error> {
    let sql = format!("{TX_SELECT} WHERE t.user_id = ? AND t.date = ? ORDER BY t.id");
    let rows = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(user_id)
        .bind(date)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn get_transaction_db(
    pool: &SqlitePool,
    user_id: i64,
    tx_id: i64,
) -> Result<Option<TransactionDto>, sqlx::Error> {
    let sql = format!("{TX_SELECT} WHERE t.user_id = ? AND t.id = ?");
    let row = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(user_id)
        .bind(tx_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Into::into))
}

pub async fn get_transaction_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(tx_id): Path<i64>,
) -> Result<Json<TransactionDto>, ApiError> {
    let dto = get_transaction_db(&state.pool, user.user_id, tx_id)
        .await?
        .ok_or(ApiError::NotFound("transaction"))?;
    Ok(Json(dto))
}

pub async fn create_transaction_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<TransactionReq>,
) -> Result<(StatusCode, Json<TransactionDto>), ApiError> {
    let cents = money::to_cents(req.amount)
        .ok_or_else(|| ApiError::validation("amount", "amount out of range"))?;
    let date = req.date.unwrap_or_else(|| Utc::now().date_naive());
    if let Some(category_id) = req.category_id {
        check_category(&state.pool, user.user_id, category_id).await?;
    }

    let mut tx = state.pool.begin().await?;
    let tx_id = sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO transactions (user_id, category_id, amount_cents, kind, description, date, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id"#,
    )
    .bind(user.user_id)
    .bind(req.category_id)
    .bind(cents)
    .bind(req.kind)
    .bind(&req.description)
    .bind(date)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;
    aggregation::reconcile(&mut tx, user.user_id, date).await?;
    tx.commit().await?;

    let dto = get_transaction_db(&state.pool, user.user_id, tx_id)
        .await?
        .ok_or(ApiError::NotFound("transaction"))?;
    Ok((StatusCode::CREATED, Json(dto)))
}

pub async fn update_transaction_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(tx_id): Path<i64>,
    Json(req): Json<TransactionReq>,
) -> Result<Json<TransactionDto>, ApiError> {
    let cents = money::to_cents(req.amount)
        .ok_or_else(|| ApiError::validation("amount", "amount out of range"))?;
    let existing_date = sqlx::query_scalar::<_, NaiveDate>(
        "SELECT date FROM transactions WHERE id = ? AND user_id = ?",
    )
    .bind(tx_id)
    .bind(user.user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::NotFound("transaction"))?;
    if let Some(category_id) = req.category_id {
        check_category(&state.pool, user.user_id, category_id).await?;
    }
    let date = req.date.unwrap_or(existing_date);

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        r#"UPDATE transactions
        SET amount_cents = ?, kind = ?, description = ?, category_id = ?, date = ?
        WHERE id = ? AND user_id = ?"#,
    )
    .bind(cents)
    .bind(req.kind)
    .bind(&req.description)
    .bind(req.category_id)
    .bind(date)
    .bind(tx_id)
    .bind(user.user_id)
    .execute(&mut *tx)
    .await?;
    aggregation::reconcile(&mut tx, user.user_id, date).await?;
    tx.commit().await?;

    let dto = get_transaction_db(&state.pool, user.user_id, tx_id)
        .await?
        .ok_or(ApiError::NotFound("transaction"))?;
    Ok(Json(dto))
}

pub async fn delete_transaction_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(tx_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    // delete does not reconcile; the cell is refreshed on the next write to
    // that date
    let res = sqlx::query("DELETE FROM transactions WHERE id = ? AND user_id = ?")
        .bind(tx_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("transaction"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn check_category(
    pool: &SqlitePool,
    user_id: i64,
    category_id: i64,
) -> Result<(), ApiError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM categories WHERE id = ? AND user_id = ?",
    )
    .bind(category_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    if count == 0 {
        return Err(ApiError::validation("category_id", "invalid category"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Clone, FromRow)]
pub struct CategoryDto {
    pub id: i64,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateCategoryReq {
    pub name: String,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    amount_cents: i64,
    kind: TxKind,
    description: Option<String>,
    date: NaiveDate,
    category_id: Option<i64>,
    category_name: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct TransactionDto {
    pub id: i64,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub category: Option<CategoryDto>,
}

impl From<TransactionRow> for TransactionDto {
    fn from(r: TransactionRow) -> Self {
        let category = match (r.category_id, r.category_name) {
            (Some(id), Some(name)) => Some(CategoryDto { id, name }),
            _ => None,
        };
        Self {
            id: r.id,
            amount: money::from_cents(r.amount_cents),
            kind: r.kind,
            description: r.description,
            date: r.date,
            category,
        }
    }
}

#[derive(Deserialize)]
pub struct TransactionReq {
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TxKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}
