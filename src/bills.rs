use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::money;
use crate::routes::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum BillKind {
    #[default]
    #[sqlx(rename = "Bill")]
    Bill,
    #[serde(rename = "Credit Card")]
    #[sqlx(rename = "Credit Card")]
    CreditCard,
}

#[derive(Debug, Deserialize)]
pub struct BillListQuery {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

pub async fn list_bills_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(q): Query<BillListQuery>,
) -> Result<Json<Vec<BillDto>>, ApiError> {
    let rows = list_bills_db(&state.pool, user.user_id, q.month, q.year).await?;
    Ok(Json(rows))
}

pub async fn list_bills_db(
    pool: &SqlitePool,
    user_id: i64,
    month: Option<u32>,
    year: Option<i32>,
) -> Result<Vec<BillDto>, sqlx::Error> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, name, amount_cents, kind, due_date, note, is_paid FROM bill_dues WHERE user_id = ",
    );
    qb.push_bind(user_id);
    // filters
    if let Some(m) = month {
        qb.push(" AND CAST(strftime('%m', due_date) AS INTEGER) = ");
        qb.push_bind(m);
    }
    if let Some(y) = year {
        qb.push(" AND CAST(strftime('%Y', due_date) AS INTEGER) = ");
        qb.push_bind(y);
    }
    qb.push(" ORDER BY due_date, id");

    let rows: Vec<BillRow> = qb.build_query_as::<BillRow>().fetch_all(pool).await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn list_bills_for_date_db(
    pool: &SqlitePool,
    user_id: i64,
    date: NaiveDate,
) -> Result<Vec<BillDto>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BillRow>(
        r#"SELECT id, name, amount_cents, kind, due_date, note, is_paid
        FROM bill_dues
        WHERE user_id = ? AND due_date = ?
        ORDER BY id"#,
    )
    .bind(user_id)
    .bind(date)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn create_bill_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<BillReq>,
) -> Result<(StatusCode, Json<BillDto>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("name", "This field may not be blank."));
    }
    let cents = money::to_cents(req.amount)
        .ok_or_else(|| ApiError::validation("amount", "amount out of range"))?;

    let row = sqlx::query_as::<_, BillRow>(
        r#"INSERT INTO bill_dues (user_id, name, amount_cents, kind, due_date, note, is_paid)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id, name, amount_cents, kind, due_date, note, is_paid"#,
    )
    .bind(user.user_id)
    .bind(&req.name)
    .bind(cents)
    .bind(req.kind)
    .bind(req.due_date)
    .bind(&req.note)
    .bind(req.is_paid)
    .fetch_one(&state.pool)
    .await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn get_bill_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(bill_id): Path<i64>,
) -> Result<Json<BillDto>, ApiError> {
    let row = sqlx::query_as::<_, BillRow>(
        r#"SELECT id, name, amount_cents, kind, due_date, note, is_paid
        FROM bill_dues WHERE id = ? AND user_id = ?"#,
    )
    .bind(bill_id)
    .bind(user.user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::NotFound("bill"))?;
    Ok(Json(row.into()))
}

pub async fn update_bill_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(bill_id): Path<i64>,
    Json(req): Json<BillReq>,
) -> Result<Json<BillDto>, ApiError> {
    let cents = money::to_cents(req.amount)
        .ok_or_else(|| ApiError::validation("amount", "amount out of range"))?;

    let row = sqlx::query_as::<_, BillRow>(
        r#"UPDATE bill_dues
        SET name = ?, amount_cents = ?, kind = ?, due_date = ?, note = ?, is_paid = ?
        WHERE id = ? AND user_id = ?
        RETURNING id, name, amount_cents, kind, due_date, note, is_paid"#,
    )
    .bind(&req.name)
    .bind(cents)
    .bind(req.kind)
    .bind(req.due_date)
    .bind(&req.note)
    .bind(req.is_paid)
    .bind(bill_id)
    .bind(user.user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::NotFound("bill"))?;
    Ok(Json(row.into()))
}

pub async fn delete_bill_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(bill_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let res = sqlx::query("DELETE FROM bill_dues WHERE id = ? AND user_id = ?")
        .bind(bill_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("bill"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, FromRow)]
struct BillRow {
    id: i64,
    name: String,
    amount_cents: i64,
    kind: BillKind,
    due_date: NaiveDate,
    note: Option<String>,
    is_paid: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct BillDto {
    pub id: i64,
    pub name: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: BillKind,
    pub due_date: NaiveDate,
    pub note: Option<String>,
    pub is_paid: bool,
}

impl From<BillRow> for BillDto {
    fn from(r: BillRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            amount: money::from_cents(r.amount_cents),
            kind: r.kind,
            due_date: r.due_date,
            note: r.note,
            is_paid: r.is_paid,
        }
    }
}

#[derive(Deserialize)]
pub struct BillReq {
    pub name: String,
    pub amount: Decimal,
    #[serde(rename = "type", default)]
    pub kind: BillKind,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_paid: bool,
}
