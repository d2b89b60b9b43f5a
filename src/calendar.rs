use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::aggregation;
use crate::auth::AuthUser;
use crate::bills::{self, BillDto};
use crate::error::{is_unique_violation, ApiError};
use crate::ledger::{self, TransactionDto};
use crate::money;
use crate::routes::AppState;

pub async fn list_calendars_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(q): Query<CalendarListQuery>,
) -> Result<Json<Vec<CalendarDto>>, ApiError> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id, month, year FROM calendars WHERE user_id = ");
    qb.push_bind(user.user_id);
    if let Some(m) = q.month {
        qb.push(" AND month = ");
        qb.push_bind(m);
    }
    if let Some(y) = q.year {
        qb.push(" AND year = ");
        qb.push_bind(y);
    }
    qb.push(" ORDER BY year DESC, month DESC");
    let calendars: Vec<CalendarRow> = qb.build_query_as::<CalendarRow>().fetch_all(&state.pool).await?;

    let dtos = assemble_calendars(&state.pool, user.user_id, calendars).await?;
    Ok(Json(dtos))
}

pub async fn create_calendar_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateCalendarReq>,
) -> Result<(StatusCode, Json<CalendarDto>), ApiError> {
    if !(1..=12).contains(&req.month) {
        return Err(ApiError::validation("month", "month must be between 1 and 12"));
    }
    if aggregation::days_in_month(req.year, req.month).is_none() {
        return Err(ApiError::validation("year", "invalid year"));
    }

    let mut tx = state.pool.begin().await?;
    let calendar_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO calendars (user_id, month, year) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(user.user_id)
    .bind(req.month)
    .bind(req.year)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::validation("calendar", "calendar for this month already exists")
        } else {
            ApiError::Database(e)
        }
    })?;
    aggregation::populate_month(&mut tx, calendar_id, req.month, req.year).await?;
    tx.commit().await?;

    let row = CalendarRow {
        id: calendar_id,
        month: req.month,
        year: req.year,
    };
    let mut dtos = assemble_calendars(&state.pool, user.user_id, vec![row]).await?;
    let dto = dtos.pop().ok_or(ApiError::NotFound("calendar"))?;
    Ok((StatusCode::CREATED, Json(dto)))
}

pub async fn day_view_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((calendar_id, date_str)): Path<(i64, String)>,
) -> Result<Json<DayView>, ApiError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM calendars WHERE id = ? AND user_id = ?")
        .bind(calendar_id)
        .bind(user.user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::NotFound("calendar"))?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date", "Invalid date format (use YYYY-MM-DD)"))?;

    let transactions = ledger::list_transactions_for_date_db(&state.pool, user.user_id, date).await?;
    let bills = bills::list_bills_for_date_db(&state.pool, user.user_id, date).await?;

    // always recomputed from the ledger, not read from the cached cell
    let (income_cents, expenses_cents) = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT
            COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_cents ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_cents ELSE 0 END), 0)
        FROM transactions
        WHERE user_id = ? AND date = ?"#,
    )
    .bind(user.user_id)
    .bind(date)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(DayView {
        date,
        transactions,
        bills,
        total_income: money::from_cents(income_cents),
        total_expenses: money::from_cents(expenses_cents),
        net_balance: money::from_cents(income_cents - expenses_cents),
    }))
}

async fn assemble_calendars(
    pool: &SqlitePool,
    user_id: i64,
    calendars: Vec<CalendarRow>,
) -> Result<Vec<CalendarDto>, ApiError> {
    if calendars.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"SELECT id, calendar_id, date, total_income_cents, total_expenses_cents, net_balance_cents
        FROM calendar_cells WHERE calendar_id IN ("#,
    );
    let mut sep = qb.separated(", ");
    for c in &calendars {
        sep.push_bind(c.id);
    }
    qb.push(") ORDER BY date");
    let cell_rows: Vec<CellRow> = qb.build_query_as::<CellRow>().fetch_all(pool).await?;

    let all_bills = bills::list_bills_db(pool, user_id, None, None).await?;
    let mut bills_by_date: HashMap<NaiveDate, Vec<BillDto>> = HashMap::new();
    for bill in all_bills {
        bills_by_date.entry(bill.due_date).or_default().push(bill);
    }

    let mut cells_map: HashMap<i64, Vec<CellDto>> = HashMap::new();
    for row in cell_rows {
        let cell_bills = bills_by_date.get(&row.date).cloned().unwrap_or_default();
        cells_map.entry(row.calendar_id).or_default().push(CellDto {
            id: row.id,
            date: row.date,
            total_income: money::from_cents(row.total_income_cents),
            total_expenses: money::from_cents(row.total_expenses_cents),
            net_balance: money::from_cents(row.net_balance_cents),
            bills: cell_bills,
        });
    }

    let mut result = Vec::with_capacity(calendars.len());
    for c in calendars {
        let cells = cells_map.remove(&c.id).unwrap_or_default();
        result.push(CalendarDto {
            id: c.id,
            month: c.month,
            year: c.year,
            cells,
        });
    }
    Ok(result)
}

#[derive(Debug, Deserialize)]
pub struct CalendarListQuery {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

#[derive(Deserialize)]
pub struct CreateCalendarReq {
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, FromRow)]
struct CalendarRow {
    id: i64,
    month: u32,
    year: i32,
}

#[derive(Debug, FromRow)]
struct CellRow {
    id: i64,
    calendar_id: i64,
    date: NaiveDate,
    total_income_cents: i64,
    total_expenses_cents: i64,
    net_balance_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct CalendarDto {
    pub id: i64,
    pub month: u32,
    pub year: i32,
    pub cells: Vec<CellDto>,
}

#[derive(Debug, Serialize)]
pub struct CellDto {
    pub id: i64,
    pub date: NaiveDate,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub net_balance: Decimal,
    pub bills: Vec<BillDto>,
}

#[derive(Debug, Serialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub transactions: Vec<TransactionDto>,
    pub bills: Vec<BillDto>,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub net_balance: Decimal,
}
