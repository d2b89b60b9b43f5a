//! Read-only reporting queries. Everything here recomputes from the
//! transaction and bill tables directly rather than reading cached
//! calendar cell totals.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::money;
use crate::routes::AppState;

pub async fn total_expenses_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<TotalExpenses>, ApiError> {
    let cents = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM transactions WHERE user_id = ? AND kind = 'expense'",
    )
    .bind(user.user_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(Json(TotalExpenses {
        total_expenses: money::from_cents(cents),
    }))
}

pub async fn monthly_summary_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<MonthlySummaryItem>>, ApiError> {
    let rows = sqlx::query_as::<_, (String, i64, i64)>(
        r#"SELECT strftime('%Y-%m', date) AS month,
            COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_cents ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_cents ELSE 0 END), 0)
        FROM transactions
        WHERE user_id = ?
        GROUP BY month
        ORDER BY month DESC"#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let items = rows
        .into_iter()
        .filter_map(|(month, income_cents, expenses_cents)| {
            let month = NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d").ok()?;
            Some(MonthlySummaryItem {
                month,
                total_income: money::from_cents(income_cents),
                total_expenses: money::from_cents(expenses_cents),
                net_balance: money::from_cents(income_cents - expenses_cents),
            })
        })
        .collect();
    Ok(Json(items))
}

pub async fn annual_summary_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(q): Query<YearQuery>,
) -> Result<Json<AnnualSummary>, ApiError> {
    let year = q.year.unwrap_or_else(|| Utc::now().year());

    let (income_cents, expenses_cents) = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT
            COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_cents ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_cents ELSE 0 END), 0)
        FROM transactions
        WHERE user_id = ? AND CAST(strftime('%Y', date) AS INTEGER) = ?"#,
    )
    .bind(user.user_id)
    .bind(year)
    .fetch_one(&state.pool)
    .await?;

    let bills_cents = sqlx::query_scalar::<_, i64>(
        r#"SELECT COALESCE(SUM(amount_cents), 0)
        FROM bill_dues
        WHERE user_id = ? AND CAST(strftime('%Y', due_date) AS INTEGER) = ?"#,
    )
    .bind(user.user_id)
    .bind(year)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(AnnualSummary {
        year,
        total_income: money::from_cents(income_cents),
        total_expenses: money::from_cents(expenses_cents),
        total_bills: money::from_cents(bills_cents),
        total_balance: money::from_cents(income_cents - expenses_cents - bills_cents),
    }))
}

pub async fn monthly_pie_data_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(q): Query<YearQuery>,
) -> Result<Json<MonthlyPieData>, ApiError> {
    let year = q.year.unwrap_or_else(|| Utc::now().year());

    let tx_rows = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"SELECT CAST(strftime('%m', date) AS INTEGER) AS month,
            COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_cents ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_cents ELSE 0 END), 0)
        FROM transactions
        WHERE user_id = ? AND CAST(strftime('%Y', date) AS INTEGER) = ?
        GROUP BY month"#,
    )
    .bind(user.user_id)
    .bind(year)
    .fetch_all(&state.pool)
    .await?;

    let bill_rows = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT CAST(strftime('%m', due_date) AS INTEGER) AS month,
            COALESCE(SUM(amount_cents), 0)
        FROM bill_dues
        WHERE user_id = ? AND CAST(strftime('%Y', due_date) AS INTEGER) = ?
        GROUP BY month"#,
    )
    .bind(user.user_id)
    .bind(year)
    .fetch_all(&state.pool)
    .await?;

    let mut per_month = [(0i64, 0i64, 0i64); 12];
    for (month, income, expenses) in tx_rows {
        if (1..=12).contains(&month) {
            per_month[(month - 1) as usize].0 = income;
            per_month[(month - 1) as usize].1 = expenses;
        }
    }
    for (month, bills) in bill_rows {
        if (1..=12).contains(&month) {
            per_month[(month - 1) as usize].2 = bills;
        }
    }

    let months = per_month
        .iter()
        .enumerate()
        .filter(|(_, (income, expenses, bills))| *income != 0 || *expenses != 0 || *bills != 0)
        .map(|(i, (income, expenses, bills))| PieMonth {
            month: i as u32 + 1,
            total_income: money::from_cents(*income),
            total_expenses: money::from_cents(*expenses),
            total_bills: money::from_cents(*bills),
        })
        .collect();

    Ok(Json(MonthlyPieData { year, months }))
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct TotalExpenses {
    pub total_expenses: Decimal,
}

#[derive(Debug, Serialize)]
pub struct MonthlySummaryItem {
    pub month: NaiveDate,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub net_balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct AnnualSummary {
    pub year: i32,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub total_bills: Decimal,
    pub total_balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct MonthlyPieData {
    pub year: i32,
    pub months: Vec<PieMonth>,
}

#[derive(Debug, Serialize)]
pub struct PieMonth {
    pub month: u32,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub total_bills: Decimal,
}
