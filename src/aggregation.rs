//! Keeps calendar cell totals consistent with the transaction table.
//!
//! Cell totals are always recomputed from scratch for a (user, date) pair,
//! never adjusted by a delta, so `reconcile` is idempotent and safe to call
//! redundantly. Every function here takes a `&mut SqliteConnection` so the
//! caller can keep the reconciliation inside the same database transaction
//! as the write that triggered it.

use chrono::{Datelike, NaiveDate};
use sqlx::SqliteConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellTotals {
    pub income_cents: i64,
    pub expenses_cents: i64,
}

impl CellTotals {
    pub fn net_cents(&self) -> i64 {
        self.income_cents - self.expenses_cents
    }
}

/// Get-or-create the calendar for (user, month, year).
pub async fn ensure_calendar(
    conn: &mut SqliteConnection,
    user_id: i64,
    month: u32,
    year: i32,
) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO calendars (user_id, month, year) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(month)
        .bind(year)
        .execute(&mut *conn)
        .await?;
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM calendars WHERE user_id = ? AND month = ? AND year = ?",
    )
    .bind(user_id)
    .bind(month)
    .bind(year)
    .fetch_one(conn)
    .await
}

/// Get-or-create the zero-initialized cell for a date.
pub async fn ensure_cell(
    conn: &mut SqliteConnection,
    calendar_id: i64,
    date: NaiveDate,
) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO calendar_cells (calendar_id, date) VALUES (?, ?)")
        .bind(calendar_id)
        .bind(date)
        .execute(&mut *conn)
        .await?;
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM calendar_cells WHERE calendar_id = ? AND date = ?",
    )
    .bind(calendar_id)
    .bind(date)
    .fetch_one(conn)
    .await
}

/// Recompute the cell totals for the user's transactions dated exactly
/// `date` and persist them, creating the calendar and cell if missing.
pub async fn reconcile(
    conn: &mut SqliteConnection,
    user_id: i64,
    date: NaiveDate,
) -> Result<CellTotals, sqlx::Error> {
    let calendar_id = ensure_calendar(&mut *conn, user_id, date.month(), date.year()).await?;
    let cell_id = ensure_cell(&mut *conn, calendar_id, date).await?;

    let (income_cents, expenses_cents) = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT
            COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_cents ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_cents ELSE 0 END), 0)
        FROM transactions
        WHERE user_id = ? AND date = ?"#,
    )
    .bind(user_id)
    .bind(date)
    .fetch_one(&mut *conn)
    .await?;

    let totals = CellTotals {
        income_cents,
        expenses_cents,
    };
    sqlx::query(
        r#"UPDATE calendar_cells
        SET total_income_cents = ?, total_expenses_cents = ?, net_balance_cents = ?
        WHERE id = ?"#,
    )
    .bind(totals.income_cents)
    .bind(totals.expenses_cents)
    .bind(totals.net_cents())
    .bind(cell_id)
    .execute(conn)
    .await?;

    Ok(totals)
}

/// Ensure one cell per calendar day of the month. Cells are created
/// zero-initialized; existing cells (and their totals) are left untouched.
/// Pre-existing transactions in the month are not aggregated here.
pub async fn populate_month(
    conn: &mut SqliteConnection,
    calendar_id: i64,
    month: u32,
    year: i32,
) -> Result<(), sqlx::Error> {
    let days = days_in_month(year, month).unwrap_or(0);
    for day in 1..=days {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            sqlx::query("INSERT OR IGNORE INTO calendar_cells (calendar_id, date) VALUES (?, ?)")
                .bind(calendar_id)
                .bind(date)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((next - first).num_days() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    // Single-connection pool: each connection to sqlite::memory: would
    // otherwise see its own empty database.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        pool
    }

    async fn insert_user(pool: &SqlitePool, name: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, 'x', ?) RETURNING id",
        )
        .bind(name)
        .bind(format!("{name}@example.com"))
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn insert_tx(pool: &SqlitePool, user_id: i64, kind: &str, cents: i64, date: NaiveDate) {
        sqlx::query(
            "INSERT INTO transactions (user_id, amount_cents, kind, date, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(cents)
        .bind(kind)
        .bind(date)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn cell_totals(pool: &SqlitePool, user_id: i64, date: NaiveDate) -> (i64, i64, i64) {
        sqlx::query_as::<_, (i64, i64, i64)>(
            r#"SELECT total_income_cents, total_expenses_cents, net_balance_cents
            FROM calendar_cells cc
            JOIN calendars c ON c.id = cc.calendar_id
            WHERE c.user_id = ? AND cc.date = ?"#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(2024, 12), Some(31));
        assert_eq!(days_in_month(2024, 4), Some(30));
        assert_eq!(days_in_month(2024, 13), None);
    }

    #[tokio::test]
    async fn reconcile_recomputes_cell_from_transactions() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "ada").await;
        let date = day(2024, 3, 14);
        insert_tx(&pool, user, "income", 5000, date).await;
        insert_tx(&pool, user, "income", 3000, date).await;
        insert_tx(&pool, user, "expense", 2000, date).await;
        insert_tx(&pool, user, "expense", 499, day(2024, 3, 15)).await;

        let mut conn = pool.acquire().await.unwrap();
        let totals = reconcile(&mut conn, user, date).await.unwrap();
        drop(conn);

        assert_eq!(totals.income_cents, 8000);
        assert_eq!(totals.expenses_cents, 2000);
        assert_eq!(totals.net_cents(), 6000);
        assert_eq!(cell_totals(&pool, user, date).await, (8000, 2000, 6000));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "ida").await;
        let date = day(2024, 7, 1);
        insert_tx(&pool, user, "income", 1234, date).await;
        insert_tx(&pool, user, "expense", 234, date).await;

        let mut conn = pool.acquire().await.unwrap();
        let first = reconcile(&mut conn, user, date).await.unwrap();
        let second = reconcile(&mut conn, user, date).await.unwrap();
        drop(conn);

        assert_eq!(first, second);
        assert_eq!(cell_totals(&pool, user, date).await, (1234, 234, 1000));
    }

    #[tokio::test]
    async fn reconcile_ignores_other_users() {
        let pool = test_pool().await;
        let alice = insert_user(&pool, "alice").await;
        let bob = insert_user(&pool, "bob").await;
        let date = day(2024, 5, 2);
        insert_tx(&pool, alice, "income", 10_000, date).await;
        insert_tx(&pool, bob, "income", 77, date).await;

        let mut conn = pool.acquire().await.unwrap();
        let totals = reconcile(&mut conn, alice, date).await.unwrap();
        drop(conn);

        assert_eq!(totals.income_cents, 10_000);
        assert_eq!(cell_totals(&pool, alice, date).await, (10_000, 0, 10_000));
    }

    #[tokio::test]
    async fn populate_month_creates_a_zeroed_cell_per_day() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "leap").await;
        // A transaction already in the month is not aggregated by population.
        insert_tx(&pool, user, "income", 5000, day(2024, 2, 10)).await;

        let mut conn = pool.acquire().await.unwrap();
        let calendar_id = ensure_calendar(&mut conn, user, 2, 2024).await.unwrap();
        populate_month(&mut conn, calendar_id, 2, 2024).await.unwrap();
        drop(conn);

        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT date FROM calendar_cells WHERE calendar_id = ? ORDER BY date",
        )
        .bind(calendar_id)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(dates.len(), 29);
        assert_eq!(dates[0], day(2024, 2, 1));
        assert_eq!(dates[28], day(2024, 2, 29));
        assert_eq!(cell_totals(&pool, user, day(2024, 2, 10)).await, (0, 0, 0));
    }

    #[tokio::test]
    async fn populate_month_preserves_reconciled_cells() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "keep").await;
        let date = day(2024, 6, 15);
        insert_tx(&pool, user, "expense", 4200, date).await;

        let mut conn = pool.acquire().await.unwrap();
        reconcile(&mut conn, user, date).await.unwrap();
        let calendar_id = ensure_calendar(&mut conn, user, 6, 2024).await.unwrap();
        populate_month(&mut conn, calendar_id, 6, 2024).await.unwrap();
        drop(conn);

        assert_eq!(cell_totals(&pool, user, date).await, (0, 4200, -4200));
    }
}
