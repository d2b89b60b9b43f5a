use axum::{
    middleware::from_fn,
    routing::{delete, get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth, bills, calendar, ledger, summary};

pub fn app() -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::<AppState>::new()
        // profile
        .route(
            "/profile",
            get(auth::get_profile)
                .put(auth::update_profile)
                .delete(auth::delete_account),
        )
        // categories
        .route(
            "/categories",
            get(ledger::list_categories_handler).post(ledger::create_category_handler),
        )
        .route("/categories/{id}", delete(ledger::delete_category_handler))
        // transactions
        .route(
            "/transactions",
            get(ledger::list_transactions_handler).post(ledger::create_transaction_handler),
        )
        .route(
            "/transactions/total-expenses",
            get(summary::total_expenses_handler),
        )
        .route(
            "/transactions/{id}",
            get(ledger::get_transaction_handler)
                .put(ledger::update_transaction_handler)
                .delete(ledger::delete_transaction_handler),
        )
        // bills
        .route(
            "/bills",
            get(bills::list_bills_handler).post(bills::create_bill_handler),
        )
        .route(
            "/bills/{id}",
            get(bills::get_bill_handler)
                .put(bills::update_bill_handler)
                .delete(bills::delete_bill_handler),
        )
        // calendar
        .route(
            "/calendar",
            get(calendar::list_calendars_handler).post(calendar::create_calendar_handler),
        )
        .route("/calendar/{id}/day/{date}", get(calendar::day_view_handler))
        // summaries
        .route("/summary/monthly", get(summary::monthly_summary_handler))
        .route("/summary/annual", get(summary::annual_summary_handler))
        .route("/monthly-pie-data", get(summary::monthly_pie_data_handler))
        .layer(from_fn(auth::auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/signup", post(auth::signup))
        .route("/signin", post(auth::signin))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
}
