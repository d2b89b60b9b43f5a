//! Amounts are stored as integer cents so SQL sums stay exact; the API
//! boundary works in `Decimal` with two fraction digits.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub fn to_cents(amount: Decimal) -> Option<i64> {
    (amount.round_dp(2) * Decimal::ONE_HUNDRED).to_i64()
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
