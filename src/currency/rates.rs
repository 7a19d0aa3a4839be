use std::collections::BTreeMap;

use chrono::Duration;
use csv::ReaderBuilder;
use diesel::prelude::*;

use crate::core::{EmptyResult, GenericResult};
use crate::db::{self, models, schema::{currency_rates, positions, snapshots}};
use crate::types::{Date, Decimal};
use crate::util::{self, DecimalRestrictions};

use super::CurrencyRate;

/// Loads a rate table export into the database. The expected layout is a
/// plain CSV with Date, Currency and Rate columns, one quote per row, rates
/// expressed against the base currency. Re-imported quotes overwrite the
/// stored ones.
pub fn import(conn: &mut db::Connection, data: &[u8]) -> GenericResult<usize> {
    let mut reader = ReaderBuilder::new().from_reader(data);

    let headers = reader.headers()?.clone();
    let index = |name: &str| headers.iter()
        .position(|field| field.trim() == name)
        .ok_or_else(|| format!("The rate table has no {:?} column", name));

    let (date_index, currency_index, rate_index) =
        (index("Date")?, index("Currency")?, index("Rate")?);

    let mut rates: BTreeMap<String, Vec<CurrencyRate>> = BTreeMap::new();
    let mut count = 0;

    for record in reader.records() {
        let record = record?;

        let date = util::parse_flexible_date(record.get(date_index).unwrap_or_default())?;
        let currency = record.get(currency_index).unwrap_or_default().trim().to_uppercase();
        if currency.is_empty() {
            return Err!("Got a rate table record with no currency: {:?}", record);
        }

        let rate = util::parse_amount(
            record.get(rate_index).unwrap_or_default(), DecimalRestrictions::StrictlyPositive)?;

        rates.entry(currency).or_default().push(CurrencyRate {date, rate});
        count += 1;
    }

    for (currency, rates) in &rates {
        save(conn, currency, rates)?;
    }

    Ok(count)
}

pub fn save(conn: &mut db::Connection, currency: &str, rates: &[CurrencyRate]) -> EmptyResult {
    let rows: Vec<_> = rates.iter().map(|rate| models::NewCurrencyRate {
        currency: currency,
        date: rate.date,
        rate: rate.rate.to_string(),
    }).collect();

    diesel::replace_into(currency_rates::table)
        .values(rows)
        .execute(conn)?;

    Ok(())
}

/// Returns the rate for the latest date <= the requested one within the
/// specified window. Rate tables are sparse (no quotes on weekends and
/// holidays), so an exact date match is the exception rather than the rule.
pub fn nearest_prior(
    conn: &mut db::Connection, currency: &str, date: Date, window_days: i64,
) -> GenericResult<Option<(Date, Decimal)>> {
    let min_date = date - Duration::days(window_days);

    let result = currency_rates::table
        .select((currency_rates::date, currency_rates::rate))
        .filter(currency_rates::currency.eq(currency))
        .filter(currency_rates::date.le(date))
        .filter(currency_rates::date.ge(min_date))
        .order(currency_rates::date.desc())
        .limit(1)
        .get_result::<(Date, String)>(conn).optional()?;

    Ok(match result {
        Some((rate_date, rate)) => {
            let rate = util::parse_decimal(&rate, DecimalRestrictions::StrictlyPositive)
                .map_err(|_| format!("Got an invalid rate from the database: {:?}", rate))?;
            Some((rate_date, rate))
        },
        None => None,
    })
}

/// The position-fallback heuristic: a holdings snapshot in the same currency
/// may carry a broker-reported rate for a nearby date which can be reused
/// when the payment itself has none. Never crosses currencies.
pub fn position_rate(
    conn: &mut db::Connection, currency: &str, date: Date,
) -> GenericResult<Option<Decimal>> {
    let candidates = positions::table
        .inner_join(snapshots::table)
        .select((snapshots::date, positions::currency_rate))
        .filter(positions::currency.eq(currency))
        .filter(positions::currency_rate.is_not_null())
        .load::<(Date, Option<String>)>(conn)?;

    let mut best: Option<(i64, Decimal)> = None;

    for (position_date, rate) in candidates {
        let rate = match rate {
            Some(rate) => util::parse_decimal(&rate, DecimalRestrictions::StrictlyPositive)
                .map_err(|_| format!("Got an invalid rate from the database: {:?}", rate))?,
            None => continue,
        };

        let distance = (date - position_date).num_days().abs();
        let better = match best {
            Some((best_distance, _)) => distance < best_distance,
            None => true,
        };

        if better {
            best.replace((distance, rate));
        }
    }

    Ok(best.map(|(_, rate)| rate))
}
