use std::collections::{HashMap, HashSet};

use diesel::prelude::*;
use itertools::Itertools;

use crate::core::EmptyResult;
use crate::db;
use crate::db::schema::{
    cash_flows, corporate_actions, dividends, instrument_aliases, instruments, positions,
    snapshots, trades,
};
use crate::types::Date;

use super::{CheckKind, Finding, Severity};

/// Records that reference no catalog instrument and catalog entries nothing
/// references. Soft-linked positions are legal (historical exports predate
/// ISIN columns), but they degrade every per-instrument report, so each
/// audit run keeps counting them.
pub fn orphan_records(conn: &mut db::Connection, findings: &mut Vec<Finding>) -> EmptyResult {
    let orphaned_positions: i64 = positions::table
        .filter(positions::instrument_id.is_null())
        .count().get_result(conn)?;

    if orphaned_positions > 0 {
        findings.push(Finding::new(
            CheckKind::OrphanRecords, Severity::Warning, format!(
                "{} positions are linked to the catalog by symbol only", orphaned_positions)));
    }

    let unlinked_actions: i64 = corporate_actions::table
        .filter(corporate_actions::instrument_id.is_null())
        .count().get_result(conn)?;

    if unlinked_actions > 0 {
        findings.push(Finding::new(
            CheckKind::OrphanRecords, Severity::Info, format!(
                "{} corporate actions reference no catalog instrument", unlinked_actions)));
    }

    let mut referenced: HashSet<i32> = HashSet::new();
    referenced.extend(trades::table.select(trades::instrument_id).load::<i32>(conn)?);
    referenced.extend(dividends::table.select(dividends::instrument_id).load::<i32>(conn)?);
    referenced.extend(positions::table
        .filter(positions::instrument_id.is_not_null())
        .select(positions::instrument_id.assume_not_null())
        .load::<i32>(conn)?);
    referenced.extend(corporate_actions::table
        .filter(corporate_actions::instrument_id.is_not_null())
        .select(corporate_actions::instrument_id.assume_not_null())
        .load::<i32>(conn)?);

    let unreferenced = instruments::table.select(instruments::id).load::<i32>(conn)?
        .into_iter().filter(|id| !referenced.contains(id)).count();

    if unreferenced > 0 {
        findings.push(Finding::new(
            CheckKind::OrphanRecords, Severity::Info, format!(
                "{} catalog entries have no ledger records", unreferenced)));
    }

    Ok(())
}

/// Amounts that couldn't be converted into the base currency. These are
/// excluded from every base-currency total, so their existence has to stay
/// visible.
pub fn missing_fields(
    conn: &mut db::Connection, base_currency: &str, findings: &mut Vec<Finding>,
) -> EmptyResult {
    let unconverted_dividends: i64 = dividends::table
        .filter(dividends::base_amount.is_null())
        .count().get_result(conn)?;

    if unconverted_dividends > 0 {
        findings.push(Finding::new(
            CheckKind::MissingFields, Severity::Warning, format!(
                "{} dividends have no base currency amount", unconverted_dividends)));
    }

    let unconverted_cash_flows: i64 = cash_flows::table
        .filter(cash_flows::base_amount.is_null())
        .count().get_result(conn)?;

    if unconverted_cash_flows > 0 {
        findings.push(Finding::new(
            CheckKind::MissingFields, Severity::Warning, format!(
                "{} cash flows have no base currency amount", unconverted_cash_flows)));
    }

    let unconverted_trades: i64 = trades::table
        .filter(trades::currency.ne(base_currency))
        .filter(trades::currency_rate.is_null())
        .count().get_result(conn)?;

    if unconverted_trades > 0 {
        findings.push(Finding::new(
            CheckKind::MissingFields, Severity::Info, format!(
                "{} cross-currency trades carry no conversion rate", unconverted_trades)));
    }

    let missing_currency: i64 = instruments::table
        .filter(instruments::currency.is_null())
        .count().get_result(conn)?;

    if missing_currency > 0 {
        findings.push(Finding::new(
            CheckKind::MissingFields, Severity::Warning, format!(
                "{} catalog entries carry no currency", missing_currency)));
    }

    Ok(())
}

/// Cross-record consistency that UNIQUE and FOREIGN KEY constraints can't
/// express.
pub fn referential_integrity(conn: &mut db::Connection, findings: &mut Vec<Finding>) -> EmptyResult {
    // A position carrying an ISIN must be linked: the importer resolves
    // every ISIN it sees, so an unlinked one means the pipeline was bypassed
    let broken_positions: i64 = positions::table
        .filter(positions::isin.is_not_null())
        .filter(positions::instrument_id.is_null())
        .count().get_result(conn)?;

    if broken_positions > 0 {
        findings.push(Finding::new(
            CheckKind::ReferentialIntegrity, Severity::Error, format!(
                "{} positions carry an ISIN but aren't linked to the catalog", broken_positions)));
    }

    let primary_aliases: Vec<i32> = instrument_aliases::table
        .filter(instrument_aliases::is_primary.eq(true))
        .select(instrument_aliases::instrument_id)
        .load(conn)?;

    for (instrument_id, count) in primary_aliases.into_iter().counts() {
        if count > 1 {
            findings.push(Finding::new(
                CheckKind::ReferentialIntegrity, Severity::Error, format!(
                    "Instrument #{} has {} primary aliases", instrument_id, count)));
        }
    }

    // Foreign keys are enforced on our connections, but the database file may
    // have been written by other tools with the pragma off
    let dangling_trades: i64 = trades::table
        .left_join(instruments::table)
        .filter(instruments::id.is_null())
        .count().get_result(conn)?;

    let dangling_dividends: i64 = dividends::table
        .left_join(instruments::table)
        .filter(instruments::id.is_null())
        .count().get_result(conn)?;

    let dangling_actions: i64 = corporate_actions::table
        .left_join(instruments::table)
        .filter(corporate_actions::instrument_id.is_not_null())
        .filter(instruments::id.is_null())
        .count().get_result(conn)?;

    let dangling = dangling_trades + dangling_dividends + dangling_actions;
    if dangling > 0 {
        findings.push(Finding::new(
            CheckKind::ReferentialIntegrity, Severity::Error, format!(
                "{} records reference a non-existent instrument", dangling)));
    }

    Ok(())
}

/// Suspected duplicates that slipped past external id deduplication: the
/// same id classified into different record types, or identical business
/// fields under different native transaction ids.
pub fn duplicates(conn: &mut db::Connection, findings: &mut Vec<Finding>) -> EmptyResult {
    let mut tables: HashMap<String, Vec<&str>> = HashMap::new();

    for id in trades::table.select(trades::external_id).load::<String>(conn)? {
        tables.entry(id).or_default().push("trades");
    }
    for id in dividends::table.select(dividends::external_id).load::<String>(conn)? {
        tables.entry(id).or_default().push("dividends");
    }
    for id in cash_flows::table.select(cash_flows::external_id).load::<String>(conn)? {
        tables.entry(id).or_default().push("cash flows");
    }

    for (id, tables) in tables.into_iter().sorted() {
        if tables.len() > 1 {
            findings.push(Finding::new(
                CheckKind::Duplicates, Severity::Warning, format!(
                    "External id {:?} occurs in multiple record types: {}",
                    id, tables.join(", "))));
        }
    }

    let trades: Vec<(i32, crate::types::Date, String, String)> = trades::table
        .select((trades::instrument_id, trades::date, trades::quantity, trades::amount))
        .load(conn)?;

    for (key, count) in trades.into_iter().counts() {
        if count > 1 {
            findings.push(Finding::new(
                CheckKind::Duplicates, Severity::Warning, format!(
                    "{} trades of instrument #{} on {} share quantity {} and amount {}: \
                     possibly the same trade under different transaction ids",
                    count, key.0, key.1, key.2, key.3)));
        }
    }

    // Can't happen through our writer (UNIQUE on snapshot date), so any hit
    // means the database was modified out of band
    let dates: Vec<Date> = snapshots::table.select(snapshots::date).load(conn)?;
    for (date, count) in dates.into_iter().counts() {
        if count > 1 {
            findings.push(Finding::new(
                CheckKind::Duplicates, Severity::Error, format!(
                    "{} snapshots share the date {}", count, date)));
        }
    }

    Ok(())
}
