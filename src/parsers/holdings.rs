use std::collections::BTreeMap;

use csv::StringRecord;

use crate::catalog::InstrumentHints;
use crate::core::GenericResult;
use crate::formats::Report;
use crate::ledger::{Draft, PositionDraft, SnapshotDraft};
use crate::types::{Date, Decimal};
use crate::util::DecimalRestrictions;

use super::ParsedReport;
use super::common::{self, FieldMap};

pub fn parse(report: &Report) -> GenericResult<ParsedReport> {
    let map = FieldMap::new("Holdings", &report.fields);
    let mut result = ParsedReport::new();

    // A single export may carry several snapshot dates (some brokers bundle
    // month-end snapshots into one file), so positions are grouped by date.
    let mut snapshots: BTreeMap<Date, Vec<PositionDraft>> = BTreeMap::new();

    for (index, record) in report.records.iter().enumerate() {
        match parse_position(&map, record) {
            Ok((date, position)) => snapshots.entry(date).or_default().push(position),
            Err(e) => result.add_row_error(index, e),
        }
    }

    for (date, positions) in snapshots {
        result.drafts.push(Draft::Snapshot(SnapshotDraft {
            date,
            reported_value: None,
            positions,
        }));
    }

    Ok(result)
}

fn parse_position(map: &FieldMap, record: &StringRecord) -> GenericResult<(Date, PositionDraft)> {
    let date = map.get_date(record, "Date")?;
    let symbol = map.get(record, "Symbol")?.to_owned();

    let isin = match map.get_optional(record, "ISIN") {
        Some(isin) => {
            isin::parse(isin).map_err(|_| format!("Invalid ISIN: {:?}", isin))?;
            Some(isin.to_owned())
        },
        None => None,
    };

    let quantity = map.get_amount(record, "Quantity", DecimalRestrictions::NonZero)?;
    let price = map.get_optional_amount(record, "Price", DecimalRestrictions::StrictlyPositive)?;
    let value = map.get_amount(record, "Market Value", DecimalRestrictions::No)?;
    let currency = map.get(record, "Currency")?.to_uppercase();
    let currency_rate = map.get_optional_amount(
        record, "FX Rate", DecimalRestrictions::StrictlyPositive)?;

    let hints = InstrumentHints {
        symbol: Some(symbol.clone()),
        name: map.get_optional(record, "Name").map(ToOwned::to_owned),
        currency: Some(currency.clone()),
        ..Default::default()
    };

    Ok((date, position_draft(
        date, symbol, isin, hints, quantity, price, value, currency, currency_rate,
        common::raw_record(record))))
}

/// Shared with the multi-section statement parser: identical positions
/// discovered through different report types must derive identical external
/// ids, so overlapping exports deduplicate against each other.
pub(super) fn position_draft(
    date: Date, symbol: String, isin: Option<String>, hints: InstrumentHints,
    quantity: Decimal, price: Option<Decimal>, value: Decimal, currency: String,
    currency_rate: Option<Decimal>, raw: String,
) -> PositionDraft {
    let instrument_key = isin.as_deref().unwrap_or(&symbol);
    let external_id = common::external_id(None, date, instrument_key, value, "position");

    PositionDraft {
        external_id,
        symbol,
        isin,
        hints,
        quantity,
        price,
        value,
        currency,
        currency_rate,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use crate::formats;

    use indoc::indoc;
    use matches::assert_matches;

    use super::*;

    #[test]
    fn parsing() {
        let data = indoc!("
            Date,Symbol,ISIN,Name,Quantity,Price,Market Value,Currency,FX Rate
            2026-01-28,KESKOB,FI0009000202,Kesko Oyj B,100,21.50,2150.00,EUR,
            2026-01-28,TELIA1,SE0000667925,Telia Company,500,3.80,1900.00,EUR,
            2026-01-28,AAPL,US0378331005,Apple Inc,10,230.00,2300.00,USD,0.92
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.drafts.len(), 1);

        let snapshot = match &parsed.drafts[0] {
            Draft::Snapshot(snapshot) => snapshot,
            _ => panic!("Expected a snapshot draft"),
        };

        assert_eq!(snapshot.date, date!(2026, 1, 28));
        assert_eq!(snapshot.positions.len(), 3);
        assert_eq!(snapshot.positions[0].value, dec!(2150));
        assert_eq!(snapshot.positions[2].currency_rate, Some(dec!(0.92)));
    }

    #[test]
    fn bad_rows_are_skipped() {
        let data = indoc!("
            Date,Symbol,ISIN,Name,Quantity,Price,Market Value,Currency,FX Rate
            2026-01-28,KESKOB,FI0009000202,Kesko Oyj B,100,21.50,2150.00,EUR,
            not-a-date,TELIA1,SE0000667925,Telia Company,500,3.80,1900.00,EUR,
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();

        assert_eq!(parsed.drafts.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert_matches!(parsed.errors[0].as_str(), error if error.contains("Invalid date"));
    }

    #[test]
    fn soft_linked_position() {
        // Historical exports may predate ISIN columns entirely
        let data = indoc!("
            Date,Symbol,Quantity,Market Value,Currency
            2019-12-31,NOKIA,1000,3290.00,EUR
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();
        assert!(parsed.errors.is_empty());

        let snapshot = match &parsed.drafts[0] {
            Draft::Snapshot(snapshot) => snapshot,
            _ => panic!("Expected a snapshot draft"),
        };
        assert_eq!(snapshot.positions[0].isin, None);
        assert_eq!(snapshot.positions[0].symbol, "NOKIA");
    }
}
