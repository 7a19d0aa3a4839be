use csv::StringRecord;

use crate::catalog::InstrumentHints;
use crate::core::GenericResult;
use crate::formats::Report;
use crate::ledger::{Draft, TradeDraft};
use crate::util::DecimalRestrictions;

use super::ParsedReport;
use super::common::{self, FieldMap};

pub fn parse(report: &Report) -> GenericResult<ParsedReport> {
    let map = FieldMap::new("Trades", &report.fields);
    let mut result = ParsedReport::new();

    for (index, record) in report.records.iter().enumerate() {
        match parse_trade(&map, record) {
            Ok(draft) => result.drafts.push(Draft::Trade(draft)),
            Err(e) => result.add_row_error(index, e),
        }
    }

    Ok(result)
}

pub(super) fn parse_trade(map: &FieldMap, record: &StringRecord) -> GenericResult<TradeDraft> {
    let date = map.get_date(record, "Trade Date")?;
    let settlement_date = map.get_optional_date(record, "Settle Date")?;
    let symbol = map.get(record, "Symbol")?.to_owned();

    let isin = map.get(record, "ISIN")?;
    isin::parse(isin).map_err(|_| format!("Invalid ISIN: {:?}", isin))?;

    let trade_type = map.get(record, "Type")?;
    let sign = match trade_type.to_uppercase().as_str() {
        "BUY" => dec!(1),
        "SELL" => dec!(-1),
        _ => return Err!("Unsupported trade type: {:?}", trade_type),
    };

    let quantity = sign * map.get_amount(record, "Quantity", DecimalRestrictions::StrictlyPositive)?;
    let price = map.get_optional_amount(record, "Price", DecimalRestrictions::StrictlyPositive)?;
    let amount = map.get_amount(record, "Amount", DecimalRestrictions::StrictlyPositive)?;
    let commission = map.get_optional_amount(record, "Commission", DecimalRestrictions::No)?;
    let currency = map.get(record, "Currency")?.to_uppercase();
    let currency_rate = map.get_optional_amount(
        record, "FX Rate", DecimalRestrictions::StrictlyPositive)?;

    // Derivative confirmations carry a contract multiplier
    let multiplier = map.get_optional_amount(
        record, "Multiplier", DecimalRestrictions::StrictlyPositive)?;

    let external_id = common::external_id(
        map.get_optional(record, "Transaction ID"), date, isin, sign * amount, "trade");

    Ok(TradeDraft {
        external_id,
        isin: isin.to_owned(),
        hints: InstrumentHints {
            symbol: Some(symbol),
            currency: Some(currency.clone()),
            multiplier,
            ..Default::default()
        },
        date,
        settlement_date,
        quantity,
        price,
        amount,
        commission,
        currency,
        currency_rate,
        raw: common::raw_record(record),
    })
}
