use csv::StringRecord;

use crate::core::GenericResult;
use crate::formats::Report;
use crate::ledger::{CashFlowDraft, CashFlowType, Draft};
use crate::util::DecimalRestrictions;

use super::ParsedReport;
use super::common::{self, FieldMap};

pub fn parse(report: &Report) -> GenericResult<ParsedReport> {
    let map = FieldMap::new("Cash summary", &report.fields);
    let mut result = ParsedReport::new();

    for (index, record) in report.records.iter().enumerate() {
        match parse_cash_flow(&map, record) {
            Ok(draft) => result.drafts.push(Draft::CashFlow(draft)),
            Err(e) => result.add_row_error(index, e),
        }
    }

    Ok(result)
}

fn parse_cash_flow(map: &FieldMap, record: &StringRecord) -> GenericResult<CashFlowDraft> {
    let date = map.get_date(record, "Date")?;

    let raw_type = map.get(record, "Type")?;
    let flow_type = raw_type.parse::<CashFlowType>().unwrap_or(CashFlowType::Other);

    let amount = normalize_sign(
        flow_type, map.get_amount(record, "Amount", DecimalRestrictions::NonZero)?);
    let currency = map.get(record, "Currency")?.to_uppercase();

    let external_id = common::external_id(
        map.get_optional(record, "Transaction ID"), date, &currency, amount, "cash");

    Ok(CashFlowDraft {
        external_id,
        flow_type,
        date,
        amount,
        currency,
        currency_rate: map.get_optional_amount(
            record, "FX Rate", DecimalRestrictions::StrictlyPositive)?,
        raw: common::raw_record(record),
    })
}

/// Exports disagree on amount signs: some report withdrawals and fees as
/// positive "money moved" figures, others as negative balance deltas.
/// The ledger always stores balance deltas.
pub(super) fn normalize_sign(flow_type: CashFlowType, amount: crate::types::Decimal) -> crate::types::Decimal {
    match flow_type {
        CashFlowType::Deposit | CashFlowType::Interest => amount.abs(),
        CashFlowType::Withdrawal | CashFlowType::Fee => -amount.abs(),
        CashFlowType::Other => amount,
    }
}
