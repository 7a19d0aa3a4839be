use std::collections::BTreeMap;

use csv::StringRecord;
use log::warn;

use crate::catalog::InstrumentHints;
use crate::core::GenericResult;
use crate::formats::Report;
use crate::ledger::{CashFlowDraft, CashFlowType, Draft, DividendDraft};
use crate::types::{Date, Decimal};
use crate::util::{self, DecimalRestrictions};

use super::ParsedReport;
use super::common::{self, FieldMap};

pub fn parse(report: &Report) -> GenericResult<ParsedReport> {
    let map = FieldMap::new("Dividends", &report.fields);
    let mut result = ParsedReport::new();
    let mut accruals = DividendAccruals::new();

    for (index, record) in report.records.iter().enumerate() {
        let row = parse_row(&map, record).map(|row| accruals.add(row));
        if let Err(e) = row {
            result.add_row_error(index, e);
        }
    }

    accruals.finalize(&mut result);
    Ok(result)
}

fn parse_row(map: &FieldMap, record: &StringRecord) -> GenericResult<DividendRow> {
    let date = map.get_date(record, "Pay Date")?;
    let description = map.get(record, "Description")?;

    let security = common::parse_security_description(description).ok_or_else(|| format!(
        "Unable to extract the security from {:?}", description))?;

    let amount = map.get_amount(record, "Amount", DecimalRestrictions::NonZero)?;
    let currency = map.get(record, "Currency")?.to_uppercase();

    let row_type = map.get(record, "Type")?;
    let kind = match row_type {
        "Dividend" | "Payment in Lieu" => DividendRowKind::Gross {
            per_share: common::parse_per_share_amount(description),
            ex_date: map.get_optional_date(record, "Ex Date")?,
            currency_rate: map.get_optional_amount(
                record, "FX Rate", DecimalRestrictions::StrictlyPositive)?,
        },
        "Withholding Tax" => DividendRowKind::Withholding,
        _ => return Err!("Unsupported dividend row type: {:?}", row_type),
    };

    Ok(DividendRow {
        kind,
        date,
        isin: security.isin,
        symbol: security.symbol,
        currency,
        amount,
        record: record.clone(),
    })
}

pub(super) enum DividendRowKind {
    Gross {
        per_share: Option<Decimal>,
        ex_date: Option<Date>,
        currency_rate: Option<Decimal>,
    },
    Withholding,
}

pub(super) struct DividendRow {
    pub kind: DividendRowKind,
    pub date: Date,
    pub isin: String,
    pub symbol: String,
    pub currency: String,
    pub amount: Decimal,
    pub record: StringRecord,
}

/// Pairs dividend gross-amount rows with their withholding-tax rows by
/// (instrument, date, currency). Many source formats emit these as separate
/// unpaired rows, sometimes in different sections or even different files of
/// the same export. Withholding reversals come as positive amounts and
/// cancel out in the sum.
pub(super) struct DividendAccruals {
    accruals: BTreeMap<(String, Date, String), Accrual>,
}

#[derive(Default)]
struct Accrual {
    symbol: String,
    gross: Decimal,
    withheld: Decimal,
    per_share: Option<Decimal>,
    ex_date: Option<Date>,
    currency_rate: Option<Decimal>,
    records: Vec<StringRecord>,
}

impl DividendAccruals {
    pub fn new() -> DividendAccruals {
        DividendAccruals {
            accruals: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, row: DividendRow) {
        let accrual = self.accruals
            .entry((row.isin, row.date, row.currency))
            .or_default();

        accrual.symbol = row.symbol;
        accrual.records.push(row.record);

        match row.kind {
            DividendRowKind::Gross {per_share, ex_date, currency_rate} => {
                accrual.gross += row.amount;
                accrual.per_share = accrual.per_share.or(per_share);
                accrual.ex_date = accrual.ex_date.or(ex_date);
                accrual.currency_rate = accrual.currency_rate.or(currency_rate);
            },
            DividendRowKind::Withholding => {
                accrual.withheld += row.amount;
            },
        }
    }

    /// Emits one merged dividend per accrual. Withholding rows with no
    /// matching gross row must not silently vanish - they become orphaned
    /// cash flows for the validation engine to look at.
    pub fn finalize(self, result: &mut ParsedReport) {
        for ((isin, date, currency), accrual) in self.accruals {
            if accrual.gross.is_zero() {
                warn!(
                    "{} / {}: got a {} withholding tax with no matching dividend.",
                    isin, util::format_date(date), accrual.withheld);

                result.drafts.push(Draft::CashFlow(CashFlowDraft {
                    external_id: common::external_id(
                        None, date, &isin, accrual.withheld, "withholding"),
                    flow_type: CashFlowType::Other,
                    date,
                    amount: accrual.withheld,
                    currency,
                    currency_rate: None,
                    raw: common::raw_records(&accrual.records),
                }));
                continue;
            }

            if accrual.withheld > dec!(0) {
                result.errors.push(format!(
                    "{} / {}: withholding tax reversals exceed the withheld amount",
                    isin, util::format_date(date)));
                continue;
            }

            result.drafts.push(Draft::Dividend(DividendDraft {
                external_id: common::external_id(None, date, &isin, accrual.gross, "dividend"),
                isin: isin.clone(),
                hints: InstrumentHints {
                    symbol: Some(accrual.symbol.clone()),
                    currency: Some(currency.clone()),
                    ..Default::default()
                },
                date,
                ex_date: accrual.ex_date,
                currency,
                gross_amount: accrual.gross,
                withheld_tax: accrual.withheld,
                net_amount: accrual.gross + accrual.withheld,
                per_share: accrual.per_share,
                currency_rate: accrual.currency_rate,
                raw: common::raw_records(&accrual.records),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::formats;

    use indoc::indoc;

    use super::*;

    #[test]
    fn pairing() {
        let data = indoc!("
            Pay Date,Ex Date,Type,Description,Amount,Currency,FX Rate
            2026-01-15,2026-01-02,Dividend,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share,220,EUR,
            2026-01-15,,Withholding Tax,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share - FI Tax,-77,EUR,
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.drafts.len(), 1);

        let dividend = match &parsed.drafts[0] {
            Draft::Dividend(dividend) => dividend,
            _ => panic!("Expected a dividend draft"),
        };

        assert_eq!(dividend.isin, "FI0009000202");
        assert_eq!(dividend.gross_amount, dec!(220));
        assert_eq!(dividend.withheld_tax, dec!(-77));
        assert_eq!(dividend.net_amount, dec!(143));
        assert_eq!(dividend.per_share, Some(dec!(0.22)));
        assert_eq!(dividend.ex_date, Some(date!(2026, 1, 2)));
    }

    #[test]
    fn payment_in_lieu_falls_back_to_total_amount() {
        let data = indoc!("
            Pay Date,Ex Date,Type,Description,Amount,Currency,FX Rate
            2026-01-20,,Payment in Lieu,TELIA1(SE0000667925) Payment in Lieu of Dividend,50,EUR,
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();
        assert!(parsed.errors.is_empty());

        let dividend = match &parsed.drafts[0] {
            Draft::Dividend(dividend) => dividend,
            _ => panic!("Expected a dividend draft"),
        };

        assert_eq!(dividend.gross_amount, dec!(50));
        assert_eq!(dividend.net_amount, dec!(50));
        assert_eq!(dividend.per_share, None);
    }

    #[test]
    fn orphaned_withholding_becomes_cash_flow() {
        let data = indoc!("
            Pay Date,Ex Date,Type,Description,Amount,Currency,FX Rate
            2026-01-15,,Withholding Tax,AAPL(US0378331005) Cash Dividend - US Tax,-15,USD,
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();
        assert!(parsed.errors.is_empty());

        let cash_flow = match &parsed.drafts[0] {
            Draft::CashFlow(cash_flow) => cash_flow,
            _ => panic!("Expected a cash flow draft"),
        };

        assert_eq!(cash_flow.flow_type, CashFlowType::Other);
        assert_eq!(cash_flow.amount, dec!(-15));
    }

    #[test]
    fn withholding_reversal() {
        let data = indoc!("
            Pay Date,Ex Date,Type,Description,Amount,Currency,FX Rate
            2026-01-15,,Dividend,AAPL(US0378331005) Cash Dividend 0.25 USD per Share,25,USD,
            2026-01-15,,Withholding Tax,AAPL(US0378331005) Cash Dividend - US Tax,-7,USD,
            2026-01-15,,Withholding Tax,AAPL(US0378331005) Cash Dividend - US Tax,7,USD,
            2026-01-15,,Withholding Tax,AAPL(US0378331005) Cash Dividend - US Tax,-4,USD,
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();
        assert!(parsed.errors.is_empty());

        let dividend = match &parsed.drafts[0] {
            Draft::Dividend(dividend) => dividend,
            _ => panic!("Expected a dividend draft"),
        };

        assert_eq!(dividend.withheld_tax, dec!(-4));
        assert_eq!(dividend.net_amount, dec!(21));
    }
}
