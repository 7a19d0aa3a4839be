use csv::StringRecord;
use log::warn;

use crate::catalog::InstrumentHints;
use crate::core::GenericResult;
use crate::formats::Report;
use crate::formats::sections::{self, Section, VALUE_OFFSET};
use crate::ledger::{CashFlowDraft, CashFlowType, Draft, SnapshotDraft};
use crate::types::{Date, Decimal};
use crate::util::{self, DecimalRestrictions};

use super::ParsedReport;
use super::common::{self, FieldMap};
use super::dividends::{DividendAccruals, DividendRow, DividendRowKind};
use super::{actions, holdings, trades};

pub fn parse(report: &Report) -> GenericResult<ParsedReport> {
    let sections = sections::split(&report.records)?;
    let mut result = ParsedReport::new();

    // The period has to be known before open positions can be snapshotted,
    // and the statement metadata section isn't guaranteed to come first.
    let period_end = sections.iter()
        .find(|section| section.name == "Statement")
        .map(parse_period_end)
        .transpose()?
        .flatten();

    let mut accruals = DividendAccruals::new();
    let mut positions = Vec::new();
    let mut reported_value = None;

    for section in &sections {
        let map = FieldMap::with_offset(&section.name, &section.fields, VALUE_OFFSET);

        match section.name.as_str() {
            "Statement" => {},
            "Trades" => for_each_row(section, &mut result.errors, |record| {
                result.drafts.push(Draft::Trade(trades::parse_trade(&map, record)?));
                Ok(())
            }),
            "Dividends" => for_each_row(section, &mut result.errors, |record| {
                accruals.add(parse_dividend_row(&map, record, false)?);
                Ok(())
            }),
            "Withholding Tax" => for_each_row(section, &mut result.errors, |record| {
                accruals.add(parse_dividend_row(&map, record, true)?);
                Ok(())
            }),
            "Deposits & Withdrawals" => for_each_row(section, &mut result.errors, |record| {
                result.drafts.push(Draft::CashFlow(parse_cash_flow(&map, record, None)?));
                Ok(())
            }),
            "Fees" => for_each_row(section, &mut result.errors, |record| {
                result.drafts.push(Draft::CashFlow(
                    parse_cash_flow(&map, record, Some(CashFlowType::Fee))?));
                Ok(())
            }),
            "Interest" => for_each_row(section, &mut result.errors, |record| {
                result.drafts.push(Draft::CashFlow(
                    parse_cash_flow(&map, record, Some(CashFlowType::Interest))?));
                Ok(())
            }),
            "Corporate Actions" => for_each_row(section, &mut result.errors, |record| {
                result.drafts.push(Draft::CorporateAction(actions::parse_action(&map, record)?));
                Ok(())
            }),
            "Open Positions" => {
                let date = period_end.ok_or(
                    "Got an open positions section in a statement with no period")?;
                for_each_row(section, &mut result.errors, |record| {
                    positions.push(parse_open_position(&map, record, date)?);
                    Ok(())
                });
            },
            "Net Asset Value" => {
                reported_value = parse_net_asset_value(&map, section)
                    .map_err(|e| format!("Invalid {:?} section: {}", section.name, e))?;
            },
            _ => warn!("Skipping unsupported statement section: {:?}.", section.name),
        }
    }

    accruals.finalize(&mut result);

    if !positions.is_empty() || reported_value.is_some() {
        let date = period_end.ok_or(
            "The statement carries positions or account value, but no period")?;

        result.drafts.push(Draft::Snapshot(SnapshotDraft {
            date,
            reported_value,
            positions,
        }));
    }

    Ok(result)
}

fn for_each_row<F>(section: &Section, errors: &mut Vec<String>, mut handler: F)
    where F: FnMut(&StringRecord) -> GenericResult<()>
{
    for (index, record) in section.rows.iter().enumerate() {
        if let Err(e) = handler(record) {
            errors.push(format!("{:?} section, record #{}: {}", section.name, index + 1, e));
        }
    }
}

/// The statement metadata section is a key-value listing. Only the period is
/// load-bearing: its end date is the effective date of open positions and
/// account value.
fn parse_period_end(section: &Section) -> GenericResult<Option<Date>> {
    let map = FieldMap::with_offset(&section.name, &section.fields, VALUE_OFFSET);

    for record in &section.rows {
        if map.get(record, "Field Name")? != "Period" {
            continue;
        }

        let period = map.get(record, "Field Value")?;
        let end = period.rsplit(" - ").next().ok_or_else(|| format!(
            "Invalid statement period: {:?}", period))?;

        return Ok(Some(util::parse_flexible_date(end)?));
    }

    Ok(None)
}

fn parse_dividend_row(
    map: &FieldMap, record: &StringRecord, withholding: bool,
) -> GenericResult<DividendRow> {
    let date = map.get_date(record, "Date")?;
    let description = map.get(record, "Description")?;

    let security = common::parse_security_description(description).ok_or_else(|| format!(
        "Unable to extract the security from {:?}", description))?;

    let kind = if withholding {
        DividendRowKind::Withholding
    } else {
        DividendRowKind::Gross {
            per_share: common::parse_per_share_amount(description),
            ex_date: map.get_optional_date(record, "Ex Date")?,
            currency_rate: map.get_optional_amount(
                record, "FX Rate", DecimalRestrictions::StrictlyPositive)?,
        }
    };

    Ok(DividendRow {
        kind,
        date,
        isin: security.isin,
        symbol: security.symbol,
        currency: map.get(record, "Currency")?.to_uppercase(),
        amount: map.get_amount(record, "Amount", DecimalRestrictions::NonZero)?,
        record: record.clone(),
    })
}

fn parse_cash_flow(
    map: &FieldMap, record: &StringRecord, flow_type: Option<CashFlowType>,
) -> GenericResult<CashFlowDraft> {
    let date = map.get_date(record, "Date")?;
    let amount = map.get_amount(record, "Amount", DecimalRestrictions::NonZero)?;
    let currency = map.get(record, "Currency")?.to_uppercase();

    // Deposits and withdrawals share one section and are told apart by sign
    let flow_type = flow_type.unwrap_or_else(|| if amount.is_sign_positive() {
        CashFlowType::Deposit
    } else {
        CashFlowType::Withdrawal
    });
    let amount = super::cash::normalize_sign(flow_type, amount);

    Ok(CashFlowDraft {
        external_id: common::external_id(
            map.get_optional(record, "Transaction ID"), date, &currency, amount, "cash"),
        flow_type,
        date,
        amount,
        currency,
        currency_rate: map.get_optional_amount(
            record, "FX Rate", DecimalRestrictions::StrictlyPositive)?,
        raw: common::raw_record(record),
    })
}

fn parse_open_position(
    map: &FieldMap, record: &StringRecord, date: Date,
) -> GenericResult<crate::ledger::PositionDraft> {
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
        currency: Some(currency.clone()),
        ..Default::default()
    };

    Ok(holdings::position_draft(
        date, symbol, isin, hints, quantity, price, value, currency, currency_rate,
        common::raw_record(record)))
}

/// The account value reported by the source. Asset class subtotals are
/// summed, aggregate rows are skipped - we never double-count the source's
/// own totals.
fn parse_net_asset_value(map: &FieldMap, section: &Section) -> GenericResult<Option<Decimal>> {
    let mut total = None;

    for record in &section.rows {
        if map.get(record, "Asset Class")? == "Total" {
            continue;
        }

        let value = map.get_amount(record, "Current Total", DecimalRestrictions::No)?;
        total = Some(total.unwrap_or_default() + value);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use crate::formats;
    use crate::ledger::DividendDraft;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_data(data: &str) -> ParsedReport {
        let report = formats::read(data.as_bytes());
        assert_eq!(report.format, formats::ReportFormat::MultiSectionStatement);
        parse(&report).unwrap()
    }

    #[test]
    fn full_statement() {
        let parsed = parse_data(indoc!("
            Statement,Header,Field Name,Field Value
            Statement,Data,Period,2026-01-01 - 2026-01-31
            Trades,Header,Trade Date,Symbol,ISIN,Type,Quantity,Price,Amount,Commission,Currency
            Trades,Data,2026-01-12,KESKOB,FI0009000202,BUY,100,21.10,2110.00,-5.00,EUR
            Trades,Total,,,,,100,,2110.00,-5.00,EUR
            Dividends,Header,Date,Description,Amount,Currency
            Dividends,Data,2026-01-15,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share,220,EUR
            Withholding Tax,Header,Date,Description,Amount,Currency
            Withholding Tax,Data,2026-01-15,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share - FI Tax,-77,EUR
            Deposits & Withdrawals,Header,Date,Description,Amount,Currency
            Deposits & Withdrawals,Data,2026-01-02,Incoming wire,5000,EUR
            Deposits & Withdrawals,Data,2026-01-20,Outgoing wire,-1000,EUR
            Fees,Header,Date,Description,Amount,Currency
            Fees,Data,2026-01-31,Custody fee,-2.50,EUR
            Open Positions,Header,Symbol,ISIN,Quantity,Price,Market Value,Currency
            Open Positions,Data,KESKOB,FI0009000202,100,21.50,2150.00,EUR
            Net Asset Value,Header,Asset Class,Current Total
            Net Asset Value,Data,Stock,2150.00
            Net Asset Value,Data,Cash,4140.50
            Net Asset Value,Data,Total,6290.50
        "));

        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);

        let mut trades = 0;
        let mut dividends: Vec<&DividendDraft> = Vec::new();
        let mut cash_flows = Vec::new();
        let mut snapshots = Vec::new();

        for draft in &parsed.drafts {
            match draft {
                Draft::Trade(_) => trades += 1,
                Draft::Dividend(dividend) => dividends.push(dividend),
                Draft::CashFlow(cash_flow) => cash_flows.push(cash_flow),
                Draft::Snapshot(snapshot) => snapshots.push(snapshot),
                Draft::CorporateAction(_) => unreachable!(),
            }
        }

        assert_eq!(trades, 1);

        // Gross and withholding rows live in different sections, but merge
        // into one dividend
        assert_eq!(dividends.len(), 1);
        assert_eq!(dividends[0].gross_amount, dec!(220));
        assert_eq!(dividends[0].withheld_tax, dec!(-77));
        assert_eq!(dividends[0].net_amount, dec!(143));

        assert_eq!(
            cash_flows.iter().map(|flow| (flow.flow_type, flow.amount)).collect::<Vec<_>>(),
            vec![
                (CashFlowType::Deposit, dec!(5000)),
                (CashFlowType::Withdrawal, dec!(-1000)),
                (CashFlowType::Fee, dec!(-2.50)),
            ]);

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].date, date!(2026, 1, 31));
        assert_eq!(snapshots[0].reported_value, Some(dec!(6290.50)));
        assert_eq!(snapshots[0].positions.len(), 1);
    }

    #[test]
    fn statement_and_flat_holdings_derive_identical_position_ids() {
        let statement = parse_data(indoc!("
            Statement,Header,Field Name,Field Value
            Statement,Data,Period,2026-01-01 - 2026-01-28
            Open Positions,Header,Symbol,ISIN,Quantity,Price,Market Value,Currency
            Open Positions,Data,KESKOB,FI0009000202,100,21.50,2150.00,EUR
        "));

        let holdings = formats::read(indoc!("
            Date,Symbol,ISIN,Name,Quantity,Price,Market Value,Currency,FX Rate
            2026-01-28,KESKOB,FI0009000202,Kesko Oyj B,100,21.50,2150.00,EUR,
        ").as_bytes());
        let holdings = super::super::parse(&holdings).unwrap();

        let external_id = |parsed: &ParsedReport| match &parsed.drafts[0] {
            Draft::Snapshot(snapshot) => snapshot.positions[0].external_id.clone(),
            _ => panic!("Expected a snapshot draft"),
        };

        assert_eq!(external_id(&statement), external_id(&holdings));
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let parsed = parse_data(indoc!("
            Statement,Header,Field Name,Field Value
            Statement,Data,Period,2026-01-01 - 2026-01-31
            Codes,Header,Code,Meaning
            Codes,Data,O,Opening trade
        "));

        assert!(parsed.errors.is_empty());
        assert!(parsed.drafts.is_empty());
    }

    #[test]
    fn positions_without_period() {
        let report = formats::read(indoc!("
            Open Positions,Header,Symbol,ISIN,Quantity,Price,Market Value,Currency
            Open Positions,Data,KESKOB,FI0009000202,100,21.50,2150.00,EUR
        ").as_bytes());

        assert!(parse(&report).is_err());
    }
}
