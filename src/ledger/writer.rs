use diesel::prelude::*;
use log::debug;

use crate::core::{EmptyResult, GenericResult};
use crate::currency::converter::CurrencyConverter;
use crate::db::{self, models};
use crate::db::schema::{cash_flows, corporate_actions, dividends, positions, snapshots, trades};
use crate::types::Date;
use crate::util::{self, DecimalRestrictions};

use super::{CashFlowDraft, CorporateActionDraft, DividendDraft, SnapshotDraft, TradeDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Skipped,
}

impl WriteOutcome {
    fn from_rows(rows: usize) -> WriteOutcome {
        if rows > 0 {
            WriteOutcome::Created
        } else {
            WriteOutcome::Skipped
        }
    }
}

/// Upserts ledger records with deterministic deduplication: the external id
/// UNIQUE constraint plus insert-or-ignore is the single dedup mechanism in
/// the system, so re-importing the same file is a no-op. No cross-record
/// aggregation happens here.
pub struct LedgerWriter<'a> {
    converter: &'a CurrencyConverter,
}

impl<'a> LedgerWriter<'a> {
    pub fn new(converter: &'a CurrencyConverter) -> LedgerWriter<'a> {
        LedgerWriter {converter}
    }

    pub fn write_trade(
        &self, conn: &mut db::Connection, draft: &TradeDraft, instrument_id: i32,
    ) -> GenericResult<WriteOutcome> {
        let rows = diesel::insert_or_ignore_into(trades::table)
            .values(models::NewTrade {
                external_id: draft.external_id.clone(),
                instrument_id,
                date: draft.date,
                settlement_date: draft.settlement_date,
                quantity: draft.quantity.to_string(),
                price: draft.price.map(|price| price.to_string()),
                amount: draft.amount.to_string(),
                commission: draft.commission.map(|commission| commission.to_string()),
                currency: draft.currency.clone(),
                currency_rate: draft.currency_rate.map(|rate| rate.to_string()),
                raw_data: draft.raw.clone(),
            })
            .execute(conn)?;

        Ok(WriteOutcome::from_rows(rows))
    }

    pub fn write_dividend(
        &self, conn: &mut db::Connection, draft: &DividendDraft, instrument_id: i32,
    ) -> GenericResult<WriteOutcome> {
        let resolution = self.converter.resolve(
            conn, &draft.currency, draft.date, draft.currency_rate)?;
        let rate = resolution.rate();

        if rate.is_none() {
            debug!(
                "Leaving {} dividend on {} unconverted: no {} rate is known.",
                draft.isin, util::format_date(draft.date), draft.currency);
        }

        let rows = diesel::insert_or_ignore_into(dividends::table)
            .values(models::NewDividend {
                external_id: draft.external_id.clone(),
                instrument_id,
                date: draft.date,
                ex_date: draft.ex_date,
                currency: draft.currency.clone(),
                gross_amount: draft.gross_amount.to_string(),
                withheld_tax: draft.withheld_tax.to_string(),
                net_amount: draft.net_amount.to_string(),
                per_share: draft.per_share.map(|amount| amount.to_string()),
                currency_rate: rate.map(|rate| rate.to_string()),
                base_amount: rate.map(|rate| (draft.net_amount * rate).to_string()),
                raw_data: draft.raw.clone(),
            })
            .execute(conn)?;

        Ok(WriteOutcome::from_rows(rows))
    }

    pub fn write_cash_flow(
        &self, conn: &mut db::Connection, draft: &CashFlowDraft,
    ) -> GenericResult<WriteOutcome> {
        let rate = self.converter.resolve(
            conn, &draft.currency, draft.date, draft.currency_rate)?.rate();

        let rows = diesel::insert_or_ignore_into(cash_flows::table)
            .values(models::NewCashFlow {
                external_id: draft.external_id.clone(),
                flow_type: draft.flow_type.to_string(),
                date: draft.date,
                amount: draft.amount.to_string(),
                currency: draft.currency.clone(),
                currency_rate: rate.map(|rate| rate.to_string()),
                base_amount: rate.map(|rate| (draft.amount * rate).to_string()),
                raw_data: draft.raw.clone(),
            })
            .execute(conn)?;

        Ok(WriteOutcome::from_rows(rows))
    }

    pub fn write_corporate_action(
        &self, conn: &mut db::Connection, draft: &CorporateActionDraft, instrument_id: Option<i32>,
    ) -> GenericResult<WriteOutcome> {
        let rows = diesel::insert_or_ignore_into(corporate_actions::table)
            .values(models::NewCorporateAction {
                external_id: draft.external_id.clone(),
                instrument_id,
                action_type: draft.action_type.clone(),
                date: draft.date,
                quantity: draft.quantity.map(|quantity| quantity.to_string()),
                amount: draft.amount.map(|amount| amount.to_string()),
                proceeds: draft.proceeds.map(|proceeds| proceeds.to_string()),
                raw_data: draft.raw.clone(),
            })
            .execute(conn)?;

        Ok(WriteOutcome::from_rows(rows))
    }

    /// Writes a holdings snapshot: the snapshot row is keyed by date, the
    /// positions dedup by external id like any other ledger record. The
    /// snapshot total is recomputed from the stored positions afterwards, so
    /// partial and repeated imports converge to the same value.
    pub fn write_snapshot(
        &self, conn: &mut db::Connection, draft: &SnapshotDraft, instrument_ids: &[Option<i32>],
    ) -> GenericResult<(usize, usize)> {
        assert_eq!(draft.positions.len(), instrument_ids.len());

        diesel::insert_or_ignore_into(snapshots::table)
            .values(models::NewSnapshot {
                date: draft.date,
                total_value: dec!(0).to_string(),
                reported_value: draft.reported_value.map(|value| value.to_string()),
                currency: self.converter.base_currency().to_owned(),
            })
            .execute(conn)?;

        let snapshot_id = snapshots::table
            .filter(snapshots::date.eq(draft.date))
            .select(snapshots::id)
            .get_result::<i32>(conn)?;

        if let Some(reported_value) = draft.reported_value {
            diesel::update(snapshots::table.filter(snapshots::id.eq(snapshot_id)))
                .set(snapshots::reported_value.eq(reported_value.to_string()))
                .execute(conn)?;
        }

        let mut created = 0;
        let mut skipped = 0;

        for (position, &instrument_id) in draft.positions.iter().zip(instrument_ids) {
            let rows = diesel::insert_or_ignore_into(positions::table)
                .values(models::NewPosition {
                    external_id: position.external_id.clone(),
                    snapshot_id,
                    instrument_id,
                    symbol: position.symbol.clone(),
                    isin: position.isin.clone(),
                    quantity: position.quantity.to_string(),
                    price: position.price.map(|price| price.to_string()),
                    value: position.value.to_string(),
                    currency: position.currency.clone(),
                    currency_rate: position.currency_rate.map(|rate| rate.to_string()),
                    raw_data: position.raw.clone(),
                })
                .execute(conn)?;

            match rows {
                0 => skipped += 1,
                _ => created += 1,
            }
        }

        self.recompute_total(conn, snapshot_id, draft.date)?;

        Ok((created, skipped))
    }

    fn recompute_total(
        &self, conn: &mut db::Connection, snapshot_id: i32, date: Date,
    ) -> EmptyResult {
        let rows = positions::table
            .filter(positions::snapshot_id.eq(snapshot_id))
            .select((positions::value, positions::currency, positions::currency_rate))
            .load::<(String, String, Option<String>)>(conn)?;

        let mut total = dec!(0);

        for (value, currency, rate) in rows {
            let value = util::parse_decimal(&value, DecimalRestrictions::No)?;
            let rate = match rate {
                Some(ref rate) => Some(util::parse_decimal(rate, DecimalRestrictions::StrictlyPositive)?),
                None => None,
            };

            // Unconvertible position values are excluded from the total and
            // surfaced by the validation engine instead.
            if let Some(value) = self.converter.convert(conn, &currency, date, value, rate)? {
                total += value;
            }
        }

        diesel::update(snapshots::table.filter(snapshots::id.eq(snapshot_id)))
            .set(snapshots::total_value.eq(total.to_string()))
            .execute(conn)?;

        Ok(())
    }
}
